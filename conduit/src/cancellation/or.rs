//! Fan-in of several cancellation tokens into one.
//!
//! The derived token is fed by a balanced tree of listener tasks. Each
//! listener waits on at most [`FAN_IN`] sources plus the root of the tree, so
//! no single wait is wider than four branches and the tree is `O(log N)` deep.
//! Watching the root lets every listener exit as soon as the derived token
//! fires, whichever source caused it.

use super::CancellationToken;
use tracing::trace;

/// Maximum number of sources a single listener task waits on.
pub const FAN_IN: usize = 3;

/// Returns a token that fires as soon as any of `tokens` fires.
///
/// - no tokens: an inert token that never fires
/// - one token: that token, unchanged
/// - two or more: a fresh token driven by listener tasks
///
/// The derived token carries the reason of the first source observed to
/// fire. Must be called from within a Tokio runtime when given two or more
/// tokens.
pub fn or<I>(tokens: I) -> CancellationToken
where
    I: IntoIterator<Item = CancellationToken>,
{
    let mut sources: Vec<CancellationToken> = tokens.into_iter().collect();
    match sources.len() {
        0 => CancellationToken::never(),
        1 => sources.swap_remove(0),
        n => {
            let root = CancellationToken::new();
            trace!(sources = n, "Building or-combinator tree");
            attach(sources, &root, &root);
            root
        }
    }
}

/// Wires `sources` (at least two) so that `out` fires when any of them does.
fn attach(sources: Vec<CancellationToken>, out: &CancellationToken, root: &CancellationToken) {
    let children = if sources.len() <= FAN_IN {
        sources
    } else {
        partition(sources, FAN_IN)
            .into_iter()
            .map(|mut chunk| {
                if chunk.len() == 1 {
                    chunk.swap_remove(0)
                } else {
                    let node = CancellationToken::new();
                    attach(chunk, &node, root);
                    node
                }
            })
            .collect()
    };

    spawn_listener(children, out.clone(), root.clone());
}

/// Splits `items` into `parts` contiguous chunks whose sizes differ by at most one.
fn partition<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut rest = items.into_iter();

    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            rest.by_ref().take(size).collect()
        })
        .filter(|chunk: &Vec<T>| !chunk.is_empty())
        .collect()
}

fn spawn_listener(children: Vec<CancellationToken>, out: CancellationToken, root: CancellationToken) {
    tokio::spawn(async move {
        let fired = match children.as_slice() {
            [a, b] => tokio::select! {
                () = a.cancelled() => a,
                () = b.cancelled() => b,
                () = root.cancelled() => &root,
            },
            [a, b, c] => tokio::select! {
                () = a.cancelled() => a,
                () = b.cancelled() => b,
                () = c.cancelled() => c,
                () = root.cancelled() => &root,
            },
            other => unreachable!("listener built with {} sources", other.len()),
        };

        out.cancel(fired.reason().unwrap_or_default());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn fires_within(token: &CancellationToken, limit: Duration) -> bool {
        tokio::time::timeout(limit, token.cancelled()).await.is_ok()
    }

    #[test]
    fn test_partition_balanced() {
        let chunks = partition((0..7).collect(), 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);

        let chunks = partition((0..4).collect(), 3);
        assert_eq!(chunks, vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_or_empty_never_fires() {
        let token = or(Vec::new());

        assert!(token.is_inert());
        assert!(!fires_within(&token, Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_or_single_is_identity() {
        let source = CancellationToken::new();
        let token = or([source.clone()]);

        assert!(token.same_as(&source));
        source.cancel("only");
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_or_quiet_until_a_source_fires() {
        let sources: Vec<_> = (0..5).map(|_| CancellationToken::new()).collect();
        let token = or(sources.clone());

        assert!(!fires_within(&token, Duration::from_secs(60)).await);

        sources[4].cancel("last");
        assert!(fires_within(&token, Duration::from_secs(1)).await);
        assert_eq!(token.reason(), Some("last".to_string()));
    }

    #[tokio::test]
    async fn test_or_fires_for_any_source() {
        // Covers exact multiples of the fan-in and every remainder.
        for n in [2, 3, 4, 5, 6, 7, 10] {
            for index in 0..n {
                let sources: Vec<_> = (0..n).map(|_| CancellationToken::new()).collect();
                let token = or(sources.clone());

                sources[index].cancel(format!("source {index}"));

                assert!(
                    fires_within(&token, Duration::from_secs(1)).await,
                    "or of {n} did not fire for source {index}"
                );
                assert_eq!(token.reason(), Some(format!("source {index}")));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_or_first_timer_wins() {
        let delays = [7200, 300, 1, 3600, 60];
        let sources: Vec<_> = delays
            .iter()
            .map(|&secs| {
                let token = CancellationToken::new();
                let timer = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    timer.cancel(format!("after {secs}s"));
                });
                token
            })
            .collect();

        let start = tokio::time::Instant::now();
        or(sources).cancelled().await;

        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_or_already_cancelled_source() {
        let fired = CancellationToken::new();
        fired.cancel("before");
        let token = or([CancellationToken::new(), fired, CancellationToken::never()]);

        assert!(fires_within(&token, Duration::from_secs(1)).await);
    }
}
