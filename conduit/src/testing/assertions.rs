//! Test assertions for streams.

use crate::stream::Stream;
use std::time::Duration;

/// Drains `stream` and asserts that it closes within `limit`.
///
/// Returns whatever values were still buffered.
pub async fn assert_closed_within<T>(stream: &Stream<T>, limit: Duration) -> Vec<T> {
    match tokio::time::timeout(limit, stream.clone().collect()).await {
        Ok(values) => values,
        Err(_) => panic!("Expected stream to close within {limit:?}, but it is still open"),
    }
}

/// Asserts that `stream` yields nothing and stays open for `wait`.
pub async fn assert_open_after<T>(stream: &Stream<T>, wait: Duration) {
    let next = tokio::time::timeout(wait, stream.recv()).await;
    assert!(
        next.is_err(),
        "Expected stream to stay open and quiet for {wait:?}, but it {}",
        if matches!(next, Ok(Some(_))) {
            "yielded a value"
        } else {
            "closed"
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel;

    #[tokio::test]
    async fn test_closed_stream_passes() {
        let (writer, stream) = channel::<u8>(1);
        drop(writer);
        assert!(assert_closed_within(&stream, Duration::from_millis(10))
            .await
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "still open")]
    async fn test_open_stream_panics() {
        let (_writer, stream) = channel::<u8>(1);
        assert_closed_within(&stream, Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_stream_stays_open() {
        let (_writer, stream) = channel::<u8>(1);
        assert_open_after(&stream, Duration::from_secs(1)).await;
    }
}
