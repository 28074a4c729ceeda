//! The stage engine: concurrent tasks that own their output streams.
//!
//! Every stage runs as its own tokio task and closes its output on every exit
//! path. A stage stops when its input closes, when its token fires, or when
//! nobody is left to read its output. A panic inside a transform ends only
//! that task; its writer is dropped during unwinding, so downstream stages
//! observe a closed input instead of waiting forever.

use super::channel::{channel, SendError, Stream, StreamWriter, DEFAULT_CAPACITY};
use crate::cancellation::CancellationToken;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{trace, trace_span, warn, Instrument};

/// How a stage task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageExit {
    /// The input closed (or the source ran out) and everything was delivered.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// Every reader of the output went away.
    ConsumerGone,
    /// The transform panicked.
    Panicked,
}

impl<T> From<SendError<T>> for StageExit {
    fn from(err: SendError<T>) -> Self {
        match err {
            SendError::Cancelled(_) => Self::Cancelled,
            SendError::Closed(_) => Self::ConsumerGone,
        }
    }
}

/// Handle to a running stage task.
#[derive(Debug)]
pub struct StageHandle {
    name: String,
    handle: JoinHandle<StageExit>,
}

impl StageHandle {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to end and reports why it ended.
    pub async fn join(self) -> StageExit {
        match self.handle.await {
            Ok(exit) => exit,
            Err(err) if err.is_panic() => {
                warn!(stage = %self.name, "Stage task panicked");
                StageExit::Panicked
            }
            Err(_) => StageExit::Cancelled,
        }
    }
}

/// Spawns a stage applying `transform` to every value of `input`.
///
/// Returns the stage's output stream. Must be called from within a Tokio
/// runtime.
pub fn stage<T, U, F>(input: Stream<T>, token: &CancellationToken, transform: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    spawn_stage("stage", input, token, DEFAULT_CAPACITY, transform).0
}

/// Like [`stage`], also returning a handle to the spawned task.
pub fn spawn_stage<T, U, F>(
    name: impl Into<String>,
    input: Stream<T>,
    token: &CancellationToken,
    capacity: usize,
    mut transform: F,
) -> (Stream<U>, StageHandle)
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    let (writer, output) = channel(capacity);
    let token = token.clone();

    let handle = spawn_named(name, writer, move |writer| async move {
        loop {
            let value = tokio::select! {
                biased;
                () = token.cancelled() => return StageExit::Cancelled,
                next = input.recv() => match next {
                    Some(value) => value,
                    None => return StageExit::Completed,
                },
            };

            if let Err(err) = writer.send(transform(value), &token).await {
                return err.into();
            }
        }
    });

    (output, handle)
}

/// Spawns a generator emitting every item of `source`, which may be infinite.
pub fn generate<I>(token: &CancellationToken, source: I) -> Stream<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    spawn_generator("generate", token, DEFAULT_CAPACITY, source).0
}

/// Spawns a generator that cycles through `values` until cancelled.
///
/// An empty `values` produces a stream that closes immediately.
pub fn repeat<T>(token: &CancellationToken, values: Vec<T>) -> Stream<T>
where
    T: Clone + Send + 'static,
{
    spawn_generator("repeat", token, DEFAULT_CAPACITY, values.into_iter().cycle()).0
}

/// Spawns a generator that calls `f` for every value until cancelled.
pub fn repeat_fn<T, F>(token: &CancellationToken, f: F) -> Stream<T>
where
    T: Send + 'static,
    F: FnMut() -> T + Send + 'static,
{
    spawn_generator("repeat_fn", token, DEFAULT_CAPACITY, std::iter::repeat_with(f)).0
}

/// Like [`generate`], also returning a handle to the spawned task.
pub fn spawn_generator<I>(
    name: impl Into<String>,
    token: &CancellationToken,
    capacity: usize,
    source: I,
) -> (Stream<I::Item>, StageHandle)
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (writer, output) = channel(capacity);
    let token = token.clone();
    let source = source.into_iter();

    let handle = spawn_named(name, writer, move |writer| async move {
        for value in source {
            if let Err(err) = writer.send(value, &token).await {
                return err.into();
            }
        }
        StageExit::Completed
    });

    (output, handle)
}

/// Forwards at most `n` values of `input`, then closes.
pub fn take<T>(input: Stream<T>, token: &CancellationToken, n: usize) -> Stream<T>
where
    T: Send + 'static,
{
    spawn_take("take", input, token, DEFAULT_CAPACITY, n).0
}

/// Like [`take`], also returning a handle to the spawned task.
///
/// After `n` values the stage drops its input handle, so an upstream stage
/// with no other readers sees its consumer gone and stops as well.
pub fn spawn_take<T>(
    name: impl Into<String>,
    input: Stream<T>,
    token: &CancellationToken,
    capacity: usize,
    n: usize,
) -> (Stream<T>, StageHandle)
where
    T: Send + 'static,
{
    let (writer, output) = channel(capacity);
    let token = token.clone();

    let handle = spawn_named(name, writer, move |writer| async move {
        for _ in 0..n {
            let Some(value) = input.recv_or_cancel(&token).await else {
                return if token.is_cancelled() {
                    StageExit::Cancelled
                } else {
                    StageExit::Completed
                };
            };
            if let Err(err) = writer.send(value, &token).await {
                return err.into();
            }
        }
        StageExit::Completed
    });

    (output, handle)
}

/// Spawns `body` with exclusive ownership of `writer`.
///
/// The writer is moved into the task and dropped when the body returns or
/// unwinds, which closes the output exactly once.
fn spawn_named<T, B, Fut>(name: impl Into<String>, writer: StreamWriter<T>, body: B) -> StageHandle
where
    T: Send + 'static,
    B: FnOnce(StreamWriter<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = StageExit> + Send + 'static,
{
    let name = name.into();
    let span = trace_span!("stage", stage = %name);

    let handle = tokio::spawn(
        async move {
            trace!("Stage started");
            let exit = body(writer).await;
            trace!(?exit, "Stage finished");
            exit
        }
        .instrument(span),
    );

    StageHandle { name, handle }
}
