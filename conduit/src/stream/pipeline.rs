//! Pipelines: a generator followed by any number of stages.

use super::channel::{Stream, DEFAULT_CAPACITY};
use super::stage::{spawn_generator, spawn_stage, spawn_take, StageExit, StageHandle};
use crate::cancellation::CancellationToken;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info_span, Span};
use uuid::Uuid;

/// Configuration for a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name used in tracing spans.
    pub name: String,
    /// Capacity of every stream between stages.
    pub buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            buffer: DEFAULT_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Creates a new pipeline config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the stream capacity.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Checks that the config is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer == 0 {
            return Err(ConfigError::invalid("buffer", "must be greater than zero"));
        }
        Ok(())
    }
}

/// How one stage of a pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage name.
    pub name: String,
    /// Why it ended.
    pub exit: StageExit,
}

/// The tasks backing a pipeline, in spawn order.
#[derive(Debug)]
pub struct PipelineTasks {
    run_id: Uuid,
    handles: Vec<StageHandle>,
}

impl PipelineTasks {
    /// Returns the pipeline run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns true once every task has ended.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(StageHandle::is_finished)
    }

    /// Waits for every task and reports how each ended.
    pub async fn join(self) -> Vec<StageReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let name = handle.name().to_string();
            let exit = handle.join().await;
            reports.push(StageReport { name, exit });
        }
        debug!(run_id = %self.run_id, stages = reports.len(), "Pipeline joined");
        reports
    }

    /// Like [`join`](Self::join), giving up after `limit`.
    pub async fn join_within(self, limit: Duration) -> Option<Vec<StageReport>> {
        tokio::time::timeout(limit, self.join()).await.ok()
    }
}

/// A chain of concurrent stages sharing one cancellation token.
///
/// ```rust,ignore
/// let token = CancellationToken::new();
/// let values = Pipeline::generate(&token, [1, 2, 3, 4])
///     .stage("multiply", |i| i * 2)
///     .stage("add", |i| i + 1)
///     .collect()
///     .await;
/// assert_eq!(values, vec![3, 5, 7, 9]);
/// ```
#[derive(Debug)]
pub struct Pipeline<T> {
    config: PipelineConfig,
    token: CancellationToken,
    span: Span,
    output: Stream<T>,
    tasks: PipelineTasks,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Starts a pipeline from a finite or infinite source.
    pub fn generate<I>(token: &CancellationToken, source: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::start(token, PipelineConfig::default(), source)
    }

    /// Starts a pipeline from a source with the given config.
    pub fn generate_with<I>(
        token: &CancellationToken,
        config: PipelineConfig,
        source: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        config.validate()?;
        Ok(Self::start(token, config, source))
    }

    /// Starts a pipeline from an existing stream.
    pub fn from_stream(token: &CancellationToken, input: Stream<T>) -> Self {
        Self::assemble(token, PipelineConfig::default(), input, Vec::new())
    }

    /// Starts a pipeline from an existing stream with the given config.
    pub fn from_stream_with(
        token: &CancellationToken,
        config: PipelineConfig,
        input: Stream<T>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(token, config, input, Vec::new()))
    }

    fn start<I>(token: &CancellationToken, config: PipelineConfig, source: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", name = %config.name, run_id = %run_id);
        let (output, handle) = {
            let _entered = span.enter();
            spawn_generator("generator", token, config.buffer, source)
        };
        Self {
            config,
            token: token.clone(),
            span,
            output,
            tasks: PipelineTasks {
                run_id,
                handles: vec![handle],
            },
        }
    }

    fn assemble(
        token: &CancellationToken,
        config: PipelineConfig,
        output: Stream<T>,
        handles: Vec<StageHandle>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", name = %config.name, run_id = %run_id);
        Self {
            config,
            token: token.clone(),
            span,
            output,
            tasks: PipelineTasks { run_id, handles },
        }
    }

    /// Appends a stage applying `transform` to every value.
    pub fn stage<U, F>(self, name: impl Into<String>, transform: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let Self {
            config,
            token,
            span,
            output,
            mut tasks,
        } = self;

        let (output, handle) = {
            let _entered = span.enter();
            spawn_stage(name, output, &token, config.buffer, transform)
        };
        tasks.handles.push(handle);

        Pipeline {
            config,
            token,
            span,
            output,
            tasks,
        }
    }

    /// Appends a stage forwarding at most `n` values.
    #[must_use]
    pub fn take(mut self, n: usize) -> Self {
        let (output, handle) = {
            let _entered = self.span.enter();
            spawn_take("take", self.output, &self.token, self.config.buffer, n)
        };
        self.tasks.handles.push(handle);
        self.output = output;
        self
    }

    /// Returns the pipeline run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.tasks.run_id
    }

    /// Returns the number of tasks spawned so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the pipeline config.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Splits the pipeline into its final stream and its tasks.
    pub fn into_stream(self) -> (Stream<T>, PipelineTasks) {
        (self.output, self.tasks)
    }

    /// Reads every value of the final stream, then waits for every task.
    pub async fn collect(self) -> Vec<T> {
        let (output, tasks) = self.into_stream();
        let values = output.collect().await;
        tasks.join().await;
        values
    }
}
