//! Streams, stages and pipelines.
//!
//! This module provides:
//! - `Stream`/`StreamWriter`, an ordered closable sequence with one owner
//! - the stage engine (`stage`, generators, `take`)
//! - `Pipeline`, a builder that chains stages and tracks their tasks

mod channel;
mod pipeline;
mod stage;


pub use channel::{channel, SendError, Stream, StreamWriter, DEFAULT_CAPACITY};
pub use pipeline::{Pipeline, PipelineConfig, PipelineTasks, StageReport};
pub use stage::{
    generate, repeat, repeat_fn, spawn_generator, spawn_stage, spawn_take, stage, take, StageExit,
    StageHandle,
};
