//! # Conduit
//!
//! Cancellable stream pipelines and resilience decorators for tokio.
//!
//! Conduit provides two building blocks:
//!
//! - **Stream pipelines**: a generator followed by concurrent stages, each
//!   reading one stream and writing another, all stopping promptly when a
//!   shared [`CancellationToken`](cancellation::CancellationToken) fires
//! - **Resilience decorators**: a circuit breaker, retry loop and token-bucket
//!   throttle that wrap any [`Effector`](resilience::Effector) and compose in
//!   any order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit::prelude::*;
//!
//! let token = CancellationToken::new();
//! let values = Pipeline::generate(&token, [1, 2, 3, 4])
//!     .stage("multiply", |i| i * 2)
//!     .stage("add", |i| i + 1)
//!     .collect()
//!     .await;
//!
//! let guarded = remote_call
//!     .with_circuit_breaker(BreakerConfig::new().with_failure_threshold(3))
//!     .with_retry(RetryConfig::new().with_max_retries(2));
//! let answer = guarded.call(&token).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod stream;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{or, CancellationToken};
    pub use crate::errors::{ConfigError, EffectorError, Failure};
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::resilience::{
        effector_fn, BreakerConfig, CircuitBreaker, Effector, EffectorExt, EffectorResult,
        Retry, RetryConfig, Throttle, ThrottleConfig,
    };
    pub use crate::stream::{
        generate, stage, Pipeline, PipelineConfig, StageExit, Stream, StreamWriter,
    };
}
