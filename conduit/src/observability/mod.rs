//! Observability utilities.
//!
//! The library only emits `tracing` events and spans. Binaries and tests
//! that want to see them install a subscriber with [`init_tracing`] or
//! [`LoggingConfig::init`].

mod logging;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
