//! Cooperative cancellation.
//!
//! This module provides:
//! - `CancellationToken`, a one-shot broadcast stop signal
//! - `or`, which merges several tokens into one that fires when any does

mod or;
mod token;

pub use or::{or, FAN_IN};
pub use token::{CancelCallback, CancellationToken};
