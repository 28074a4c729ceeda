//! Testing utilities for conduit pipelines and decorators.
//!
//! This module provides:
//! - Scripted effectors for driving decorators through failure sequences
//! - Stream assertions with a time bound

mod assertions;
mod mocks;

pub use assertions::{assert_closed_within, assert_open_after};
pub use mocks::{CountingEffector, ScriptedEffector, SlowEffector};
