//! Mock effectors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::Failure;
use crate::resilience::{Effector, EffectorResult};

/// An effector that fails its first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct ScriptedEffector<T> {
    value: T,
    failures: usize,
    partial: Option<T>,
    message: String,
    call_count: Mutex<usize>,
}

impl<T: Clone> ScriptedEffector<T> {
    /// Fails `failures` times with "intentional fail", then returns `value`.
    #[must_use]
    pub fn failing_then(value: T, failures: usize) -> Self {
        Self {
            value,
            failures,
            partial: None,
            message: "intentional fail".to_string(),
            call_count: Mutex::new(0),
        }
    }

    /// Attaches a partial result to every failure.
    #[must_use]
    pub fn with_partial(mut self, partial: T) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Sets the upstream error message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Returns the number of times the effector was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Effector for ScriptedEffector<T> {
    type Output = T;

    async fn call(&self, _token: &CancellationToken) -> EffectorResult<T> {
        let previous = {
            let mut count = self.call_count.lock();
            *count += 1;
            *count - 1
        };

        if previous >= self.failures {
            return Ok(self.value.clone());
        }
        let error = anyhow::Error::msg(self.message.clone());
        Err(match &self.partial {
            Some(partial) => Failure::upstream_with(error, partial.clone()),
            None => Failure::upstream(error),
        })
    }
}

/// An effector that always succeeds.
#[derive(Debug)]
pub struct CountingEffector<T> {
    value: T,
    call_count: Mutex<usize>,
}

impl<T: Clone> CountingEffector<T> {
    /// Creates an effector returning `value` on every call.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            call_count: Mutex::new(0),
        }
    }

    /// Returns the number of times the effector was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Effector for CountingEffector<T> {
    type Output = T;

    async fn call(&self, _token: &CancellationToken) -> EffectorResult<T> {
        *self.call_count.lock() += 1;
        Ok(self.value.clone())
    }
}

/// An effector that takes `delay` to succeed, or stops early on cancellation.
#[derive(Debug)]
pub struct SlowEffector<T> {
    delay: Duration,
    value: T,
}

impl<T: Clone> SlowEffector<T> {
    /// Creates a slow effector.
    #[must_use]
    pub const fn new(delay: Duration, value: T) -> Self {
        Self { delay, value }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Effector for SlowEffector<T> {
    type Output = T;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<T> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(Failure::cancelled(token.reason().unwrap_or_default())),
            () = tokio::time::sleep(self.delay) => Ok(self.value.clone()),
        }
    }
}
