//! Circuit breaker with exponential cooldown.
//!
//! The breaker stores only a failure counter and the time of the last
//! attempt. Whether the circuit is open is derived on every call from
//! `d = consecutive_failures - failure_threshold`:
//!
//! - `d < 0`: closed, the call proceeds
//! - `d >= 0`: open until `last_attempt + base_cooldown * 2^d` has passed,
//!   after which the next caller is let through as a probe
//!
//! A success resets the counter, a failure increments it, and every attempt
//! updates `last_attempt`.

use super::{millis, Effector, EffectorResult};
use crate::cancellation::CancellationToken;
use crate::errors::Failure;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures tolerated before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown after the first trip in milliseconds; doubles per extra failure.
    pub base_cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown_ms: 2000,
        }
    }
}

impl BreakerConfig {
    /// Creates a new breaker config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the base cooldown.
    #[must_use]
    pub const fn with_base_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.base_cooldown_ms = cooldown;
        self
    }

    /// Returns the base cooldown as a duration.
    #[must_use]
    pub const fn base_cooldown(&self) -> Duration {
        Duration::from_millis(self.base_cooldown_ms)
    }

    /// Cooldown for an overshoot of `d` failures past the threshold.
    #[must_use]
    pub fn cooldown(&self, overshoot: u32) -> Duration {
        let factor = 1u64.checked_shl(overshoot).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_cooldown_ms.saturating_mul(factor))
    }
}

/// Derived circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// Calls fail fast.
    Open,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
    /// Whether the next call would fail fast.
    pub state: CircuitState,
    /// Milliseconds until a probe is allowed, when open.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    last_attempt: Instant,
}

/// Fails fast after repeated consecutive failures of the wrapped effector.
#[derive(Debug)]
pub struct CircuitBreaker<E> {
    inner: E,
    config: BreakerConfig,
    state: RwLock<BreakerState>,
}

impl<E> CircuitBreaker<E> {
    /// Wraps `inner` with the given config.
    pub fn new(inner: E, config: BreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: RwLock::new(BreakerState {
                consecutive_failures: 0,
                last_attempt: Instant::now(),
            }),
        }
    }

    /// Returns the config.
    #[must_use]
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the wrapped effector.
    #[must_use]
    pub const fn inner(&self) -> &E {
        &self.inner
    }

    /// Returns how long the circuit stays open, or `None` if closed.
    fn open_for(&self, now: Instant) -> Option<Duration> {
        self.remaining(&self.state.read(), now)
    }

    fn remaining(&self, state: &BreakerState, now: Instant) -> Option<Duration> {
        let overshoot = state.consecutive_failures.checked_sub(self.config.failure_threshold)?;
        let cooldown = self.config.cooldown(overshoot);
        let elapsed = now.saturating_duration_since(state.last_attempt);
        if elapsed > cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }

    fn record(&self, succeeded: bool) {
        let mut state = self.state.write();
        state.last_attempt = Instant::now();
        if succeeded {
            state.consecutive_failures = 0;
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.config.failure_threshold {
            debug!(
                consecutive_failures = state.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit open"
            );
        }
    }

    /// Returns the current state without changing it.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.read();
        let remaining = self.remaining(&state, Instant::now());
        let consecutive_failures = state.consecutive_failures;
        drop(state);
        BreakerSnapshot {
            consecutive_failures,
            state: if remaining.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            retry_after_ms: remaining.map(millis),
        }
    }
}

#[async_trait]
impl<E: Effector> Effector for CircuitBreaker<E> {
    type Output = E::Output;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<Self::Output> {
        if let Some(remaining) = self.open_for(Instant::now()) {
            debug!(retry_after_ms = millis(remaining), "Circuit open, failing fast");
            return Err(Failure::circuit_open());
        }

        let result = self.inner.call(token).await;
        self.record(result.is_ok());
        result
    }
}

/// Wraps `effector` in a breaker with the default cooldown.
pub fn breaker<E: Effector>(effector: E, failure_threshold: u32) -> CircuitBreaker<E> {
    CircuitBreaker::new(
        effector,
        BreakerConfig::new().with_failure_threshold(failure_threshold),
    )
}
