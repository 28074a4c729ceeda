//! Bounded retry with configurable backoff and jitter.
//!
//! Attempts run strictly one after another. After `max_retries + 1` failed
//! attempts the last failure is returned verbatim. The wait between attempts
//! races the caller's token; cancellation ends the loop with
//! [`EffectorError::Cancelled`](crate::errors::EffectorError::Cancelled).

use super::{millis, millis_ceil, Effector, EffectorResult};
use crate::cancellation::CancellationToken;
use crate::errors::Failure;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base (constant)
    #[default]
    Constant,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base * 2^retry
    Exponential,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts in milliseconds.
    pub delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
            max_delay_ms: 30000,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_delay_ms(mut self, delay: u64) -> Self {
        self.delay_ms = delay;
        self
    }

    /// Sets the base delay from a duration, rounded up to whole milliseconds.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_ms(millis_ceil(delay))
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Calculates the wait before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.delay_ms;
        let max = self.max_delay_ms.max(base);

        let delay = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX))
            }
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=delay - half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Re-invokes the wrapped effector until it succeeds or the budget runs out.
#[derive(Debug)]
pub struct Retry<E> {
    inner: E,
    config: RetryConfig,
}

impl<E> Retry<E> {
    /// Wraps `inner` with the given config.
    pub const fn new(inner: E, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the config.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<E: Effector> Effector for Retry<E> {
    type Output = E::Output;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<Self::Output> {
        let mut retry = 0;
        loop {
            let delay = match self.inner.call(token).await {
                Ok(value) => return Ok(value),
                Err(failure) if retry >= self.config.max_retries => {
                    debug!(attempts = retry + 1, error = %failure, "Retries exhausted");
                    return Err(failure);
                }
                Err(failure) => {
                    let delay = self.config.delay_for(retry);
                    debug!(
                        attempt = retry + 1,
                        delay_ms = millis(delay),
                        error = %failure,
                        "Attempt failed; retrying"
                    );
                    delay
                }
            };

            tokio::select! {
                biased;
                () = token.cancelled() => {
                    return Err(Failure::cancelled(token.reason().unwrap_or_default()));
                }
                () = tokio::time::sleep(delay) => {}
            }
            retry += 1;
        }
    }
}

/// Wraps `effector` in a constant-delay retry loop.
pub fn retry<E: Effector>(effector: E, max_retries: u32, delay: Duration) -> Retry<E> {
    Retry::new(
        effector,
        RetryConfig::new()
            .with_max_retries(max_retries)
            .with_delay(delay)
            .with_max_delay_ms(u64::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEffector;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.delay_ms, 1000);
        assert_eq!(config.backoff, BackoffStrategy::Constant);
        assert_eq!(config.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_delay_constant_no_jitter() {
        let config = RetryConfig::new().with_delay_ms(100);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_linear_and_exponential() {
        let linear = RetryConfig::new()
            .with_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let exponential = RetryConfig::new()
            .with_delay_ms(100)
            .with_backoff(BackoffStrategy::Exponential);
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_backoff(BackoffStrategy::Exponential);

        assert_eq!(config.delay_for(10), Duration::from_millis(5000));
        assert_eq!(config.delay_for(90), Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_full_jitter_in_range() {
        let config = RetryConfig::new()
            .with_delay_ms(100)
            .with_jitter(JitterStrategy::Full);

        for _ in 0..20 {
            assert!(config.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_delay_equal_jitter_in_range() {
        let config = RetryConfig::new()
            .with_delay_ms(101)
            .with_jitter(JitterStrategy::Equal);

        for _ in 0..20 {
            let delay = config.delay_for(0);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(101));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_scenario() {
        let downstream = Arc::new(ScriptedEffector::failing_then("success", 3));
        let retried = retry(downstream.clone(), 5, Duration::from_secs(2));
        let token = CancellationToken::new();
        let start = Instant::now();

        assert_eq!(retried.call(&token).await.unwrap(), "success");

        assert_eq!(downstream.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_failure_verbatim() {
        let downstream = Arc::new(
            ScriptedEffector::failing_then(0u8, usize::MAX)
                .with_partial(42)
                .with_message("500 Service unavailable"),
        );
        let retried = retry(downstream.clone(), 2, Duration::from_millis(10));
        let token = CancellationToken::new();

        let failure = retried.call(&token).await.unwrap_err();

        assert_eq!(downstream.calls(), 3);
        assert!(failure.is_upstream());
        assert_eq!(failure.to_string(), "500 Service unavailable");
        assert_eq!(failure.partial, Some(42));
    }

    #[test]
    fn test_with_delay_rounds_up_to_whole_millis() {
        assert_eq!(RetryConfig::new().with_delay(Duration::from_micros(900)).delay_ms, 1);
        assert_eq!(RetryConfig::new().with_delay(Duration::from_micros(1900)).delay_ms, 2);
        assert_eq!(RetryConfig::new().with_delay(Duration::ZERO).delay_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_millisecond_delay_still_waits() {
        let downstream = Arc::new(ScriptedEffector::failing_then(1u8, 3));
        let retried = retry(downstream.clone(), 5, Duration::from_micros(900));
        let start = Instant::now();

        assert_eq!(retried.call(&CancellationToken::new()).await.unwrap(), 1);
        assert_eq!(downstream.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let downstream = Arc::new(ScriptedEffector::failing_then((), 1));
        let retried = retry(downstream.clone(), 0, Duration::from_secs(1));

        assert!(retried.call(&CancellationToken::new()).await.is_err());
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let downstream = Arc::new(ScriptedEffector::failing_then("late", 3));
        let retried = retry(downstream.clone(), 5, Duration::from_secs(60));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("deadline");
        });

        let start = Instant::now();
        let failure = retried.call(&token).await.unwrap_err();

        assert!(failure.is_cancelled());
        assert_eq!(failure.to_string(), "cancelled: deadline");
        assert_eq!(downstream.calls(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try_no_wait() {
        let downstream = Arc::new(ScriptedEffector::failing_then(5, 0));
        let retried = retry(downstream.clone(), 3, Duration::from_secs(1));
        let start = Instant::now();

        assert_eq!(retried.call(&CancellationToken::new()).await.unwrap(), 5);
        assert_eq!(downstream.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
