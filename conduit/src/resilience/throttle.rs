//! Token-bucket throttle.

use super::{millis_ceil, Effector, EffectorResult};
use crate::cancellation::CancellationToken;
use crate::errors::{ConfigError, Failure};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Configuration for a throttle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Bucket capacity.
    pub max: u32,
    /// Tokens added every period, capped at `max`.
    pub refill_amount: u32,
    /// Refill period in milliseconds.
    pub refill_period_ms: u64,
    /// Whether the bucket starts with `max` tokens.
    pub start_full: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max: 5,
            refill_amount: 5,
            refill_period_ms: 1000,
            start_full: true,
        }
    }
}

impl ThrottleConfig {
    /// Creates a new throttle config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bucket capacity.
    #[must_use]
    pub const fn with_max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    /// Sets the tokens added per period.
    #[must_use]
    pub const fn with_refill_amount(mut self, amount: u32) -> Self {
        self.refill_amount = amount;
        self
    }

    /// Sets the refill period.
    #[must_use]
    pub const fn with_refill_period_ms(mut self, period: u64) -> Self {
        self.refill_period_ms = period;
        self
    }

    /// Sets whether the bucket starts full.
    #[must_use]
    pub const fn with_start_full(mut self, start_full: bool) -> Self {
        self.start_full = start_full;
        self
    }

    /// Returns the refill period as a duration.
    #[must_use]
    pub const fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }

    /// Checks that the config is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refill_period_ms == 0 {
            return Err(ConfigError::invalid(
                "refill_period_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: Mutex<u32>,
    max: u32,
    refill_amount: u32,
}

impl Bucket {
    fn try_acquire(&self) -> bool {
        let mut tokens = self.tokens.lock();
        if *tokens == 0 {
            return false;
        }
        *tokens -= 1;
        true
    }

    fn refill(&self) {
        let mut tokens = self.tokens.lock();
        *tokens = tokens.saturating_add(self.refill_amount).min(self.max);
    }
}

/// Limits the wrapped effector to a budget of calls per period.
///
/// The refill task starts on the first call and is tied to that caller's
/// token. It also ends once the throttle is dropped.
#[derive(Debug)]
pub struct Throttle<E> {
    inner: E,
    config: ThrottleConfig,
    bucket: Arc<Bucket>,
    refill_started: AtomicBool,
}

impl<E> Throttle<E> {
    /// Wraps `inner` with the given config.
    pub fn new(inner: E, config: ThrottleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let initial = if config.start_full { config.max } else { 0 };
        Ok(Self {
            inner,
            bucket: Arc::new(Bucket {
                tokens: Mutex::new(initial),
                max: config.max,
                refill_amount: config.refill_amount,
            }),
            config,
            refill_started: AtomicBool::new(false),
        })
    }

    /// Returns the config.
    #[must_use]
    pub const fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Returns the tokens currently in the bucket.
    #[must_use]
    pub fn available(&self) -> u32 {
        *self.bucket.tokens.lock()
    }

    fn ensure_refill(&self, token: &CancellationToken) {
        if self
            .refill_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let bucket: Weak<Bucket> = Arc::downgrade(&self.bucket);
        let token = token.clone();
        let period = self.config.refill_period();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(bucket) = bucket.upgrade() else { break };
                        bucket.refill();
                    }
                }
            }
            debug!("Throttle refill stopped");
        });
    }
}

#[async_trait]
impl<E: Effector> Effector for Throttle<E> {
    type Output = E::Output;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<Self::Output> {
        if token.is_cancelled() {
            return Err(Failure::cancelled(token.reason().unwrap_or_default()));
        }

        self.ensure_refill(token);
        if !self.bucket.try_acquire() {
            debug!(max = self.config.max, "Throttle exhausted, rejecting call");
            return Err(Failure::rate_limited());
        }

        self.inner.call(token).await
    }
}

/// Wraps `effector` in a throttle that starts full.
///
/// `refill_period` is rounded up to whole milliseconds.
pub fn throttle<E: Effector>(
    effector: E,
    max: u32,
    refill_amount: u32,
    refill_period: Duration,
) -> Result<Throttle<E>, ConfigError> {
    Throttle::new(
        effector,
        ThrottleConfig::new()
            .with_max(max)
            .with_refill_amount(refill_amount)
            .with_refill_period_ms(millis_ceil(refill_period)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingEffector;

    const PERIOD: Duration = Duration::from_secs(1);

    #[test]
    fn test_zero_period_rejected() {
        let err = Throttle::new(
            CountingEffector::new(()),
            ThrottleConfig::new().with_refill_period_ms(0),
        )
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::invalid("refill_period_ms", "must be greater than zero")
        );
    }

    #[test]
    fn test_sub_millisecond_period_accepted() {
        let throttled = throttle(CountingEffector::new(()), 5, 5, Duration::from_micros(500)).unwrap();
        assert_eq!(throttled.config().refill_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_fractional_period_rounds_up() {
        let throttled = throttle(CountingEffector::new(()), 5, 5, Duration::from_micros(1900)).unwrap();
        assert_eq!(throttled.config().refill_period(), Duration::from_millis(2));
    }

    #[test]
    fn test_start_empty() {
        let throttled = Throttle::new(
            CountingEffector::new(()),
            ThrottleConfig::new().with_start_full(false),
        )
        .unwrap();
        assert_eq!(throttled.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_scenario() {
        let downstream = Arc::new(CountingEffector::new("ok"));
        let throttled = throttle(downstream.clone(), 5, 5, PERIOD).unwrap();
        let token = CancellationToken::new();

        for _ in 0..5 {
            assert_eq!(throttled.call(&token).await.unwrap(), "ok");
        }
        let rejected = throttled.call(&token).await.unwrap_err();
        assert!(rejected.is_rate_limited());
        assert_eq!(rejected.to_string(), "too many calls: rate limited");
        assert_eq!(downstream.calls(), 5);

        tokio::time::sleep(PERIOD + Duration::from_millis(1)).await;
        assert_eq!(throttled.call(&token).await.unwrap(), "ok");
        assert_eq!(downstream.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_capped_at_max() {
        let throttled = throttle(CountingEffector::new(1), 3, 2, PERIOD).unwrap();
        let token = CancellationToken::new();

        assert!(throttled.call(&token).await.is_ok());
        tokio::time::sleep(PERIOD * 5 + Duration::from_millis(1)).await;
        assert_eq!(throttled.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_calls_start_one_refill_task() {
        let throttled = Arc::new(
            Throttle::new(
                CountingEffector::new(()),
                ThrottleConfig::new()
                    .with_max(10)
                    .with_refill_amount(1)
                    .with_start_full(false),
            )
            .unwrap(),
        );
        let token = CancellationToken::new();

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let throttled = throttled.clone();
                let token = token.clone();
                tokio::spawn(async move { throttled.call(&token).await })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().unwrap_err().is_rate_limited());
        }

        tokio::time::sleep(PERIOD + Duration::from_millis(1)).await;
        assert_eq!(throttled.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_refill() {
        let throttled = Throttle::new(
            CountingEffector::new(()),
            ThrottleConfig::new().with_start_full(false),
        )
        .unwrap();
        let token = CancellationToken::new();

        assert!(throttled.call(&token).await.unwrap_err().is_rate_limited());
        token.cancel("shutdown");

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(throttled.available(), 0);
        assert!(throttled.call(&token).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_fired_token_rejected_without_consuming() {
        let downstream = Arc::new(CountingEffector::new(()));
        let throttled = throttle(downstream.clone(), 5, 5, PERIOD).unwrap();
        let token = CancellationToken::new();
        token.cancel("gone");

        let failure = throttled.call(&token).await.unwrap_err();
        assert_eq!(failure.to_string(), "cancelled: gone");
        assert_eq!(throttled.available(), 5);
        assert_eq!(downstream.calls(), 0);
    }
}
