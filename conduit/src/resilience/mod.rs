//! Resilience decorators for fallible operations.
//!
//! An [`Effector`] is an opaque, fallible unit of work that observes a
//! cancellation token. Decorators wrap an effector and are effectors
//! themselves, so they compose in any order:
//!
//! ```rust,ignore
//! let guarded = remote_call
//!     .with_throttle(ThrottleConfig::new().with_max(10))?
//!     .with_circuit_breaker(BreakerConfig::new().with_failure_threshold(3))
//!     .with_retry(RetryConfig::new().with_max_retries(2));
//! let value = guarded.call(&token).await?;
//! ```
//!
//! Decorator state is private to each instance and guarded by short-held
//! locks that are never held across a call to the wrapped effector.

mod breaker;
mod retry;
mod throttle;


pub use breaker::{breaker, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retry::{retry, BackoffStrategy, JitterStrategy, Retry, RetryConfig};
pub use throttle::{throttle, Throttle, ThrottleConfig};

use crate::cancellation::CancellationToken;
use crate::errors::{ConfigError, Failure};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Converts `duration` to whole milliseconds, rounding any fraction up.
pub(crate) fn millis_ceil(duration: Duration) -> u64 {
    let partial = duration.subsec_nanos() % 1_000_000 != 0;
    u64::try_from(duration.as_millis() + u128::from(partial)).unwrap_or(u64::MAX)
}

/// Converts `duration` to whole milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of an effector call.
pub type EffectorResult<T> = Result<T, Failure<T>>;

/// A fallible operation that observes a cancellation token.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Effector: Send + Sync {
    /// The value produced on success.
    type Output: Send + 'static;

    /// Performs the operation.
    async fn call(&self, token: &CancellationToken) -> EffectorResult<Self::Output>;
}

#[async_trait]
impl<E> Effector for Arc<E>
where
    E: Effector + ?Sized,
{
    type Output = E::Output;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<Self::Output> {
        (**self).call(token).await
    }
}

/// An effector backed by an async closure.
pub struct FnEffector<F> {
    func: F,
}

impl<F> FnEffector<F> {
    /// Wraps `func`, which receives a clone of the caller's token.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> std::fmt::Debug for FnEffector<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnEffector").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, T> Effector for FnEffector<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = EffectorResult<T>> + Send,
    T: Send + 'static,
{
    type Output = T;

    async fn call(&self, token: &CancellationToken) -> EffectorResult<T> {
        (self.func)(token.clone()).await
    }
}

/// Builds an effector from an async closure.
pub fn effector_fn<F, Fut, T>(func: F) -> FnEffector<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = EffectorResult<T>> + Send,
    T: Send + 'static,
{
    FnEffector::new(func)
}

/// Decorator combinators available on every effector.
pub trait EffectorExt: Effector + Sized {
    /// Wraps `self` in a circuit breaker.
    fn with_circuit_breaker(self, config: BreakerConfig) -> CircuitBreaker<Self> {
        CircuitBreaker::new(self, config)
    }

    /// Wraps `self` in a retry loop.
    fn with_retry(self, config: RetryConfig) -> Retry<Self> {
        Retry::new(self, config)
    }

    /// Wraps `self` in a token-bucket throttle.
    fn with_throttle(self, config: ThrottleConfig) -> Result<Throttle<Self>, ConfigError> {
        Throttle::new(self, config)
    }
}

impl<E: Effector> EffectorExt for E {}
