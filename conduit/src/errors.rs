//! Error types for conduit.
//!
//! Effectors fail with a [`Failure`], which pairs an [`EffectorError`] with
//! whatever partial result the failing call produced. Configuration problems
//! surface as [`ConfigError`].

use std::fmt;
use thiserror::Error;

/// Why an effector call failed.
#[derive(Debug, Error)]
pub enum EffectorError {
    /// The wrapped operation's own error, passed through unchanged.
    #[error(transparent)]
    Upstream(anyhow::Error),

    /// The circuit breaker is open and the call was not attempted.
    #[error("service unreachable: circuit open")]
    CircuitOpen,

    /// The throttle had no tokens left and the call was not attempted.
    #[error("too many calls: rate limited")]
    RateLimited,

    /// Cancellation fired before or during the call.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl EffectorError {
    /// Returns a short, stable name for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream",
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// A failed effector call.
///
/// `partial` holds the value the wrapped operation returned alongside its
/// error, if any. Decorators that short-circuit (circuit open, rate limited,
/// cancelled) never produce one.
pub struct Failure<T> {
    /// The error.
    pub error: EffectorError,
    /// Partial result produced by the failing call.
    pub partial: Option<T>,
}

impl<T> Failure<T> {
    /// Creates an upstream failure without a partial result.
    pub fn upstream(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: EffectorError::Upstream(error.into()),
            partial: None,
        }
    }

    /// Creates an upstream failure carrying a partial result.
    pub fn upstream_with(error: impl Into<anyhow::Error>, partial: T) -> Self {
        Self {
            error: EffectorError::Upstream(error.into()),
            partial: Some(partial),
        }
    }

    /// Creates a circuit-open failure.
    #[must_use]
    pub const fn circuit_open() -> Self {
        Self {
            error: EffectorError::CircuitOpen,
            partial: None,
        }
    }

    /// Creates a rate-limited failure.
    #[must_use]
    pub const fn rate_limited() -> Self {
        Self {
            error: EffectorError::RateLimited,
            partial: None,
        }
    }

    /// Creates a cancellation failure.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            error: EffectorError::Cancelled(reason.into()),
            partial: None,
        }
    }

    /// Returns true for an upstream failure.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self.error, EffectorError::Upstream(_))
    }

    /// Returns true if the circuit breaker rejected the call.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self.error, EffectorError::CircuitOpen)
    }

    /// Returns true if the throttle rejected the call.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self.error, EffectorError::RateLimited)
    }

    /// Returns true if cancellation ended the call.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.error, EffectorError::Cancelled(_))
    }

    /// Discards the partial result.
    #[must_use]
    pub fn into_error(self) -> EffectorError {
        self.error
    }
}

impl<T> From<EffectorError> for Failure<T> {
    fn from(error: EffectorError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

impl<T> fmt::Debug for Failure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("error", &self.error)
            .field("has_partial", &self.partial.is_some())
            .finish()
    }
}

impl<T> fmt::Display for Failure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T> std::error::Error for Failure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Invalid configuration or initialisation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration field has an unusable value.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("tracing initialisation failed: {0}")]
    Tracing(String),
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
