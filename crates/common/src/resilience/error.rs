//! Error types shared by the resilience primitives

use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Simple configuration error for validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Typed rate-limit denial returned by [`SlidingWindowRateLimiter::check`]
///
/// [`SlidingWindowRateLimiter::check`]: super::SlidingWindowRateLimiter::check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: {max_requests} requests per {window:?} (retry in {retry_after:?})")]
pub struct RateLimitExceeded {
    /// Time until the oldest admission leaves the window
    pub retry_after: Duration,
    /// Limit in force when the request was denied
    pub max_requests: u32,
    /// Window in force when the request was denied
    pub window: Duration,
}

/// Errors that can occur in resilience operations
///
/// Generic over the wrapped operation's error type `E`, so the original
/// failure is preserved in `OperationFailed`.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open (retry in {retry_after:?})")]
    CircuitOpen { retry_after: Duration },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Rate limiter refused admission within the allowed wait
    #[error(
        "Rate limit exceeded: {max_requests} requests per {window:?} (retry in {retry_after:?})"
    )]
    RateLimitExceeded { retry_after: Duration, max_requests: u32, window: Duration },

    /// Concurrency gate was shut down while the call was queued
    #[error("Concurrency gate is closed")]
    GateClosed,

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wrap an operation error
    pub fn operation(source: E) -> Self {
        Self::OperationFailed { source }
    }

    /// True when this error was raised by a guard rather than the operation
    pub fn is_guard_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::RateLimitExceeded { .. } | Self::GateClosed
        )
    }

    /// Borrow the operation error, if any
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Extract the operation error, if any
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Map the wrapped operation error
    pub fn map_operation<F, G>(self, f: G) -> ResilienceError<F>
    where
        F: std::error::Error + Send + Sync + 'static,
        G: FnOnce(E) -> F,
    {
        match self {
            Self::CircuitOpen { retry_after } => ResilienceError::CircuitOpen { retry_after },
            Self::Timeout { timeout } => ResilienceError::Timeout { timeout },
            Self::RateLimitExceeded { retry_after, max_requests, window } => {
                ResilienceError::RateLimitExceeded { retry_after, max_requests, window }
            }
            Self::GateClosed => ResilienceError::GateClosed,
            Self::OperationFailed { source } => {
                ResilienceError::OperationFailed { source: f(source) }
            }
            Self::InvalidConfiguration { message } => {
                ResilienceError::InvalidConfiguration { message }
            }
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Collapse one level of nesting produced by stacking guards
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            Self::OperationFailed { source } => source,
            Self::CircuitOpen { retry_after } => ResilienceError::CircuitOpen { retry_after },
            Self::Timeout { timeout } => ResilienceError::Timeout { timeout },
            Self::RateLimitExceeded { retry_after, max_requests, window } => {
                ResilienceError::RateLimitExceeded { retry_after, max_requests, window }
            }
            Self::GateClosed => ResilienceError::GateClosed,
            Self::InvalidConfiguration { message } => {
                ResilienceError::InvalidConfiguration { message }
            }
        }
    }
}

impl<E> From<RateLimitExceeded> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(denial: RateLimitExceeded) -> Self {
        Self::RateLimitExceeded {
            retry_after: denial.retry_after,
            max_requests: denial.max_requests,
            window: denial.window,
        }
    }
}

impl<E> From<ConfigError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { message } => Self::InvalidConfiguration { message },
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::RateLimitExceeded { .. } => {
                true
            }
            Self::OperationFailed { source } => source.is_retryable(),
            Self::GateClosed | Self::InvalidConfiguration { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::RateLimitExceeded { .. } => {
                ErrorSeverity::Warning
            }
            Self::OperationFailed { source } => source.severity(),
            Self::GateClosed | Self::InvalidConfiguration { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::OperationFailed { source } if source.is_critical())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } | Self::RateLimitExceeded { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::OperationFailed { source } => source.retry_after(),
            _ => None,
        }
    }
}
