//! Conversions from infrastructure errors into domain errors.

use std::time::Duration;

use marketpulse_common::error::{ErrorClassification, ErrorSeverity};
use marketpulse_common::resilience::ResilienceError;
use marketpulse_domain::MarketPulseError;
use reqwest::StatusCode;
use thiserror::Error;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub MarketPulseError);

impl From<InfraError> for MarketPulseError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<MarketPulseError> for InfraError {
    fn from(value: MarketPulseError) -> Self {
        Self(value)
    }
}

/* -------------------------------------------------------------------------- */
/* Upstream HTTP failures */
/* -------------------------------------------------------------------------- */

/// Failure of a single upstream HTTP request
#[derive(Debug, Error)]
pub enum HttpError {
    /// Non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String, retry_after: Option<Duration> },

    /// Connection failure or client-side timeout
    #[error("HTTP transport failure: {0}")]
    Transport(String),

    /// Body was not the expected JSON
    #[error("HTTP response could not be decoded: {0}")]
    Decode(String),

    /// Request could not be built
    #[error("invalid HTTP request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    /// Build from a response status and the server's optional hint
    pub fn status(status: StatusCode, retry_after: Option<Duration>) -> Self {
        Self::Status {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown status").to_string(),
            retry_after,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if err.is_builder() {
            return Self::InvalidRequest(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::status(status, None);
        }
        Self::Transport(err.to_string())
    }
}

impl ErrorClassification for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Status { status: 429, .. } | Self::Transport(_) => ErrorSeverity::Warning,
            Self::Status { status, .. } if *status >= 500 => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Guarded HTTP failures → MarketPulseError */
/* -------------------------------------------------------------------------- */

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        let mapped = match value {
            HttpError::Status { status: 404, message, .. } => {
                MarketPulseError::NotFound(format!("HTTP 404 {message}"))
            }
            HttpError::Status { status: 429, message, .. } => {
                MarketPulseError::Unavailable(format!("HTTP 429 {message}"))
            }
            HttpError::Status { status, message, .. } if status >= 500 => {
                MarketPulseError::Unavailable(format!("HTTP {status} {message}"))
            }
            HttpError::Status { status, message, .. } => {
                MarketPulseError::InvalidInput(format!("HTTP {status} {message}"))
            }
            HttpError::Transport(message) => MarketPulseError::Network(message),
            HttpError::Decode(message) | HttpError::InvalidRequest(message) => {
                MarketPulseError::Internal(message)
            }
        };
        Self(mapped)
    }
}

impl From<ResilienceError<HttpError>> for InfraError {
    fn from(value: ResilienceError<HttpError>) -> Self {
        match value {
            ResilienceError::OperationFailed { source } => source.into(),
            ResilienceError::CircuitOpen { retry_after } => Self(MarketPulseError::Unavailable(
                format!("circuit open, retry in {}ms", retry_after.as_millis()),
            )),
            ResilienceError::RateLimitExceeded { retry_after, .. } => {
                Self(MarketPulseError::Unavailable(format!(
                    "rate limited, retry in {}ms",
                    retry_after.as_millis()
                )))
            }
            ResilienceError::Timeout { timeout } => Self(MarketPulseError::Timeout(format!(
                "upstream call exceeded {}ms",
                timeout.as_millis()
            ))),
            other @ (ResilienceError::GateClosed
            | ResilienceError::InvalidConfiguration { .. }) => {
                Self(MarketPulseError::Internal(other.to_string()))
            }
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
