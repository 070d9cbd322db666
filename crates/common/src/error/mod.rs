//! Error classification shared across MarketPulse crates
//!
//! Each crate owns its error enums. What they share is a way to be asked
//! whether a failure is worth retrying, how loudly to log it and how long
//! the caller should wait first:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use marketpulse_common::error::{ErrorClassification, ErrorSeverity};
//!
//! #[derive(Debug)]
//! enum FeedError {
//!     UnknownTicker,
//!     Throttled(Duration),
//! }
//!
//! impl ErrorClassification for FeedError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Throttled(_))
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         match self {
//!             Self::UnknownTicker => ErrorSeverity::Info,
//!             Self::Throttled(_) => ErrorSeverity::Warning,
//!         }
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         match self {
//!             Self::Throttled(delay) => Some(*delay),
//!             Self::UnknownTicker => None,
//!         }
//!     }
//! }
//!
//! let throttled = FeedError::Throttled(Duration::from_secs(1));
//! assert_eq!(throttled.retry_after(), Some(Duration::from_secs(1)));
//! assert!(!FeedError::UnknownTicker.is_critical());
//! ```
//!
//! Retry helpers in [`crate::resilience`] consult `is_retryable` and
//! `retry_after`; `severity` picks the log level.

use std::fmt;
use std::time::Duration;

/// Uniform questions every MarketPulse error can answer
pub trait ErrorClassification {
    /// Transient failure that may succeed on a later attempt
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// Needs immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Delay the failing side asked for, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected outcome, debugging only
    Info,
    /// Transient trouble worth watching
    Warning,
    /// Failed operation that needs action
    Error,
    /// Broken invariant
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ErrorSeverity);

    impl ErrorClassification for Fixed {
        fn is_retryable(&self) -> bool {
            false
        }

        fn severity(&self) -> ErrorSeverity {
            self.0
        }
    }

    #[test]
    fn test_defaults_follow_severity() {
        assert!(Fixed(ErrorSeverity::Critical).is_critical());
        assert!(!Fixed(ErrorSeverity::Error).is_critical());
        assert_eq!(Fixed(ErrorSeverity::Warning).retry_after(), None);
    }

    #[test]
    fn test_severity_order_and_display() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }
}
