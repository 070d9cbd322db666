//! Shared building blocks for MarketPulse crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error taxonomy and classification
//! - `runtime`: async resilience and consistency primitives
//! - `observability`: tracing support (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffScheduler, BoundedConcurrencyGate, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, Clock, ConsistencyOutcome, ConsistencyWaiter, MockClock, RateLimitExceeded,
    ResilienceError, ResilienceResult, RetryStrategy, SlidingWindowRateLimiter, SystemClock,
};
