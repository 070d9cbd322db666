//! Resilience and consistency primitives
//!
//! Every outbound call and every tracked write goes through a small set of
//! composable guards:
//! - **SlidingWindowRateLimiter**: caps admissions per trailing window
//! - **CircuitBreaker**: stops calling a dependency that keeps failing
//! - **BoundedConcurrencyGate**: caps in-flight operations, FIFO queueing
//! - **BackoffScheduler**: exponential delays with ±20% jitter
//! - **ConsistencyWaiter**: polls until an eventually consistent read agrees
//! - **RetryExecutor**: retries driven by a [`RetryStrategy`] profile
//!
//! The guards are generic over the wrapped operation's error type and read
//! time through [`Clock`], so they can be tested on a paused tokio clock or a
//! [`MockClock`].
//!
//! ## Composition
//!
//! | Path | Order |
//! |------|-------|
//! | Outbound fetch | gate → breaker → limiter → call |
//! | Tracked write | optimistic update → consistency wait |
//!
//! The composed paths live in `marketpulse-core`; this module only provides
//! the building blocks.

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod concurrency_gate;
pub mod consistency;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use backoff::{BackoffScheduler, JITTER_FACTOR, MAX_BACKOFF_EXPONENT};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use concurrency_gate::{BoundedConcurrencyGate, ConcurrencyGateMetrics};
pub use consistency::{ConsistencyOutcome, ConsistencyWaiter};
pub use error::{
    ConfigError, ConfigResult, RateLimitExceeded, ResilienceError, ResilienceResult,
};
pub use rate_limiter::{RateLimiterConfig, SlidingWindowRateLimiter};
pub use retry::{
    policies, retry_transient, retry_with_strategy, RetryDecision, RetryError, RetryExecutor,
    RetryOutcome, RetryPolicy, RetryResult, RetryStrategy,
};
