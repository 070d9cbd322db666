//! Circuit breaker for flaky upstream dependencies
//!
//! State machine:
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ───────────────────────────────▶ OPEN
//!     ▲                                      │ now >= next_attempt_at
//!     │ successes >= success_threshold       ▼
//!     └────────────────────────────────── HALF_OPEN
//!                 any failure ──▶ OPEN (new next_attempt_at)
//! ```
//!
//! All bookkeeping lives behind one mutex that is only held for short,
//! synchronous sections; the wrapped operation always runs outside the lock.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing trial requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) before opening the circuit
    pub failure_threshold: u32,
    /// Successes needed while half-open to close the circuit
    pub success_threshold: u32,
    /// Time to stay open before allowing a trial call
    pub timeout: Duration,
    /// Trial calls allowed in flight while half-open
    ///
    /// Unlimited by default. With a cap, calls beyond it are rejected with
    /// `CircuitOpen { retry_after: 0 }` while the breaker stays HALF_OPEN.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_calls: u32::MAX,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Attach a custom clock and build a breaker directly
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_in_flight: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub next_attempt_at: Option<Instant>,
    pub state_changed_at: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    half_open_in_flight: u32,
    total_calls: u64,
    rejected_calls: u64,
    state_changed_at: Instant,
    /// Bumped on every transition so results from an earlier phase are ignored
    generation: u64,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.state_changed_at = now;
        self.generation = self.generation.wrapping_add(1);
        self.half_open_in_flight = 0;
    }
}

/// How a finished call should be accounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Error that is not the dependency's fault; frees the slot only
    Neutral,
}

/// Generic circuit breaker
///
/// Clones share state, so one breaker can be handed to every caller of a
/// dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &metrics.state)
            .field("failure_count", &metrics.failure_count)
            .field("success_count", &metrics.success_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker on the tokio clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            name: Arc::from("default"),
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
                half_open_in_flight: 0,
                total_calls: 0,
                rejected_calls: 0,
                state_changed_at: now,
                generation: 0,
            })),
            clock: Arc::new(clock),
        })
    }

    /// Label used in log events
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a call or report how long until one could be admitted
    ///
    /// Moves OPEN to HALF_OPEN once the open timeout has elapsed.
    fn admit(&self) -> Result<CallPermit<'_, C>, Duration> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let next = inner.next_attempt_at.unwrap_or(now);
            if now < next {
                inner.rejected_calls += 1;
                return Err(next - now);
            }
            inner.transition(CircuitState::HalfOpen, now);
            inner.success_count = 0;
            info!(breaker = %self.name, "circuit breaker half-open, allowing trial call");
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.rejected_calls += 1;
                return Err(Duration::ZERO);
            }
            inner.half_open_in_flight += 1;
        }

        inner.total_calls += 1;
        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            trial: inner.state == CircuitState::HalfOpen,
            settled: false,
        })
    }

    fn settle(&self, generation: u64, trial: bool, outcome: Outcome) {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.generation != generation {
            debug!(breaker = %self.name, ?outcome, "ignoring result from an earlier breaker phase");
            return;
        }
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match (inner.state, outcome) {
            (_, Outcome::Neutral) | (CircuitState::Open, _) => {}
            (CircuitState::Closed, Outcome::Success) => inner.failure_count = 0,
            (CircuitState::Closed, Outcome::Failure) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open, now);
                    inner.next_attempt_at = Some(now + self.config.timeout);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        timeout_ms = self.config.timeout.as_millis(),
                        "circuit breaker opened"
                    );
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed, now);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.transition(CircuitState::Open, now);
                inner.success_count = 0;
                inner.next_attempt_at = Some(now + self.config.timeout);
                warn!(breaker = %self.name, "circuit breaker reopened after failed trial call");
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Every error returned by the operation counts as a failure.
    #[instrument(skip(self, operation), fields(breaker = %self.name, state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Execute an operation, letting `counts_as_failure` decide which errors
    /// are charged to the dependency
    ///
    /// Errors classified as not the dependency's fault are still returned to
    /// the caller but leave the failure and success counters untouched.
    pub async fn execute_classified<F, Fut, T, E, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        P: FnOnce(&E) -> bool,
    {
        let permit = match self.admit() {
            Ok(permit) => permit,
            Err(retry_after) => {
                debug!(
                    breaker = %self.name,
                    retry_after_ms = retry_after.as_millis(),
                    "circuit breaker rejected call"
                );
                return Err(ResilienceError::CircuitOpen { retry_after });
            }
        };

        match operation().await {
            Ok(value) => {
                permit.finish(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                let outcome =
                    if counts_as_failure(&error) { Outcome::Failure } else { Outcome::Neutral };
                debug!(
                    breaker = %self.name,
                    error = %error,
                    ?outcome,
                    "circuit breaker recorded error"
                );
                permit.finish(outcome);
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(breaker = %self.name, state = %self.state()))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit =
            self.admit().map_err(|retry_after| ResilienceError::CircuitOpen { retry_after })?;
        match operation() {
            Ok(value) => {
                permit.finish(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                permit.finish(Outcome::Failure);
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Current state as last recorded
    ///
    /// An OPEN breaker whose timeout has elapsed still reports OPEN until the
    /// next call moves it to HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// True unless the breaker would reject a call right now
    pub fn is_available(&self) -> bool {
        self.retry_after().is_zero()
    }

    /// Time until the breaker admits calls again; zero when not open
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.lock();
        match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(next)) => next.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_in_flight: inner.half_open_in_flight,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            next_attempt_at: inner.next_attempt_at,
            state_changed_at: inner.state_changed_at,
        }
    }

    /// Force the breaker back to CLOSED with cleared counters
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.transition(CircuitState::Closed, now);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.next_attempt_at = None;
        info!(breaker = %self.name, "circuit breaker reset");
    }
}

/// Admission ticket for one call
///
/// Dropping an unfinished permit (for example when the caller's future is
/// cancelled) releases its half-open slot without recording an outcome.
struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    fn finish(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, outcome);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, self.trial, Outcome::Neutral);
        }
    }
}
