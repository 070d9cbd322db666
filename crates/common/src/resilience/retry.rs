//! Retry strategies and the generic retry executor
//!
//! A [`RetryStrategy`] bundles the retry budget (`max_retries`), the backoff
//! bounds and an overall `timeout`. Three canonical profiles cover the
//! service's call sites; custom strategies are validated on construction.
//!
//! The executor consults a [`RetryPolicy`] after every failure, sleeps the
//! [`BackoffScheduler`] delay (clamped to the remaining timeout) and reports
//! what happened in a [`RetryOutcome`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::backoff::BackoffScheduler;
use super::error::{ConfigError, ConfigResult};

/// Retry budget and backoff bounds for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Overall budget for the whole sequence
    pub timeout: Duration,
}

impl RetryStrategy {
    /// User-facing reads and writes whose result must be observed quickly
    pub const CRITICAL: Self = Self {
        max_retries: 8,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(4),
        timeout: Duration::from_secs(30),
    };

    /// Default for outbound API calls and record updates
    pub const STANDARD: Self = Self {
        max_retries: 5,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(8),
        timeout: Duration::from_secs(30),
    };

    /// Periodic jobs that can afford to wait
    pub const BACKGROUND: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(30),
        timeout: Duration::from_secs(60),
    };

    /// Create a validated custom strategy
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        timeout: Duration,
    ) -> ConfigResult<Self> {
        let strategy = Self { max_retries, base_delay, max_delay, timeout };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Validate the strategy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must not be smaller than base_delay"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Jittered delay before retry number `attempt` (first retry = 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        BackoffScheduler::delay(attempt, self.base_delay, self.max_delay)
    }

    /// Same strategy with a different retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Same strategy with a different overall timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    AttemptsExhausted { attempts: u32, source: E },

    /// The policy declined to retry this error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },

    /// The strategy timeout elapsed before an attempt succeeded
    #[error("Retry timeout exceeded after {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration, last_error: Option<E> },
}

impl<E> RetryError<E> {
    /// The last operation error, if one was observed
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::AttemptsExhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::TimeoutExceeded { last_error, .. } => last_error,
        }
    }

    /// Borrow the last operation error, if one was observed
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::AttemptsExhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::TimeoutExceeded { last_error, .. } => last_error.as_ref(),
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including result and summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
    pub timed_out: bool,
    pub elapsed: Duration,
    /// Human-readable representation of the last error that occurred
    pub last_error: Option<String>,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }

    /// Average delay between attempts
    pub fn average_delay(&self) -> Duration {
        if self.attempts <= 1 {
            return Duration::ZERO;
        }
        self.total_delay / (self.attempts - 1)
    }
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide after the `attempt`-th failure (first failure = 1)
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the strategy's backoff delay
    Retry,
    /// Retry after a specific delay (still capped by the timeout)
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// The retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    strategy: RetryStrategy,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a retry executor for the given strategy and policy
    pub fn new(strategy: RetryStrategy, policy: P) -> Self {
        Self { strategy, policy }
    }

    /// Create with the STANDARD profile
    pub fn with_policy(policy: P) -> Self {
        Self::new(RetryStrategy::STANDARD, policy)
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Execute an operation with retry logic
    #[instrument(skip(self, operation), fields(max_retries = self.strategy.max_retries))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an operation with retry logic and return outcome statistics
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let deadline = started + self.strategy.timeout;
        let mut attempts = 0_u32;
        let mut total_delay = Duration::ZERO;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "operation succeeded after retries");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_delay,
                        timed_out: false,
                        elapsed: started.elapsed(),
                        last_error: None,
                    };
                }
                Err(error) => error,
            };
            let last_error = error.to_string();
            let failed = |result: RetryError<E>| RetryOutcome {
                timed_out: matches!(result, RetryError::TimeoutExceeded { .. }),
                result: Err(result),
                attempts,
                total_delay,
                elapsed: started.elapsed(),
                last_error: Some(last_error),
            };

            let delay = match self.policy.should_retry(&error, attempts) {
                RetryDecision::Stop => {
                    debug!(attempts, error = %error, "retry policy declined to retry");
                    return failed(RetryError::NonRetryable { source: error });
                }
                _ if attempts > self.strategy.max_retries => {
                    warn!(attempts, error = %error, "all retry attempts exhausted");
                    return failed(RetryError::AttemptsExhausted { attempts, source: error });
                }
                RetryDecision::Retry => self.strategy.delay_for(attempts),
                RetryDecision::RetryAfter(delay) => delay,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let elapsed = started.elapsed();
                warn!(attempts, elapsed_ms = elapsed.as_millis(), "retry timeout exceeded");
                return failed(RetryError::TimeoutExceeded { elapsed, last_error: Some(error) });
            }
            drop(failed);

            let delay = delay.min(remaining);
            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis(),
                error = %error,
                "operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}

/// Retry `operation` under `strategy`, consulting `policy` after each failure
pub async fn retry_with_strategy<F, Fut, T, E, P>(
    strategy: RetryStrategy,
    policy: P,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
    E: fmt::Display,
{
    RetryExecutor::new(strategy, policy).execute(operation).await
}

/// Retry only errors that classify themselves as transient
pub async fn retry_transient<F, Fut, T, E>(
    strategy: RetryStrategy,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + crate::error::ErrorClassification,
{
    retry_with_strategy(strategy, policies::TransientOnly, operation).await
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};
    use crate::error::ErrorClassification;

    /// Retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries while the predicate returns true
    #[derive(Debug)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Retries errors whose classification says they are transient,
    /// honouring any suggested retry-after
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TransientOnly;

    impl<E: ErrorClassification> RetryPolicy<E> for TransientOnly {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) if !delay.is_zero() => RetryDecision::RetryAfter(delay),
                _ => RetryDecision::Retry,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry strategies and policies.
    //!
    //! Timing tests run on a paused tokio clock.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::policies::*;
    use super::*;
    use crate::error::{ErrorClassification, ErrorSeverity};

    #[derive(Debug, Error)]
    enum FeedError {
        #[error("feed timed out")]
        Timeout,
        #[error("feed returned {0}")]
        Status(u16),
        #[error("feed throttled")]
        Throttled(Duration),
        #[error("feed down")]
        Down,
    }

    impl ErrorClassification for FeedError {
        fn is_retryable(&self) -> bool {
            match self {
                Self::Timeout | Self::Throttled(_) => true,
                Self::Status(status) => *status >= 500,
                Self::Down => false,
            }
        }

        fn severity(&self) -> ErrorSeverity {
            ErrorSeverity::Warning
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::Throttled(delay) => Some(*delay),
                _ => None,
            }
        }
    }

    fn quick(max_retries: u32) -> RetryStrategy {
        RetryStrategy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_profiles_are_valid_and_ordered() {
        for profile in [RetryStrategy::CRITICAL, RetryStrategy::STANDARD, RetryStrategy::BACKGROUND]
        {
            profile.validate().unwrap();
        }
        assert!(RetryStrategy::CRITICAL.base_delay < RetryStrategy::STANDARD.base_delay);
        assert!(RetryStrategy::STANDARD.base_delay < RetryStrategy::BACKGROUND.base_delay);
        assert_eq!(RetryStrategy::default(), RetryStrategy::STANDARD);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let inverted = RetryStrategy::new(
            3,
            Duration::from_secs(2),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        assert!(inverted.is_err());
        assert!(RetryStrategy::new(3, Duration::ZERO, Duration::ZERO, Duration::ZERO).is_err());
    }

    /// Validates success after transient failures.
    ///
    /// Assertions:
    /// - the operation runs three times
    /// - two backoff sleeps were taken
    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let outcome = RetryExecutor::new(quick(5), AlwaysRetry)
            .execute_with_outcome(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FeedError::Timeout)
                } else {
                    Ok("quotes")
                }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.total_delay >= Duration::from_millis(80 + 160));
        assert_eq!(outcome.result.unwrap(), "quotes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let result = retry_with_strategy(quick(2), AlwaysRetry, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FeedError::Status(503))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::AttemptsExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, FeedError::Status(503)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_only_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(quick(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FeedError::Status(404))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_only_honours_retry_after() {
        let calls = AtomicU32::new(0);
        let outcome = RetryExecutor::new(quick(1), TransientOnly)
            .execute_with_outcome(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FeedError::Throttled(Duration::from_millis(700)))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.total_delay, Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_the_sequence() {
        let strategy = RetryStrategy::new(
            100,
            Duration::from_millis(400),
            Duration::from_millis(400),
            Duration::from_secs(1),
        )
        .unwrap();
        let started = Instant::now();
        let outcome = RetryExecutor::new(strategy, AlwaysRetry)
            .execute_with_outcome(|| async { Err::<(), _>(FeedError::Down) })
            .await;

        assert!(outcome.timed_out);
        assert!(matches!(outcome.result, Err(RetryError::TimeoutExceeded { .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(outcome.last_error.as_deref(), Some("feed down"));
    }

    #[tokio::test]
    async fn test_predicate_policy() {
        let calls = AtomicU32::new(0);
        let policy = PredicateRetry::new(|_: &FeedError, attempt| attempt < 2);
        let strategy = quick(5).with_timeout(Duration::from_secs(5));
        let result = retry_with_strategy(strategy, policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FeedError::Down)
        })
        .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_retry_runs_once() {
        let calls = AtomicU32::new(0);
        let result = retry_with_strategy(quick(5), NeverRetry, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FeedError::Down)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().into_source().is_some());
    }

    #[test]
    fn test_average_delay() {
        let outcome: RetryOutcome<(), FeedError> = RetryOutcome {
            result: Ok(()),
            attempts: 3,
            total_delay: Duration::from_millis(300),
            timed_out: false,
            elapsed: Duration::from_millis(300),
            last_error: None,
        };
        assert_eq!(outcome.average_delay(), Duration::from_millis(150));
    }
}
