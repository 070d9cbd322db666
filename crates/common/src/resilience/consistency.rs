//! Polling for read-your-writes on an eventually consistent store
//!
//! [`ConsistencyWaiter`] evaluates a caller-supplied predicate until it holds,
//! the retry budget is spent, or the strategy timeout elapses. "Not yet
//! consistent" is an expected answer and is reported as `false`, never as an
//! error. Predicate errors count as "not yet" for that poll.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::BackoffScheduler;
use super::retry::RetryStrategy;

/// Detailed result of a consistency wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyOutcome {
    /// The predicate returned true
    pub consistent: bool,
    /// Predicate evaluations performed
    pub attempts: u32,
    /// Evaluations that failed with an error
    pub predicate_errors: u32,
    /// Wall time spent waiting
    pub elapsed: Duration,
    /// The wait ended because the strategy timeout ran out
    pub timed_out: bool,
}

/// Best-effort waiter for eventually consistent reads
#[derive(Debug, Clone, Default)]
pub struct ConsistencyWaiter {
    label: Option<String>,
}

impl ConsistencyWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label attached to log events
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self { label: Some(label.into()) }
    }

    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("consistency")
    }

    /// Poll `predicate` until it returns `Ok(true)`
    ///
    /// Returns false on timeout or when `strategy.max_retries` polls after the
    /// first have all come back negative.
    pub async fn wait_for<P, Fut, E>(&self, predicate: P, strategy: &RetryStrategy) -> bool
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: fmt::Display,
    {
        self.wait_for_outcome(predicate, strategy).await.consistent
    }

    /// [`wait_for`](Self::wait_for) for predicates that cannot fail
    pub async fn wait_until<P, Fut>(&self, mut predicate: P, strategy: &RetryStrategy) -> bool
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let fallible = || {
            let fut = predicate();
            async move { Ok::<_, Infallible>(fut.await) }
        };
        self.wait_for(fallible, strategy).await
    }

    /// Poll `predicate` and report how the wait went
    ///
    /// Each evaluation is bounded by the remaining budget, so a hung read
    /// cannot hold the caller past `strategy.timeout`.
    pub async fn wait_for_outcome<P, Fut, E>(
        &self,
        mut predicate: P,
        strategy: &RetryStrategy,
    ) -> ConsistencyOutcome
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: fmt::Display,
    {
        let started = Instant::now();
        let deadline = started + strategy.timeout;
        let mut outcome = ConsistencyOutcome {
            consistent: false,
            attempts: 0,
            predicate_errors: 0,
            elapsed: Duration::ZERO,
            timed_out: false,
        };
        let mut retries = 0_u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcome.timed_out = true;
                break;
            }

            outcome.attempts += 1;
            match tokio::time::timeout(remaining, predicate()).await {
                Ok(Ok(true)) => {
                    outcome.consistent = true;
                    break;
                }
                Ok(Ok(false)) => {
                    debug!(waiter = self.label(), attempt = outcome.attempts, "not yet consistent");
                }
                Ok(Err(error)) => {
                    outcome.predicate_errors += 1;
                    warn!(
                        waiter = self.label(),
                        attempt = outcome.attempts,
                        error = %error,
                        "consistency predicate failed, treating as not yet consistent"
                    );
                }
                Err(_) => {
                    outcome.timed_out = true;
                    break;
                }
            }

            if retries >= strategy.max_retries {
                break;
            }
            retries += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcome.timed_out = true;
                break;
            }
            let delay = BackoffScheduler::delay(retries, strategy.base_delay, strategy.max_delay);
            tokio::time::sleep(delay.min(remaining)).await;
        }

        outcome.elapsed = started.elapsed();
        if outcome.consistent {
            debug!(
                waiter = self.label(),
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis(),
                "consistency reached"
            );
        } else {
            info!(
                waiter = self.label(),
                attempts = outcome.attempts,
                predicate_errors = outcome.predicate_errors,
                timed_out = outcome.timed_out,
                elapsed_ms = outcome.elapsed.as_millis(),
                "gave up waiting for consistency"
            );
        }
        outcome
    }
}
