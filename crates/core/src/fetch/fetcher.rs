//! Guarded outbound calls
//!
//! A fetch passes through the resource's guards in a fixed order:
//!
//! ```text
//! concurrency gate -> circuit breaker -> rate limiter -> deadline -> call
//! ```
//!
//! Rate-limit denials happen inside the breaker but are not charged to the
//! dependency, so a busy limiter never trips the circuit.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use marketpulse_common::error::ErrorClassification;
use marketpulse_common::resilience::{
    policies, ResilienceError, ResilienceResult, RetryError, RetryExecutor, RetryStrategy,
};
use marketpulse_domain::FetchConfig;
use tracing::{instrument, warn};

use super::registry::GuardSet;

/// Runs upstream calls through one resource's [`GuardSet`]
#[derive(Clone)]
pub struct ResilientFetcher {
    guards: Arc<GuardSet>,
    request_timeout: Duration,
    rate_limit_wait: Duration,
}

impl fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("resource", &self.guards.name())
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit_wait", &self.rate_limit_wait)
            .finish()
    }
}

impl ResilientFetcher {
    pub fn new(guards: Arc<GuardSet>, config: &FetchConfig) -> Self {
        Self {
            guards,
            request_timeout: config.request_timeout(),
            rate_limit_wait: config.rate_limit_wait(),
        }
    }

    /// Override the per-call deadline
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override how long a call may wait for a rate-limit slot
    #[must_use]
    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub fn resource(&self) -> &str {
        self.guards.name()
    }

    pub fn guards(&self) -> &Arc<GuardSet> {
        &self.guards
    }

    /// Run `operation` once through the guards
    #[instrument(skip(self, operation), fields(resource = %self.guards.name()))]
    pub async fn fetch<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + Send + Sync + 'static,
    {
        let guards = &self.guards;
        let request_timeout = self.request_timeout;
        let rate_limit_wait = self.rate_limit_wait;

        let limited_call = move || async move {
            if let Err(denial) = guards.limiter.acquire(rate_limit_wait).await {
                return Err(ResilienceError::from(denial));
            }
            match tokio::time::timeout(request_timeout, operation()).await {
                Ok(result) => result.map_err(ResilienceError::operation),
                Err(_) => {
                    let timeout_ms = request_timeout.as_millis() as u64;
                    warn!(timeout_ms, "upstream call timed out");
                    Err(ResilienceError::Timeout { timeout: request_timeout })
                }
            }
        };

        let breaker_call = move || async move {
            let counts_as_failure = |err: &ResilienceError<E>| !err.is_guard_rejection();
            guards
                .breaker
                .execute_classified(limited_call, counts_as_failure)
                .await
                .map_err(ResilienceError::flatten)
        };

        guards.gate.execute(breaker_call).await.map_err(ResilienceError::flatten)
    }

    /// Run `operation` through the guards, retrying transient failures
    ///
    /// Rate-limit denials, open circuits, timeouts and operation errors that
    /// classify as retryable are retried under `strategy`; an open circuit's
    /// retry-after is honoured.
    pub async fn fetch_with_retry<F, Fut, T, E>(
        &self,
        strategy: RetryStrategy,
        mut operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + ErrorClassification + Send + Sync + 'static,
    {
        let executor = RetryExecutor::new(strategy, policies::TransientOnly);
        let outcome = executor
            .execute_with_outcome(|| {
                let attempt = operation();
                self.fetch(move || attempt)
            })
            .await;
        let attempts = outcome.attempts;

        outcome.into_result().map_err(|err| {
            warn!(resource = %self.guards.name(), attempts, error = %err, "fetch gave up");
            match err {
                RetryError::AttemptsExhausted { source, .. }
                | RetryError::NonRetryable { source } => source,
                RetryError::TimeoutExceeded { last_error: Some(last), .. } => last,
                RetryError::TimeoutExceeded { last_error: None, .. } => {
                    ResilienceError::Timeout { timeout: strategy.timeout }
                }
            }
        })
    }
}
