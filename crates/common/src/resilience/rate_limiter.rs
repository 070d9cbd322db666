//! Sliding-window rate limiting for outbound API calls
//!
//! The limiter keeps the timestamps of admitted requests. Every admission
//! check first drops timestamps that have left the trailing window, then
//! admits only if fewer than `max_requests` remain. Denied requests are not
//! recorded, so a caller that keeps retrying never extends its own penalty.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult, RateLimitExceeded};
use super::{Clock, SystemClock};

/// Configuration for the sliding-window limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum admissions inside any trailing window
    pub max_requests: u32,
    /// Length of the trailing window
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_requests: 60, window: Duration::from_secs(60) }
    }
}

impl RateLimiterConfig {
    /// Create a validated configuration
    pub fn new(max_requests: u32, window: Duration) -> ConfigResult<Self> {
        let config = Self { max_requests, window };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_requests == 0 {
            return Err(ConfigError::invalid("max_requests must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid("window must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct WindowState {
    admitted: VecDeque<Instant>,
    config: RateLimiterConfig,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        let window = self.config.window;
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.admitted.len() < self.config.max_requests as usize
    }

    /// Time until enough admissions expire to free one slot
    fn wait_time(&self, now: Instant) -> Duration {
        if self.has_capacity() {
            return Duration::ZERO;
        }
        let blocking = self.admitted.len() - self.config.max_requests as usize;
        self.admitted.get(blocking).map_or(Duration::ZERO, |&ts| {
            self.config.window.saturating_sub(now.saturating_duration_since(ts))
        })
    }

    fn denial(&self, now: Instant) -> RateLimitExceeded {
        RateLimitExceeded {
            retry_after: self.wait_time(now),
            max_requests: self.config.max_requests,
            window: self.config.window,
        }
    }
}

/// Sliding-window rate limiter
///
/// One instance per guarded dependency. The lock is never held across an
/// await point, so each check is atomic with respect to other tasks.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter<C: Clock = SystemClock> {
    state: Mutex<WindowState>,
    clock: C,
}

impl SlidingWindowRateLimiter<SystemClock> {
    /// Create a limiter on the tokio clock
    pub fn new(max_requests: u32, window: Duration) -> ConfigResult<Self> {
        Self::with_clock(RateLimiterConfig::new(max_requests, window)?, SystemClock)
    }

    /// Create a limiter from a configuration
    pub fn from_config(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SlidingWindowRateLimiter<C> {
    /// Create a limiter with a custom clock
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(WindowState { admitted: VecDeque::new(), config }),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the request if the window has room, recording it on success
    pub fn is_allowed(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`is_allowed`](Self::is_allowed) but returns the denial details
    pub fn check(&self) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);

        if state.has_capacity() {
            state.admitted.push_back(now);
            debug!(
                in_window = state.admitted.len(),
                max_requests = state.config.max_requests,
                "rate limiter admitted request"
            );
            Ok(())
        } else {
            let denial = state.denial(now);
            debug!(
                retry_after_ms = denial.retry_after.as_millis(),
                max_requests = denial.max_requests,
                "rate limiter denied request"
            );
            Err(denial)
        }
    }

    /// Time until a slot frees up; zero when a request would be admitted now
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        state.wait_time(now)
    }

    /// Number of admissions currently inside the window
    pub fn current_count(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        state.admitted.len()
    }

    /// Current configuration
    pub fn config(&self) -> RateLimiterConfig {
        self.lock().config
    }

    /// Change limits at runtime, keeping admission history
    pub fn reconfigure(&self, max_requests: u32, window: Duration) -> ConfigResult<()> {
        let config = RateLimiterConfig::new(max_requests, window)?;
        let mut state = self.lock();
        info!(
            old_max = state.config.max_requests,
            new_max = max_requests,
            window_ms = window.as_millis(),
            "rate limiter reconfigured"
        );
        state.config = config;
        Ok(())
    }

    /// Forget all admission history
    pub fn reset(&self) {
        self.lock().admitted.clear();
    }

    /// Wait for admission for at most `max_wait`
    ///
    /// Sleeps on the tokio timer for each reported `retry_after`. Returns the
    /// last denial once the next wait would overrun the budget.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), RateLimitExceeded> {
        let deadline = Instant::now() + max_wait;
        loop {
            let denial = match self.check() {
                Ok(()) => return Ok(()),
                Err(denial) => denial,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if denial.retry_after.is_zero() || denial.retry_after > remaining {
                return Err(denial);
            }
            tokio::time::sleep(denial.retry_after).await;
        }
    }
}
