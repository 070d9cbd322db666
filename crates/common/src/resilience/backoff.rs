//! Exponential backoff with symmetric jitter
//!
//! The delay for retry `attempt` (first retry = 1) is
//! `min(base * 2^(attempt - 1), max)` perturbed by up to ±20% of itself.
//! Shared by the consistency waiter, optimistic record updates and the
//! generic retry helper.

use std::time::Duration;

use rand::Rng;

/// Symmetric jitter applied around the exponential delay (±20%)
pub const JITTER_FACTOR: f64 = 0.2;

/// Cap on the exponent so large attempt numbers saturate instead of overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Stateless backoff calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffScheduler;

impl BackoffScheduler {
    /// Jittered delay for `attempt` using the thread-local RNG
    pub fn delay(attempt: u32, base: Duration, max: Duration) -> Duration {
        Self::delay_with(&mut rand::thread_rng(), attempt, base, max)
    }

    /// Jittered delay drawing randomness from `rng`
    pub fn delay_with<R: Rng + ?Sized>(
        rng: &mut R,
        attempt: u32,
        base: Duration,
        max: Duration,
    ) -> Duration {
        let exp = Self::exponential_delay(attempt, base, max);
        let exp_millis = exp.as_secs_f64() * 1000.0;
        if exp_millis <= 0.0 {
            return Duration::ZERO;
        }

        let spread = exp_millis * JITTER_FACTOR;
        let jittered = exp_millis + rng.gen_range(-spread..=spread);
        Duration::from_secs_f64(jittered.max(0.0) / 1000.0)
    }

    /// Un-jittered exponential delay, capped at `max`
    pub fn exponential_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u32.saturating_pow(exponent);
        base.saturating_mul(multiplier).min(max)
    }
}
