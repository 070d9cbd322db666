//! Application constants
//!
//! Domain-level defaults shared by configuration and record handling.

// Record keys
pub const JOB_KEY_PREFIX: &str = "job:";
pub const DELIVERY_KEY_PREFIX: &str = "delivery:";

/// Version assigned to a record when it is first stored
pub const INITIAL_RECORD_VERSION: u64 = 1;

// Store defaults
pub const DEFAULT_CONSISTENCY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_UPDATE_MAX_RETRIES: u32 = 5;

// Fetch defaults
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 5_000;

// Guard defaults (per upstream dependency)
pub const DEFAULT_GUARD_MAX_REQUESTS: u32 = 60;
pub const DEFAULT_GUARD_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_GUARD_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_GUARD_BREAKER_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_GUARD_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_GUARD_MAX_CONCURRENT: usize = 4;

/// Delivery attempts kept on a record; older ones are dropped
pub const MAX_DELIVERY_ATTEMPTS_KEPT: usize = 20;
