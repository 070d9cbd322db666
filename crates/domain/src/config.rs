//! Configuration management

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONSISTENCY_DELAY_MS, DEFAULT_GUARD_BREAKER_TIMEOUT_MS,
    DEFAULT_GUARD_FAILURE_THRESHOLD, DEFAULT_GUARD_MAX_CONCURRENT, DEFAULT_GUARD_MAX_REQUESTS,
    DEFAULT_GUARD_SUCCESS_THRESHOLD, DEFAULT_GUARD_WINDOW_MS, DEFAULT_RATE_LIMIT_WAIT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_UPDATE_MAX_RETRIES,
};
use crate::errors::{MarketPulseError, Result};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    /// Guard settings keyed by upstream resource name (e.g. "quotes")
    pub guards: BTreeMap<String, GuardConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Key-value store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Delay before a write becomes visible to readers
    pub consistency_delay_ms: u64,
    /// Attempts allowed for one optimistic update
    pub update_max_retries: u32,
    /// Optional expiry applied to tracked records
    pub record_ttl_secs: Option<u64>,
}

/// Outbound fetch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Deadline for a single upstream call
    pub request_timeout_ms: u64,
    /// How long a call may wait for a rate-limit slot
    pub rate_limit_wait_ms: u64,
    /// Base URL of the market data API
    pub market_base_url: Option<String>,
    /// Base URL of the news API
    pub news_base_url: Option<String>,
}

/// Guard settings for one upstream dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub max_requests: u32,
    pub window_ms: u64,
    pub failure_threshold: u32,
    pub breaker_timeout_ms: u64,
    pub success_threshold: u32,
    pub max_concurrent: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            consistency_delay_ms: DEFAULT_CONSISTENCY_DELAY_MS,
            update_max_retries: DEFAULT_UPDATE_MAX_RETRIES,
            record_ttl_secs: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            rate_limit_wait_ms: DEFAULT_RATE_LIMIT_WAIT_MS,
            market_base_url: None,
            news_base_url: None,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_GUARD_MAX_REQUESTS,
            window_ms: DEFAULT_GUARD_WINDOW_MS,
            failure_threshold: DEFAULT_GUARD_FAILURE_THRESHOLD,
            breaker_timeout_ms: DEFAULT_GUARD_BREAKER_TIMEOUT_MS,
            success_threshold: DEFAULT_GUARD_SUCCESS_THRESHOLD,
            max_concurrent: DEFAULT_GUARD_MAX_CONCURRENT,
        }
    }
}

impl StoreConfig {
    pub fn consistency_delay(&self) -> Duration {
        Duration::from_millis(self.consistency_delay_ms)
    }

    pub fn record_ttl(&self) -> Option<Duration> {
        self.record_ttl_secs.map(Duration::from_secs)
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }
}

impl GuardConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.breaker_timeout_ms)
    }

    /// Reject zero limits and thresholds
    pub fn validate(&self, name: &str) -> Result<()> {
        let zero_field = [
            ("max_requests", u64::from(self.max_requests)),
            ("window_ms", self.window_ms),
            ("failure_threshold", u64::from(self.failure_threshold)),
            ("success_threshold", u64::from(self.success_threshold)),
            ("max_concurrent", self.max_concurrent as u64),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        match zero_field {
            Some((field, _)) => Err(MarketPulseError::Config(format!(
                "guards.{name}.{field} must be greater than 0"
            ))),
            None => Ok(()),
        }
    }
}

impl Config {
    /// Guard settings for `name`, falling back to defaults
    pub fn guard(&self, name: &str) -> GuardConfig {
        self.guards.get(name).copied().unwrap_or_default()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.store.update_max_retries == 0 {
            return Err(MarketPulseError::Config(
                "store.update_max_retries must be greater than 0".to_string(),
            ));
        }
        if self.fetch.request_timeout_ms == 0 {
            return Err(MarketPulseError::Config(
                "fetch.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        for (name, guard) in &self.guards {
            guard.validate(name)?;
        }
        Ok(())
    }
}
