//! Per-resource guard bundles
//!
//! Every upstream dependency ("quotes", "news", ...) gets exactly one rate
//! limiter, circuit breaker and concurrency gate for the life of the
//! process. The registry owns them and hands out shared handles.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use marketpulse_common::resilience::{
    BoundedConcurrencyGate, CircuitBreaker, CircuitBreakerConfig, CircuitState, ConfigError,
    SlidingWindowRateLimiter,
};
use marketpulse_domain::{Config, FetchConfig, GuardConfig, MarketPulseError, Result};
use tracing::info;

use super::fetcher::ResilientFetcher;

/// Limiter, breaker and gate guarding one upstream resource
#[derive(Debug)]
pub struct GuardSet {
    name: String,
    pub limiter: SlidingWindowRateLimiter,
    pub breaker: CircuitBreaker,
    pub gate: BoundedConcurrencyGate,
}

impl GuardSet {
    /// Build the guards described by `config`
    pub fn build(name: impl Into<String>, config: &GuardConfig) -> Result<Self> {
        let name = name.into();
        config.validate(&name)?;
        let limiter = SlidingWindowRateLimiter::new(config.max_requests, config.window())
            .map_err(|err| config_error(&name, &err))?;
        let breaker_config = CircuitBreakerConfig::builder()
            .failure_threshold(config.failure_threshold)
            .success_threshold(config.success_threshold)
            .timeout(config.breaker_timeout())
            .build()
            .map_err(|err| config_error(&name, &err))?;
        let breaker = CircuitBreaker::new(breaker_config)
            .map_err(|err| config_error(&name, &err))?
            .named(name.clone());
        let gate = BoundedConcurrencyGate::new(config.max_concurrent)
            .map_err(|err| config_error(&name, &err))?;

        Ok(Self { name, limiter, breaker, gate })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point-in-time health of the three guards
    pub fn snapshot(&self) -> GuardSnapshot {
        let gate = self.gate.metrics();
        GuardSnapshot {
            name: self.name.clone(),
            breaker_state: self.breaker.state(),
            breaker_retry_after: self.breaker.retry_after(),
            requests_in_window: self.limiter.current_count(),
            max_requests: self.limiter.config().max_requests,
            running: gate.running,
            queued: gate.queued,
            max_concurrent: gate.max_concurrent,
        }
    }
}

fn config_error(name: &str, err: &ConfigError) -> MarketPulseError {
    MarketPulseError::Config(format!("guards.{name}: {err}"))
}

/// Health snapshot of one resource's guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub name: String,
    pub breaker_state: CircuitState,
    /// Zero unless the breaker is open
    pub breaker_retry_after: Duration,
    pub requests_in_window: usize,
    pub max_requests: u32,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

impl GuardSnapshot {
    /// The breaker is closed and the gate has no backlog
    pub fn is_healthy(&self) -> bool {
        self.breaker_state == CircuitState::Closed && self.queued == 0
    }
}

/// Application-owned registry of guard bundles keyed by resource name
#[derive(Debug, Default)]
pub struct GuardRegistry {
    guards: DashMap<String, Arc<GuardSet>>,
    configured: DashMap<String, GuardConfig>,
    defaults: GuardConfig,
    fetch: FetchConfig,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `guards` and `fetch` sections of `config`
    ///
    /// Configured resources are built eagerly so bad settings fail at
    /// startup rather than on first use.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self { fetch: config.fetch.clone(), ..Self::default() };
        for (name, guard) in &config.guards {
            registry.configured.insert(name.clone(), *guard);
            registry.guards.insert(name.clone(), Arc::new(GuardSet::build(name, guard)?));
        }
        info!(resources = registry.guards.len(), "guard registry initialised");
        Ok(registry)
    }

    /// Settings used for resources missing from the config
    #[must_use]
    pub fn with_defaults(mut self, defaults: GuardConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Guards for `name`, created from defaults on first use
    pub fn guards(&self, name: &str) -> Result<Arc<GuardSet>> {
        if let Some(existing) = self.guards.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let config = self.configured.get(name).map_or(self.defaults, |entry| *entry.value());
        let entry = match self.guards.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let created = Arc::new(GuardSet::build(name, &config)?);
                info!(resource = name, "guards created with default settings");
                Arc::clone(vacant.insert(created).value())
            }
        };
        Ok(entry)
    }

    /// Fetcher for `name` using the registry's fetch settings
    pub fn fetcher(&self, name: &str) -> Result<ResilientFetcher> {
        Ok(ResilientFetcher::new(self.guards(name)?, &self.fetch))
    }

    /// Change a resource's rate limit without rebuilding its guards
    pub fn reconfigure_rate_limit(
        &self,
        name: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<()> {
        let guards = self.guards(name)?;
        guards
            .limiter
            .reconfigure(max_requests, window)
            .map_err(|err| config_error(name, &err))?;
        info!(
            resource = name,
            max_requests,
            window_ms = window.as_millis() as u64,
            "rate limit changed"
        );
        Ok(())
    }

    /// Snapshots for every resource, sorted by name
    pub fn snapshot(&self) -> Vec<GuardSnapshot> {
        let mut snapshots: Vec<_> =
            self.guards.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
