//! In-memory eventually consistent key-value store
//!
//! Every write (including a delete) becomes visible to readers only after
//! the configured delay. Until then readers keep seeing the previous value.
//! Values written with a TTL disappear once it elapses, measured from the
//! moment the write became visible.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use marketpulse_core::{KeyValueStore, PutOptions, StoreError};
use marketpulse_domain::StoreConfig;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Revision {
    visible_at: Instant,
    expires_at: Option<Instant>,
    /// `None` marks a delete
    value: Option<Value>,
}

impl Revision {
    fn live_value(&self, now: Instant) -> Option<&Value> {
        if self.expires_at.is_some_and(|expiry| expiry <= now) {
            return None;
        }
        self.value.as_ref()
    }
}

/// Revisions per key, oldest first
#[derive(Debug, Default)]
struct Revisions(Vec<Revision>);

impl Revisions {
    /// Latest revision visible at `now`, dropping the older visible ones
    fn visible(&mut self, now: Instant) -> Option<&Revision> {
        let newest_visible = self.0.iter().rposition(|rev| rev.visible_at <= now)?;
        self.0.drain(..newest_visible);
        self.0.first()
    }

    fn is_settled_empty(&self, now: Instant) -> bool {
        match self.0.as_slice() {
            [] => true,
            [only] => only.visible_at <= now && only.live_value(now).is_none(),
            _ => false,
        }
    }
}

/// Key-value store with bounded visibility delay and optional TTL
#[derive(Debug)]
pub struct EventuallyConsistentStore {
    delay: Duration,
    entries: Mutex<HashMap<String, Revisions>>,
}

impl Default for EventuallyConsistentStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl EventuallyConsistentStore {
    pub fn new(delay: Duration) -> Self {
        Self { delay, entries: Mutex::new(HashMap::new()) }
    }

    /// Store with the configured visibility delay
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.consistency_delay())
    }

    /// Writes are visible immediately
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn visibility_delay(&self) -> Duration {
        self.delay
    }

    /// Drop keys whose only remaining revision is expired or deleted
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, revisions| {
            revisions.visible(now);
            !revisions.is_settled_empty(now)
        });
        before - entries.len()
    }

    fn push(&self, key: &str, value: Option<Value>, ttl: Option<Duration>) {
        let visible_at = Instant::now() + self.delay;
        let revision = Revision { visible_at, expires_at: ttl.map(|ttl| visible_at + ttl), value };
        self.entries.lock().entry(key.to_string()).or_default().0.push(revision);
    }
}

#[async_trait]
impl KeyValueStore for EventuallyConsistentStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let value = entries
            .get_mut(key)
            .and_then(|revisions| revisions.visible(now))
            .and_then(|revision| revision.live_value(now))
            .cloned();
        trace!(key, found = value.is_some(), "store read");
        Ok(value)
    }

    async fn put(&self, key: &str, value: Value, options: PutOptions) -> Result<(), StoreError> {
        self.push(key, Some(value), options.ttl);
        trace!(key, delay_ms = self.delay.as_millis() as u64, "store write accepted");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let existed = {
            let mut entries = self.entries.lock();
            entries.get_mut(key).is_some_and(|revisions| {
                revisions.visible(now);
                revisions.0.last().is_some_and(|rev| rev.live_value(now).is_some())
            })
        };
        if existed {
            self.push(key, None, None);
        }
        Ok(existed)
    }
}
