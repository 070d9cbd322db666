//! Shared test helpers for `marketpulse-core` integration tests.
//!
//! In-memory implementations of the key-value store port with the timing
//! quirks the tests need: per-read latency, delayed visibility, and a writer
//! that lands inside the verify-then-write window.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use marketpulse_core::{KeyValueStore, PutOptions, StoreError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// Immediately consistent store
///
/// Reads snapshot the value when issued and return after the next queued
/// latency (zero once the queue is empty).
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    read_latencies: Mutex<VecDeque<Duration>>,
    pub reads: AtomicU32,
    pub writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latencies applied to the next reads, in call order
    pub fn with_read_latencies(self, latencies: impl IntoIterator<Item = Duration>) -> Self {
        self.read_latencies.lock().extend(latencies);
        self
    }

    pub fn seed(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.values.lock().get(key).cloned();
        let latency = self.read_latencies.lock().pop_front().unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(snapshot)
    }

    async fn put(&self, key: &str, value: Value, _options: PutOptions) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.lock().remove(key).is_some())
    }
}

/// Store whose writes become readable only after `delay`
pub struct LaggingStore {
    delay: Duration,
    versions: Mutex<HashMap<String, Vec<(Instant, Value)>>>,
}

impl LaggingStore {
    pub fn new(delay: Duration) -> Self {
        Self { delay, versions: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl KeyValueStore for LaggingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Instant::now();
        let versions = self.versions.lock();
        Ok(versions.get(key).and_then(|history| {
            history.iter().rev().find(|(visible_at, _)| *visible_at <= now).map(|(_, v)| v.clone())
        }))
    }

    async fn put(&self, key: &str, value: Value, _options: PutOptions) -> Result<(), StoreError> {
        let visible_at = Instant::now() + self.delay;
        self.versions.lock().entry(key.to_string()).or_default().push((visible_at, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.versions.lock().remove(key).is_some())
    }
}

/// Store where another writer overwrites `key` right after the given read
pub struct RacingStore {
    inner: MemoryStore,
    interloper: Mutex<Option<(u32, String, Value)>>,
}

impl RacingStore {
    /// After read number `after_read` (1-based) completes, `value` lands
    /// under `key`
    pub fn new(after_read: u32, key: &str, value: Value) -> Self {
        Self {
            inner: MemoryStore::new(),
            interloper: Mutex::new(Some((after_read, key.to_string(), value))),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl KeyValueStore for RacingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let result = self.inner.get(key).await;
        let reads = self.inner.reads.load(Ordering::SeqCst);
        let mut interloper = self.interloper.lock();
        if interloper.as_ref().is_some_and(|(after, _, _)| *after == reads) {
            if let Some((_, key, value)) = interloper.take() {
                self.inner.seed(&key, value);
            }
        }
        result
    }

    async fn put(&self, key: &str, value: Value, options: PutOptions) -> Result<(), StoreError> {
        self.inner.put(key, value, options).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
}
