//! Optimistic versioned updates over the key-value store
//!
//! The store has no compare-and-swap, so an update reads the record, applies
//! the mutation to a copy, re-reads to confirm the version has not moved, and
//! only then writes `version + 1`.
//!
//! # Known race
//!
//! A concurrent writer can still slip in between the confirming read and the
//! write. When that happens the later write wins and the earlier one is lost
//! even though both callers were told the update succeeded. Bounded retries
//! narrow the window but cannot close it; callers that need stronger
//! guarantees must serialize writers per key themselves.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use marketpulse_common::error::{ErrorClassification, ErrorSeverity};
use marketpulse_common::resilience::BackoffScheduler;
use marketpulse_domain::constants::{DEFAULT_UPDATE_MAX_RETRIES, INITIAL_RECORD_VERSION};
use marketpulse_domain::{MarketPulseError, StoreConfig, VersionedRecord};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::ports::{KeyValueStore, PutOptions, StoreError};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Errors raised by [`OptimisticRecordStore`]
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record not found: {key}")]
    RecordNotFound { key: String },

    #[error("record already exists: {key}")]
    AlreadyExists { key: String },

    #[error("version conflict on {key} persisted after {attempts} attempts")]
    VersionConflictExhausted { key: String, attempts: u32 },

    /// The mutation refused to apply to the current record
    #[error("update rejected for {key}: {source}")]
    MutationRejected {
        key: String,
        #[source]
        source: MarketPulseError,
    },

    #[error("record {key} could not be (de)serialized: {message}")]
    Serialization { key: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecordStoreError {
    fn serialization(key: &str, err: &serde_json::Error) -> Self {
        Self::Serialization { key: key.to_string(), message: err.to_string() }
    }
}

impl ErrorClassification for RecordStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::VersionConflictExhausted { .. } => true,
            Self::Store(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RecordNotFound { .. } | Self::AlreadyExists { .. } => ErrorSeverity::Info,
            Self::VersionConflictExhausted { .. } | Self::MutationRejected { .. } => {
                ErrorSeverity::Warning
            }
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Store(err) => err.severity(),
        }
    }
}

impl From<RecordStoreError> for MarketPulseError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::RecordNotFound { key } => Self::NotFound(key),
            RecordStoreError::AlreadyExists { key } => {
                Self::Conflict(format!("{key} already exists"))
            }
            RecordStoreError::VersionConflictExhausted { key, attempts } => {
                Self::Conflict(format!("{key} still contended after {attempts} attempts"))
            }
            RecordStoreError::MutationRejected { source, .. } => source,
            RecordStoreError::Serialization { key, message } => {
                Self::Internal(format!("record {key}: {message}"))
            }
            RecordStoreError::Store(err) => err.into(),
        }
    }
}

/// Result of one optimistic update run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<R> {
    /// The update was written; holds the record as stored
    Written(R),
    /// Every attempt saw the version move underneath it
    Contended { attempts: u32 },
}

impl<R> UpdateOutcome<R> {
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            Self::Written(record) => Some(record),
            Self::Contended { .. } => None,
        }
    }
}

/// Versioned records on top of a [`KeyValueStore`]
#[derive(Clone)]
pub struct OptimisticRecordStore {
    store: Arc<dyn KeyValueStore>,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    ttl: Option<Duration>,
}

impl fmt::Debug for OptimisticRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticRecordStore")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl OptimisticRecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_UPDATE_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            ttl: None,
        }
    }

    /// Build from the `store` config section
    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Self {
        let mut records = Self::new(store).with_max_retries(config.update_max_retries);
        records.ttl = config.record_ttl();
        records
    }

    /// Attempts allowed per update; at least one is always made
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Backoff between contended attempts
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Expiry applied to every write
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn put_options(&self) -> PutOptions {
        PutOptions { ttl: self.ttl }
    }

    /// Read the currently visible record
    pub async fn get_record<R: VersionedRecord>(
        &self,
        key: &str,
    ) -> Result<Option<R>, RecordStoreError> {
        match self.store.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| RecordStoreError::serialization(key, &err)),
            None => Ok(None),
        }
    }

    async fn require_record<R: VersionedRecord>(&self, key: &str) -> Result<R, RecordStoreError> {
        self.get_record(key)
            .await?
            .ok_or_else(|| RecordStoreError::RecordNotFound { key: key.to_string() })
    }

    async fn write<R: VersionedRecord>(
        &self,
        key: &str,
        record: &R,
    ) -> Result<(), RecordStoreError> {
        let value =
            serde_json::to_value(record).map_err(|err| RecordStoreError::serialization(key, &err))?;
        self.store.put(key, value, self.put_options()).await?;
        Ok(())
    }

    /// Insert `record` at version 1 under its own key
    ///
    /// Fails with `AlreadyExists` when a record is already visible. A record
    /// written moments ago elsewhere may not be visible yet.
    #[instrument(skip(self, record), fields(key = %record.key()))]
    pub async fn create_record<R: VersionedRecord>(
        &self,
        mut record: R,
    ) -> Result<R, RecordStoreError> {
        let key = record.key();
        if self.store.get(&key).await?.is_some() {
            return Err(RecordStoreError::AlreadyExists { key });
        }
        record.set_version(INITIAL_RECORD_VERSION);
        self.write(&key, &record).await?;
        debug!(version = INITIAL_RECORD_VERSION, "record created");
        Ok(record)
    }

    /// Apply `mutate` under optimistic concurrency
    ///
    /// Returns `Ok(true)` once the write is confirmed and `Ok(false)` when
    /// every attempt lost to a concurrent writer.
    pub async fn update_record<R, F>(
        &self,
        key: &str,
        mut mutate: F,
    ) -> Result<bool, RecordStoreError>
    where
        R: VersionedRecord,
        F: FnMut(&mut R),
    {
        let outcome = self
            .try_update_record(key, |record: &mut R| {
                mutate(record);
                Ok(())
            })
            .await?;
        Ok(outcome.is_written())
    }

    /// Like [`update_record`](Self::update_record) but contention is an error
    pub async fn update_record_strict<R, F>(
        &self,
        key: &str,
        mutate: F,
    ) -> Result<R, RecordStoreError>
    where
        R: VersionedRecord,
        F: FnMut(&mut R) -> marketpulse_domain::Result<()>,
    {
        match self.try_update_record(key, mutate).await? {
            UpdateOutcome::Written(record) => Ok(record),
            UpdateOutcome::Contended { attempts } => {
                Err(RecordStoreError::VersionConflictExhausted { key: key.to_string(), attempts })
            }
        }
    }

    /// Apply a fallible mutation under optimistic concurrency
    ///
    /// A mutation error aborts the update without writing.
    #[instrument(skip(self, mutate), fields(max_retries = self.max_retries))]
    pub async fn try_update_record<R, F>(
        &self,
        key: &str,
        mut mutate: F,
    ) -> Result<UpdateOutcome<R>, RecordStoreError>
    where
        R: VersionedRecord,
        F: FnMut(&mut R) -> marketpulse_domain::Result<()>,
    {
        for attempt in 1..=self.max_retries {
            let current: R = self.require_record(key).await?;
            let expected = current.version();

            let mut next = current.clone();
            mutate(&mut next).map_err(|source| RecordStoreError::MutationRejected {
                key: key.to_string(),
                source,
            })?;
            next.set_version(expected + 1);

            let confirmed: R = self.require_record(key).await?;
            if confirmed.version() == expected {
                // The store has no CAS: another writer may still land between
                // this check and the put below.
                self.write(key, &next).await?;
                debug!(attempt, version = next.version(), "record updated");
                return Ok(UpdateOutcome::Written(next));
            }

            debug!(
                attempt,
                expected,
                found = confirmed.version(),
                "version moved during update"
            );
            if attempt < self.max_retries {
                let delay = BackoffScheduler::delay(attempt, self.base_delay, self.max_delay);
                tokio::time::sleep(delay).await;
            }
        }

        warn!(attempts = self.max_retries, "optimistic update gave up under contention");
        Ok(UpdateOutcome::Contended { attempts: self.max_retries })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use marketpulse_domain::{JobState, JobStatusRecord};
    use serde_json::Value;

    use super::*;

    /// Immediately consistent map
    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, Value>>,
        puts: AtomicU32,
    }

    #[async_trait]
    impl KeyValueStore for MapStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn put(
            &self,
            key: &str,
            value: Value,
            _options: PutOptions,
        ) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.values.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.values.lock().unwrap().remove(key).is_some())
        }
    }

    /// Bumps the stored version on every confirming read, as if another
    /// writer always got there first
    struct ContendedStore {
        inner: MapStore,
        reads: AtomicU32,
    }

    #[async_trait]
    impl KeyValueStore for ContendedStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            let mut value = self.inner.get(key).await?;
            if read % 2 == 1 {
                if let Some(Value::Object(map)) = value.as_mut() {
                    let bumped = map.get("version").and_then(Value::as_u64).unwrap_or(0) + 1;
                    map.insert("version".into(), Value::from(bumped));
                    let updated = Value::Object(map.clone());
                    self.inner.values.lock().unwrap().insert(key.to_string(), updated);
                }
            }
            Ok(value)
        }

        async fn put(
            &self,
            key: &str,
            value: Value,
            options: PutOptions,
        ) -> Result<(), StoreError> {
            self.inner.put(key, value, options).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
    }

    fn job() -> JobStatusRecord {
        JobStatusRecord::new("job-1", "daily-report", Utc::now())
    }

    #[tokio::test]
    async fn test_create_then_update_increments_version() {
        let records = OptimisticRecordStore::new(Arc::new(MapStore::default()));
        let created = records.create_record(job()).await.unwrap();
        assert_eq!(created.version(), 1);

        let written = records
            .update_record("job:job-1", |job: &mut JobStatusRecord| {
                job.result_summary = Some("warming up".into());
            })
            .await
            .unwrap();
        assert!(written);

        let stored: JobStatusRecord = records.get_record("job:job-1").await.unwrap().unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.result_summary.as_deref(), Some("warming up"));
    }

    #[tokio::test]
    async fn test_create_existing_record_fails() {
        let records = OptimisticRecordStore::new(Arc::new(MapStore::default()));
        records.create_record(job()).await.unwrap();
        let err = records.create_record(job()).await.unwrap_err();
        assert!(matches!(err, RecordStoreError::AlreadyExists { ref key } if key == "job:job-1"));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let records = OptimisticRecordStore::new(Arc::new(MapStore::default()));
        let err = records
            .update_record("job:ghost", |_job: &mut JobStatusRecord| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::RecordNotFound { ref key } if key == "job:ghost"));
        assert_eq!(MarketPulseError::from(err), MarketPulseError::NotFound("job:ghost".into()));
    }

    #[tokio::test]
    async fn test_rejected_mutation_writes_nothing() {
        let store = Arc::new(MapStore::default());
        let records = OptimisticRecordStore::new(store.clone());
        records.create_record(job()).await.unwrap();
        let puts_before = store.puts.load(Ordering::SeqCst);

        let err = records
            .try_update_record("job:job-1", |job: &mut JobStatusRecord| {
                job.complete(None, Utc::now())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RecordStoreError::MutationRejected { .. }));
        assert_eq!(store.puts.load(Ordering::SeqCst), puts_before);
        let stored: JobStatusRecord = records.get_record("job:job-1").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_exhausts_retries() {
        let store =
            Arc::new(ContendedStore { inner: MapStore::default(), reads: AtomicU32::new(0) });
        let records = OptimisticRecordStore::new(store.clone())
            .with_max_retries(3)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40));
        store
            .inner
            .put("job:job-1", serde_json::to_value(job()).unwrap(), PutOptions::default())
            .await
            .unwrap();

        let written = records
            .update_record("job:job-1", |job: &mut JobStatusRecord| job.run_count += 1)
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(store.reads.load(Ordering::SeqCst), 6);
        assert_eq!(store.inner.puts.load(Ordering::SeqCst), 1);

        let err = records
            .update_record_strict("job:job-1", |job: &mut JobStatusRecord| {
                job.run_count += 1;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::VersionConflictExhausted { attempts: 3, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classification() {
        let not_found = RecordStoreError::RecordNotFound { key: "job:1".into() };
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.severity(), ErrorSeverity::Info);

        let down = RecordStoreError::Store(StoreError::Unavailable("redis".into()));
        assert!(down.is_retryable());
        assert_eq!(MarketPulseError::from(down), MarketPulseError::Unavailable("redis".into()));
    }

    #[test]
    fn test_zero_retries_still_makes_one_attempt() {
        let records = OptimisticRecordStore::new(Arc::new(MapStore::default())).with_max_retries(0);
        assert_eq!(records.max_retries(), 1);
    }
}
