//! Optimistic writes followed by a visibility wait

use std::fmt;
use std::sync::Arc;

use marketpulse_common::resilience::{ConsistencyOutcome, ConsistencyWaiter, RetryStrategy};
use marketpulse_domain::VersionedRecord;
use tracing::{debug, warn};

use crate::records::{OptimisticRecordStore, RecordStoreError};

/// What a reader must observe before a write counts as visible
pub enum ConsistencyCheck<R> {
    /// Any version of the record is readable
    Exists,
    /// The readable version is at least this one
    VersionAtLeast(u64),
    /// Caller-defined condition on the readable record
    Custom(Arc<dyn Fn(&R) -> bool + Send + Sync>),
}

impl<R> ConsistencyCheck<R> {
    pub fn custom(check: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(check))
    }

    /// Whether `visible` (the record a reader currently sees) passes
    pub fn is_satisfied(&self, visible: Option<&R>) -> bool
    where
        R: VersionedRecord,
    {
        match (self, visible) {
            (_, None) => false,
            (Self::Exists, Some(_)) => true,
            (Self::VersionAtLeast(version), Some(record)) => record.version() >= *version,
            (Self::Custom(check), Some(record)) => check(record),
        }
    }
}

impl<R> Clone for ConsistencyCheck<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Exists => Self::Exists,
            Self::VersionAtLeast(version) => Self::VersionAtLeast(*version),
            Self::Custom(check) => Self::Custom(Arc::clone(check)),
        }
    }
}

impl<R> fmt::Debug for ConsistencyCheck<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => f.write_str("Exists"),
            Self::VersionAtLeast(version) => {
                f.debug_tuple("VersionAtLeast").field(version).finish()
            }
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Whether a write was observed by a subsequent read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// No wait was requested
    Skipped,
    Confirmed,
    /// The wait ran out before the check passed; the write itself succeeded
    Unconfirmed,
}

/// A completed write and what its visibility wait found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedWrite<R> {
    pub record: R,
    pub visibility: Visibility,
}

impl<R> TrackedWrite<R> {
    pub fn is_confirmed(&self) -> bool {
        self.visibility == Visibility::Confirmed
    }
}

/// Optimistic record writes with read-your-writes confirmation
#[derive(Debug, Clone)]
pub struct TrackedWriter {
    records: OptimisticRecordStore,
    waiter: ConsistencyWaiter,
    strategy: RetryStrategy,
    wait_for_visibility: bool,
}

impl TrackedWriter {
    pub fn new(records: OptimisticRecordStore) -> Self {
        Self {
            records,
            waiter: ConsistencyWaiter::labeled("tracked-write"),
            strategy: RetryStrategy::STANDARD,
            wait_for_visibility: true,
        }
    }

    /// Polling budget for visibility waits
    #[must_use]
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Return right after the write without polling
    #[must_use]
    pub fn without_visibility_wait(mut self) -> Self {
        self.wait_for_visibility = false;
        self
    }

    pub fn records(&self) -> &OptimisticRecordStore {
        &self.records
    }

    /// Create `record` and wait until it can be read back
    pub async fn create<R: VersionedRecord>(
        &self,
        record: R,
    ) -> Result<TrackedWrite<R>, RecordStoreError> {
        let record = self.records.create_record(record).await?;
        let visibility = self.settle(&record.key(), &ConsistencyCheck::<R>::Exists).await;
        Ok(TrackedWrite { record, visibility })
    }

    /// Update the record at `key` and wait until the new version is readable
    ///
    /// Contention that outlasts the retry budget is an error here: a tracked
    /// status change must never be dropped silently.
    pub async fn update<R, F>(
        &self,
        key: &str,
        mutate: F,
    ) -> Result<TrackedWrite<R>, RecordStoreError>
    where
        R: VersionedRecord,
        F: FnMut(&mut R) -> marketpulse_domain::Result<()>,
    {
        let record = self.records.update_record_strict(key, mutate).await?;
        let check = ConsistencyCheck::<R>::VersionAtLeast(record.version());
        let visibility = self.settle(key, &check).await;
        Ok(TrackedWrite { record, visibility })
    }

    /// Update the record at `key`, then wait for `check` if one is given
    pub async fn update_then_check<R, F>(
        &self,
        key: &str,
        mutate: F,
        check: Option<ConsistencyCheck<R>>,
    ) -> Result<TrackedWrite<R>, RecordStoreError>
    where
        R: VersionedRecord,
        F: FnMut(&mut R) -> marketpulse_domain::Result<()>,
    {
        let record = self.records.update_record_strict(key, mutate).await?;
        let visibility = match check {
            Some(check) => self.settle(key, &check).await,
            None => Visibility::Skipped,
        };
        Ok(TrackedWrite { record, visibility })
    }

    /// Poll `key` until `check` passes or the strategy budget runs out
    pub async fn confirm<R: VersionedRecord>(
        &self,
        key: &str,
        check: &ConsistencyCheck<R>,
    ) -> ConsistencyOutcome {
        let records = &self.records;
        self.waiter
            .wait_for_outcome(
                move || async move {
                    let visible = records.get_record::<R>(key).await;
                    visible.map(|record| check.is_satisfied(record.as_ref()))
                },
                &self.strategy,
            )
            .await
    }

    async fn settle<R: VersionedRecord>(
        &self,
        key: &str,
        check: &ConsistencyCheck<R>,
    ) -> Visibility {
        if !self.wait_for_visibility {
            return Visibility::Skipped;
        }
        let outcome = self.confirm(key, check).await;
        if outcome.consistent {
            debug!(key, attempts = outcome.attempts, ?check, "write visible");
            Visibility::Confirmed
        } else {
            warn!(
                key,
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                ?check,
                "write not yet visible to readers"
            );
            Visibility::Unconfirmed
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use marketpulse_domain::JobStatusRecord;

    use super::*;

    fn job(version: u64) -> JobStatusRecord {
        let mut job = JobStatusRecord::new("job-1", "daily-report", Utc::now());
        job.version = version;
        job
    }

    #[test]
    fn test_checks() {
        let exists = ConsistencyCheck::<JobStatusRecord>::Exists;
        assert!(!exists.is_satisfied(None));
        assert!(exists.is_satisfied(Some(&job(1))));

        let at_least = ConsistencyCheck::VersionAtLeast(3);
        assert!(!at_least.is_satisfied(Some(&job(2))));
        assert!(at_least.is_satisfied(Some(&job(3))));
        assert!(at_least.is_satisfied(Some(&job(4))));

        let running = ConsistencyCheck::custom(|job: &JobStatusRecord| job.run_count > 0);
        let mut started = job(2);
        assert!(!running.is_satisfied(Some(&started)));
        started.run_count = 1;
        assert!(running.clone().is_satisfied(Some(&started)));
        assert_eq!(format!("{running:?}"), "Custom(..)");
    }
}
