//! Tracked records stored in the key-value store
//!
//! Every record carries a `version` counter used for optimistic updates: it
//! starts at 1 when the record is created and grows by exactly one per
//! successful write.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    DELIVERY_KEY_PREFIX, INITIAL_RECORD_VERSION, JOB_KEY_PREFIX, MAX_DELIVERY_ATTEMPTS_KEPT,
};
use crate::errors::{MarketPulseError, Result};
use crate::impl_state_conversions;

/// A stored entity with an optimistic-concurrency version counter
pub trait VersionedRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Current version; 1 for a freshly created record
    fn version(&self) -> u64;

    /// Overwrite the version (used by the record store only)
    fn set_version(&mut self, version: u64);

    /// Store key for this record
    fn key(&self) -> String;
}

/* -------------------------------------------------------------------------- */
/* Job Status */
/* -------------------------------------------------------------------------- */

/// Lifecycle of a scheduled analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl_state_conversions!(JobState {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl JobState {
    /// Whether no further transitions are expected
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Allowed lifecycle moves; a failed job may be re-run
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Running)
        )
    }
}

/// Status record for one analysis job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    /// Kind of job, e.g. "daily-report"
    pub job_type: String,
    pub state: JobState,
    pub version: u64,
    /// Times the job entered RUNNING
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_summary: Option<String>,
}

impl JobStatusRecord {
    /// New pending job at the initial version
    pub fn new(job_id: impl Into<String>, job_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            state: JobState::Pending,
            version: INITIAL_RECORD_VERSION,
            run_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            result_summary: None,
        }
    }

    /// Fresh time-ordered job id
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Store key for a job id
    pub fn key_for(job_id: &str) -> String {
        format!("{JOB_KEY_PREFIX}{job_id}")
    }

    fn transition(&mut self, next: JobState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MarketPulseError::InvalidInput(format!(
                "job {} cannot move from {} to {}",
                self.job_id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Move to RUNNING, clearing any previous failure
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Running, now)?;
        self.run_count += 1;
        self.started_at = Some(now);
        self.finished_at = None;
        self.error = None;
        Ok(())
    }

    /// Move to COMPLETED with an optional summary
    pub fn complete(&mut self, summary: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Completed, now)?;
        self.finished_at = Some(now);
        self.result_summary = summary;
        Ok(())
    }

    /// Move to FAILED, recording the error
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Failed, now)?;
        self.finished_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }
}

impl VersionedRecord for JobStatusRecord {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn key(&self) -> String {
        Self::key_for(&self.job_id)
    }
}

/* -------------------------------------------------------------------------- */
/* Report Delivery */
/* -------------------------------------------------------------------------- */

/// Outcome of delivering a report to one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl_state_conversions!(DeliveryStatus {
    Pending => "pending",
    Delivered => "delivered",
    Failed => "failed",
});

/// One attempt to deliver a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Delivery tracking record for one report and recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub delivery_id: String,
    pub report_id: String,
    /// Channel name, e.g. "telegram" or "email"
    pub channel: String,
    pub recipient: String,
    pub status: DeliveryStatus,
    pub version: u64,
    /// Total attempts made, including ones trimmed from `attempts`
    pub attempt_count: u32,
    /// Most recent attempts, oldest first
    pub attempts: Vec<DeliveryAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// New pending delivery at the initial version
    pub fn new(
        report_id: impl Into<String>,
        channel: impl Into<String>,
        recipient: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_id: Uuid::now_v7().to_string(),
            report_id: report_id.into(),
            channel: channel.into(),
            recipient: recipient.into(),
            status: DeliveryStatus::Pending,
            version: INITIAL_RECORD_VERSION,
            attempt_count: 0,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Store key for a delivery id
    pub fn key_for(delivery_id: &str) -> String {
        format!("{DELIVERY_KEY_PREFIX}{delivery_id}")
    }

    /// Append an attempt and update the status
    ///
    /// A delivered report stays delivered; later attempts are still logged.
    pub fn record_attempt(&mut self, success: bool, error: Option<String>, now: DateTime<Utc>) {
        self.attempts.push(DeliveryAttempt { attempted_at: now, success, error });
        if self.attempts.len() > MAX_DELIVERY_ATTEMPTS_KEPT {
            let excess = self.attempts.len() - MAX_DELIVERY_ATTEMPTS_KEPT;
            self.attempts.drain(..excess);
        }
        self.attempt_count += 1;
        self.updated_at = now;

        if success {
            self.status = DeliveryStatus::Delivered;
            self.delivered_at.get_or_insert(now);
        } else if self.status != DeliveryStatus::Delivered {
            self.status = DeliveryStatus::Failed;
        }
    }

    /// Most recent error, if the last attempt failed
    pub fn last_error(&self) -> Option<&str> {
        self.attempts.last().filter(|a| !a.success).and_then(|a| a.error.as_deref())
    }
}

impl VersionedRecord for DeliveryRecord {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn key(&self) -> String {
        Self::key_for(&self.delivery_id)
    }
}
