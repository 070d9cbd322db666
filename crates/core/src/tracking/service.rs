//! Job status and report delivery tracking

use chrono::Utc;
use marketpulse_common::resilience::ConsistencyOutcome;
use marketpulse_domain::{
    DeliveryRecord, JobState, JobStatusRecord, MarketPulseError, Result, VersionedRecord,
};
use tracing::{error, info};

use super::writer::{ConsistencyCheck, TrackedWrite, TrackedWriter};

/// Lifecycle tracking for analysis jobs
#[derive(Debug, Clone)]
pub struct JobStatusTracker {
    writer: TrackedWriter,
}

impl JobStatusTracker {
    pub fn new(writer: TrackedWriter) -> Self {
        Self { writer }
    }

    /// Register a new pending job with a generated id
    pub async fn create_job(&self, job_type: &str) -> Result<TrackedWrite<JobStatusRecord>> {
        self.create_job_with_id(&JobStatusRecord::generate_id(), job_type).await
    }

    /// Register a new pending job under a caller-chosen id
    pub async fn create_job_with_id(
        &self,
        job_id: &str,
        job_type: &str,
    ) -> Result<TrackedWrite<JobStatusRecord>> {
        let written = self.writer.create(JobStatusRecord::new(job_id, job_type, Utc::now())).await?;
        info!(job_id, job_type, "job created");
        Ok(written)
    }

    pub async fn mark_running(&self, job_id: &str) -> Result<TrackedWrite<JobStatusRecord>> {
        let written = self
            .writer
            .update(&JobStatusRecord::key_for(job_id), |job: &mut JobStatusRecord| {
                job.mark_running(Utc::now())
            })
            .await?;
        info!(job_id, run = written.record.run_count, "job running");
        Ok(written)
    }

    pub async fn complete(
        &self,
        job_id: &str,
        summary: Option<String>,
    ) -> Result<TrackedWrite<JobStatusRecord>> {
        let written = self
            .writer
            .update(&JobStatusRecord::key_for(job_id), |job: &mut JobStatusRecord| {
                job.complete(summary.clone(), Utc::now())
            })
            .await?;
        info!(job_id, "job completed");
        Ok(written)
    }

    pub async fn fail(&self, job_id: &str, reason: &str) -> Result<TrackedWrite<JobStatusRecord>> {
        let written = self
            .writer
            .update(&JobStatusRecord::key_for(job_id), |job: &mut JobStatusRecord| {
                job.fail(reason, Utc::now())
            })
            .await?;
        error!(job_id, error = reason, "job failed");
        Ok(written)
    }

    /// Currently visible status, if any
    pub async fn get(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        Ok(self.writer.records().get_record(&JobStatusRecord::key_for(job_id)).await?)
    }

    /// Wait until readers see the job in `state`
    pub async fn wait_for_state(&self, job_id: &str, state: JobState) -> ConsistencyOutcome {
        let check = ConsistencyCheck::custom(move |job: &JobStatusRecord| job.state == state);
        self.writer.confirm(&JobStatusRecord::key_for(job_id), &check).await
    }
}

/// Delivery attempt tracking for generated reports
#[derive(Debug, Clone)]
pub struct DeliveryTracker {
    writer: TrackedWriter,
}

impl DeliveryTracker {
    pub fn new(writer: TrackedWriter) -> Self {
        Self { writer }
    }

    /// Open a pending delivery of `report_id` to one recipient
    pub async fn start_delivery(
        &self,
        report_id: &str,
        channel: &str,
        recipient: &str,
    ) -> Result<TrackedWrite<DeliveryRecord>> {
        let record = DeliveryRecord::new(report_id, channel, recipient, Utc::now());
        let written = self.writer.create(record).await?;
        info!(
            delivery_id = %written.record.delivery_id,
            report_id,
            channel,
            "delivery started"
        );
        Ok(written)
    }

    /// Record the outcome of one delivery attempt
    pub async fn record_attempt(
        &self,
        delivery_id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<TrackedWrite<DeliveryRecord>> {
        if success && error.is_some() {
            return Err(MarketPulseError::InvalidInput(format!(
                "delivery {delivery_id}: successful attempt cannot carry an error"
            )));
        }

        let written = self
            .writer
            .update(&DeliveryRecord::key_for(delivery_id), |delivery: &mut DeliveryRecord| {
                delivery.record_attempt(success, error.clone(), Utc::now());
                Ok(())
            })
            .await?;

        let delivery = &written.record;
        if success {
            info!(delivery_id, attempts = delivery.attempt_count, "report delivered");
        } else {
            error!(
                delivery_id,
                attempts = delivery.attempt_count,
                error = delivery.last_error().unwrap_or("unknown"),
                version = delivery.version(),
                "delivery attempt failed"
            );
        }
        Ok(written)
    }

    pub async fn get(&self, delivery_id: &str) -> Result<Option<DeliveryRecord>> {
        Ok(self.writer.records().get_record(&DeliveryRecord::key_for(delivery_id)).await?)
    }
}
