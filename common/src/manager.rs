// Job manager: the caller-facing operations on scheduled jobs

use crate::db::JobTable;
use crate::errors::{JobError, ValidationError};
use crate::models::{Job, JobKey};
use crate::queue::nats::is_literal_subject;
use crate::scheduler::SchedulerHandle;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Longest accepted interval, in seconds
pub const MAX_INTERVAL_SECONDS: u64 = u32::MAX as u64;

/// Schedules, triggers and cancels jobs. Every mutation wakes the scheduler so
/// it re-reads the earliest job.
#[derive(Clone)]
pub struct JobManager {
    table: Arc<dyn JobTable>,
    scheduler: SchedulerHandle,
}

impl JobManager {
    pub fn new(table: Arc<dyn JobTable>, scheduler: SchedulerHandle) -> Self {
        Self { table, scheduler }
    }

    /// Create or update the job for `(routing_key, body)`.
    ///
    /// A new job first runs one interval from now. An existing job keeps its
    /// phase: next_run moves by the difference between the new and old interval.
    #[instrument(skip(self, body))]
    pub async fn schedule(
        &self,
        routing_key: &str,
        body: &str,
        interval_seconds: u64,
        one_off: bool,
    ) -> Result<Job, JobError> {
        validate_schedule(routing_key, interval_seconds)?;

        let job = Job::new(
            routing_key,
            body,
            Duration::from_secs(interval_seconds),
            one_off,
        );
        let stored = self.table.insert(&job).await?;

        info!(next_run = %stored.next_run, "Job scheduled");
        self.scheduler.wake_up("schedule");
        Ok(stored)
    }

    /// Make the job due now
    #[instrument(skip(self, body))]
    pub async fn trigger(&self, routing_key: &str, body: &str) -> Result<Job, JobError> {
        let key = JobKey::new(routing_key, body);
        let job = self
            .table
            .reschedule(&key, Utc::now())
            .await?
            .ok_or_else(|| JobError::not_found(routing_key))?;

        info!("Job triggered");
        self.scheduler.wake_up("trigger");
        Ok(job)
    }

    #[instrument(skip(self, body))]
    pub async fn cancel(&self, routing_key: &str, body: &str) -> Result<(), JobError> {
        let key = JobKey::new(routing_key, body);
        if !self.table.delete(&key).await? {
            return Err(JobError::not_found(routing_key));
        }

        info!("Job cancelled");
        self.scheduler.wake_up("cancel");
        Ok(())
    }

    pub async fn get(&self, routing_key: &str, body: &str) -> Result<Job, JobError> {
        self.table
            .get(&JobKey::new(routing_key, body))
            .await?
            .ok_or_else(|| JobError::not_found(routing_key))
    }

    /// Number of jobs in the table
    pub async fn total(&self) -> Result<i64, JobError> {
        Ok(self.table.count().await?)
    }

    /// Broker publishes currently in flight
    pub fn running(&self) -> usize {
        self.scheduler.running()
    }
}

fn validate_schedule(routing_key: &str, interval_seconds: u64) -> Result<(), ValidationError> {
    if routing_key.is_empty() {
        return Err(ValidationError::MissingField("routing_key".to_string()));
    }
    if !is_literal_subject(routing_key) {
        return Err(ValidationError::InvalidFieldValue {
            field: "routing_key".to_string(),
            reason: "must be dot-separated tokens without whitespace, '*' or '>'".to_string(),
        });
    }
    if interval_seconds == 0 || interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(ValidationError::InvalidFieldValue {
            field: "interval".to_string(),
            reason: format!("must be between 1 and {} seconds", MAX_INTERVAL_SECONDS),
        });
    }
    Ok(())
}
