// Publisher: advance a due job in the store, then emit it to the broker

use crate::db::JobTable;
use crate::errors::PublishError;
use crate::models::Job;
use crate::queue::{MessageBroker, OutboundMessage};
use crate::telemetry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What happened to the job row when its run was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Recurring job moved to its next run
    Rescheduled(DateTime<Utc>),
    /// One-off job deleted after its single run
    Removed,
    /// The row was gone before it could be advanced; nothing must be emitted
    Vanished,
}

impl Advance {
    pub fn should_emit(&self) -> bool {
        !matches!(self, Advance::Vanished)
    }
}

/// Delivers one due job to the broker and advances its schedule.
///
/// The store update and the broker emission are separate operations with no
/// shared transaction. The store is updated first, so a broker failure skips a
/// tick instead of publishing it twice.
#[derive(Clone)]
pub struct Publisher {
    table: Arc<dyn JobTable>,
    broker: Arc<dyn MessageBroker>,
}

impl Publisher {
    pub fn new(table: Arc<dyn JobTable>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { table, broker }
    }

    /// Record the run in the job table: move to `now + interval` using the
    /// stored interval, or delete a one-off job.
    #[instrument(skip(self, job), fields(routing_key = %job.key.routing_key, one_off = job.one_off))]
    pub async fn advance(&self, job: &Job, now: DateTime<Utc>) -> Result<Advance, PublishError> {
        let result = if job.one_off {
            self.table
                .delete(&job.key)
                .await
                .map(|deleted| if deleted { Advance::Removed } else { Advance::Vanished })
        } else {
            self.table
                .advance(&job.key, now)
                .await
                .map(|row| match row {
                    Some(row) => Advance::Rescheduled(row.next_run),
                    None => Advance::Vanished,
                })
        };

        match result {
            Ok(advance) => {
                debug!(?advance, "Job run recorded");
                Ok(advance)
            }
            Err(e) => {
                telemetry::record_publish_failure(job.routing_key(), "store");
                Err(e.into())
            }
        }
    }

    /// Send the job's payload to the broker
    #[instrument(skip(self, job), fields(routing_key = %job.key.routing_key))]
    pub async fn emit(&self, job: &Job, now: DateTime<Utc>) -> Result<(), PublishError> {
        let message = OutboundMessage::for_job(job, now);
        match self.broker.publish(&message).await {
            Ok(()) => {
                telemetry::record_publish_success(job.routing_key());
                Ok(())
            }
            Err(e) => {
                telemetry::record_publish_failure(job.routing_key(), "broker");
                Err(e.into())
            }
        }
    }

    /// Advance then emit, as one step
    pub async fn publish(&self, job: &Job) -> Result<Advance, PublishError> {
        let now = Utc::now();
        let advance = self.advance(job, now).await?;
        if advance.should_emit() {
            self.emit(job, now).await?;
        } else {
            warn!(routing_key = %job.key.routing_key, "Job vanished before publish, skipping");
        }
        Ok(advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobTable;
    use crate::testing::{job_due_in, RecordingBroker};

    async fn setup(
        broker: RecordingBroker,
        one_off: bool,
    ) -> (Arc<MemoryJobTable>, Arc<RecordingBroker>, Publisher, Job) {
        let table = Arc::new(MemoryJobTable::new());
        let broker = Arc::new(broker);
        let publisher = Publisher::new(table.clone(), broker.clone());
        let job = table
            .insert(&job_due_in("orders.created", "{}", -1000, one_off))
            .await
            .unwrap();
        (table, broker, publisher, job)
    }

    #[tokio::test]
    async fn test_recurring_job_is_rescheduled_then_emitted() {
        let (table, broker, publisher, job) = setup(RecordingBroker::default(), false).await;

        let before = Utc::now();
        let advance = publisher.publish(&job).await.unwrap();

        let stored = table.get(&job.key).await.unwrap().unwrap();
        assert_eq!(advance, Advance::Rescheduled(stored.next_run));
        assert!(stored.next_run >= before + chrono::Duration::seconds(60));
        assert_eq!(stored.interval, job.interval);

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "orders.created");
        assert_eq!(published[0].body, "{}");
        assert_eq!(published[0].ttl(), std::time::Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_advance_uses_interval_updated_after_snapshot() {
        let (table, _broker, publisher, snapshot) = setup(RecordingBroker::default(), false).await;
        table
            .insert(&Job::new("orders.created", "{}", std::time::Duration::from_secs(120), false))
            .await
            .unwrap();

        let now = Utc::now();
        let advance = publisher.advance(&snapshot, now).await.unwrap();

        assert_eq!(advance, Advance::Rescheduled(now + chrono::Duration::seconds(120)));
        let stored = table.get(&snapshot.key).await.unwrap().unwrap();
        assert_eq!(stored.interval, std::time::Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_one_off_job_is_deleted_after_publish() {
        let (table, broker, publisher, job) = setup(RecordingBroker::default(), true).await;
        assert_eq!(table.count().await.unwrap(), 1);

        let advance = publisher.publish(&job).await.unwrap();

        assert_eq!(advance, Advance::Removed);
        assert_eq!(table.count().await.unwrap(), 0);
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_job_is_not_emitted() {
        let (table, broker, publisher, job) = setup(RecordingBroker::default(), false).await;
        table.delete(&job.key).await.unwrap();

        let advance = publisher.publish(&job).await.unwrap();

        assert_eq!(advance, Advance::Vanished);
        assert!(broker.published().await.is_empty());
        assert_eq!(table.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broker_failure_still_advances_next_run() {
        let (table, _broker, publisher, job) = setup(RecordingBroker::failing(), false).await;

        let result = publisher.publish(&job).await;

        assert!(matches!(result, Err(PublishError::Queue(_))));
        let stored = table.get(&job.key).await.unwrap().unwrap();
        assert!(!stored.is_due(Utc::now()));
    }
}
