// Property-based tests for job table and job manager behavior

use chrono::Utc;
use common::db::{JobTable, MemoryJobTable};
use common::errors::{JobError, QueueError};
use common::manager::{JobManager, MAX_INTERVAL_SECONDS};
use common::models::{Job, JobKey};
use common::queue::{MessageBroker, OutboundMessage};
use common::scheduler::{SchedulerConfig, SchedulerEngine};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct DiscardBroker;

#[async_trait::async_trait]
impl MessageBroker for DiscardBroker {
    async fn publish(&self, _message: &OutboundMessage) -> Result<(), QueueError> {
        Ok(())
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn manager(table: Arc<MemoryJobTable>) -> JobManager {
    let engine = SchedulerEngine::new(
        SchedulerConfig::default(),
        table.clone(),
        Arc::new(DiscardBroker),
    );
    JobManager::new(table, engine.handle())
}

/// Scheduling the same key any number of times leaves one row per distinct key
#[test]
fn property_one_row_per_key() {
    let rt = runtime();

    proptest!(|(
        ops in prop::collection::vec(("[a-c]", "[x-z]{0,1}", 1u64..1000), 1..40),
    )| {
        rt.block_on(async {
            let table = Arc::new(MemoryJobTable::new());
            let manager = manager(table.clone());

            let mut distinct = HashSet::new();
            for (routing_key, body, interval) in &ops {
                manager.schedule(routing_key, body, *interval, false).await.unwrap();
                distinct.insert(JobKey::new(routing_key.as_str(), body.as_str()));
            }

            prop_assert_eq!(manager.total().await.unwrap(), distinct.len() as i64);
            Ok(())
        })?;
    });
}

/// Changing the interval shifts next_run by the interval difference
#[test]
fn property_interval_change_preserves_phase() {
    let rt = runtime();

    proptest!(|(
        first in 1u64..100_000,
        second in 1u64..100_000,
    )| {
        rt.block_on(async {
            let table = Arc::new(MemoryJobTable::new());
            let manager = manager(table);

            let before = manager.schedule("phase", "", first, false).await.unwrap();
            let after = manager.schedule("phase", "", second, false).await.unwrap();

            let delta = chrono::Duration::seconds(second as i64 - first as i64);
            prop_assert_eq!(after.next_run, before.next_run + delta);
            prop_assert_eq!(after.interval, Duration::from_secs(second));
            Ok(())
        })?;
    });
}

/// Re-scheduling with an unchanged interval never moves next_run
#[test]
fn property_same_interval_is_idempotent() {
    let rt = runtime();

    proptest!(|(
        interval in 1u64..=MAX_INTERVAL_SECONDS,
        repeats in 1usize..5,
    )| {
        rt.block_on(async {
            let table = Arc::new(MemoryJobTable::new());
            let manager = manager(table);

            let first = manager.schedule("same", "b", interval, false).await.unwrap();
            for _ in 0..repeats {
                let again = manager.schedule("same", "b", interval, false).await.unwrap();
                prop_assert_eq!(again.next_run, first.next_run);
            }
            Ok(())
        })?;
    });
}

/// Out-of-range intervals are rejected and never stored
#[test]
fn property_out_of_range_interval_rejected() {
    let rt = runtime();

    proptest!(|(
        interval in prop_oneof![Just(0u64), (MAX_INTERVAL_SECONDS + 1)..u64::MAX],
    )| {
        rt.block_on(async {
            let table = Arc::new(MemoryJobTable::new());
            let manager = manager(table);

            let result = manager.schedule("bad", "", interval, false).await;
            prop_assert!(matches!(result, Err(JobError::Validation(_))));
            prop_assert_eq!(manager.total().await.unwrap(), 0);
            Ok(())
        })?;
    });
}

/// `earliest` returns a row with the minimum next_run
#[test]
fn property_earliest_is_minimum() {
    let rt = runtime();

    proptest!(|(
        offsets in prop::collection::vec(-100_000i64..100_000, 1..20),
    )| {
        rt.block_on(async {
            let table = MemoryJobTable::new();
            let now = Utc::now();

            for (i, offset) in offsets.iter().enumerate() {
                let mut job = Job::new(format!("rk{}", i), "", Duration::from_secs(60), false);
                job.next_run = now + chrono::Duration::milliseconds(*offset);
                table.insert(&job).await.unwrap();
            }

            let earliest = table.earliest().await.unwrap().unwrap();
            let min_offset = offsets.iter().min().copied().unwrap();
            prop_assert_eq!(earliest.next_run, now + chrono::Duration::milliseconds(min_offset));
            Ok(())
        })?;
    });
}
