// In-process job table with the same upsert semantics as the PostgreSQL one

use crate::db::table::JobTable;
use crate::errors::DatabaseError;
use crate::models::{Job, JobKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Job table held in memory. Nothing survives a restart; useful for tests and
/// embedding.
#[derive(Debug, Default)]
pub struct MemoryJobTable {
    rows: Mutex<BTreeMap<JobKey, Job>>,
}

impl MemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobTable for MemoryJobTable {
    async fn get(&self, key: &JobKey) -> Result<Option<Job>, DatabaseError> {
        Ok(self.rows.lock().await.get(key).cloned())
    }

    async fn insert(&self, job: &Job) -> Result<Job, DatabaseError> {
        let mut rows = self.rows.lock().await;
        let stored = match rows.get(&job.key) {
            Some(old) => {
                let delta = chrono::Duration::seconds(job.interval_seconds())
                    - chrono::Duration::seconds(old.interval_seconds());
                Job {
                    key: job.key.clone(),
                    interval: job.interval,
                    next_run: old.next_run + delta,
                    one_off: job.one_off,
                }
            }
            None => job.clone(),
        };
        rows.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn reschedule(
        &self,
        key: &JobKey,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(key).map(|job| {
            job.next_run = next_run;
            job.clone()
        }))
    }

    async fn advance(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(key).map(|job| {
            job.set_next_run_from(now);
            job.clone()
        }))
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, DatabaseError> {
        Ok(self.rows.lock().await.remove(key).is_some())
    }

    async fn earliest(&self) -> Result<Option<Job>, DatabaseError> {
        // BTreeMap iterates in key order, so min_by_key keeps the smallest key on ties
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .min_by_key(|job| job.next_run)
            .cloned())
    }

    async fn count(&self) -> Result<i64, DatabaseError> {
        Ok(self.rows.lock().await.len() as i64)
    }
}
