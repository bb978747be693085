// Test doubles shared by the unit tests of this crate

use crate::db::{JobTable, MemoryJobTable};
use crate::errors::{DatabaseError, QueueError};
use crate::models::{Job, JobKey};
use crate::queue::{MessageBroker, OutboundMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// Broker that records every message. With a gate, each publish waits for a
/// permit before completing.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<OutboundMessage>>,
    gate: Option<Semaphore>,
    fail: bool,
}

impl RecordingBroker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    /// Let `n` gated publishes complete
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().await.clone()
    }

    pub async fn routing_keys(&self) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .map(|m| m.routing_key.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), QueueError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| QueueError::PublishFailed(e.to_string()))?
                .forget();
        }
        if self.fail {
            return Err(QueueError::PublishFailed("broker down".to_string()));
        }
        self.published.lock().await.push(message.clone());
        Ok(())
    }
}

/// Memory table whose `earliest` fails a fixed number of times first
pub struct FlakyTable {
    inner: MemoryJobTable,
    failures_left: AtomicUsize,
}

impl FlakyTable {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryJobTable::new(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl JobTable for FlakyTable {
    async fn get(&self, key: &JobKey) -> Result<Option<Job>, DatabaseError> {
        self.inner.get(key).await
    }

    async fn insert(&self, job: &Job) -> Result<Job, DatabaseError> {
        self.inner.insert(job).await
    }

    async fn reschedule(
        &self,
        key: &JobKey,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        self.inner.reschedule(key, next_run).await
    }

    async fn advance(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        self.inner.advance(key, now).await
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, DatabaseError> {
        self.inner.delete(key).await
    }

    async fn earliest(&self) -> Result<Option<Job>, DatabaseError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(DatabaseError::ConnectionFailed("store unavailable".to_string()));
        }
        self.inner.earliest().await
    }

    async fn count(&self) -> Result<i64, DatabaseError> {
        self.inner.count().await
    }
}

/// Memory table that counts `earliest` calls. Each call takes a gate permit
/// before reading, so a test can hold the loop inside the store.
pub struct CountingTable {
    inner: MemoryJobTable,
    calls: AtomicUsize,
    gate: Semaphore,
}

impl CountingTable {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: MemoryJobTable::new(),
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Let `n` more `earliest` calls through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl JobTable for CountingTable {
    async fn get(&self, key: &JobKey) -> Result<Option<Job>, DatabaseError> {
        self.inner.get(key).await
    }

    async fn insert(&self, job: &Job) -> Result<Job, DatabaseError> {
        self.inner.insert(job).await
    }

    async fn reschedule(
        &self,
        key: &JobKey,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        self.inner.reschedule(key, next_run).await
    }

    async fn advance(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        self.inner.advance(key, now).await
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, DatabaseError> {
        self.inner.delete(key).await
    }

    async fn earliest(&self) -> Result<Option<Job>, DatabaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .forget();
        self.inner.earliest().await
    }

    async fn count(&self) -> Result<i64, DatabaseError> {
        self.inner.count().await
    }
}

/// A job due `offset_ms` from now (negative for overdue)
pub fn job_due_in(routing_key: &str, body: &str, offset_ms: i64, one_off: bool) -> Job {
    let mut job = Job::new(routing_key, body, Duration::from_secs(60), one_off);
    job.next_run = Utc::now() + chrono::Duration::milliseconds(offset_ms);
    job
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
