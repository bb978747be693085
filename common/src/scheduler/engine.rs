// Scheduler engine: the single loop that finds the next due job, sleeps until
// it is due or interrupted, and hands due jobs to the publisher

use crate::config;
use crate::db::JobTable;
use crate::errors::PublishError;
use crate::models::Job;
use crate::queue::MessageBroker;
use crate::scheduler::publisher::{Advance, Publisher};
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on broker publishes running at the same time
    pub max_concurrent_publishes: usize,
    /// Pause after a store error before re-querying
    pub error_backoff: Duration,
    /// How long `stop` waits for in-flight publishes
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_publishes: 32,
            error_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&config::SchedulerConfig> for SchedulerConfig {
    fn from(settings: &config::SchedulerConfig) -> Self {
        Self {
            max_concurrent_publishes: settings.max_concurrent_publishes,
            error_backoff: settings.error_backoff(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

/// Scheduler trait for job scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the scheduling loop until `stop` is called
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the loop and wait for in-flight publishes
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Cheap handle for interrupting the loop and reading its in-flight count
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    wakeup: Arc<Notify>,
    running: Arc<AtomicUsize>,
}

impl SchedulerHandle {
    fn new() -> Self {
        Self {
            wakeup: Arc::new(Notify::new()),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ask the loop to re-read the job table now. Carries no payload; signals
    /// sent while the loop is busy collapse into a single wakeup.
    pub fn wake_up(&self, reason: &str) {
        debug!(reason = reason, "Waking up scheduler");
        self.wakeup.notify_one();
    }

    /// Number of broker publishes dispatched and not yet finished
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// Where the loop stands after reading the earliest job
#[derive(Debug)]
enum State {
    Idle,
    Waiting(Duration),
    Due(Job),
}

impl State {
    fn from_earliest(earliest: Option<Job>, now: DateTime<Utc>) -> Self {
        match earliest {
            None => State::Idle,
            Some(job) if job.is_due(now) => State::Due(job),
            Some(job) => State::Waiting(job.remaining(now)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wakeup {
    Timer,
    Signal,
    Shutdown,
}

/// Decrements the in-flight counter when the publish task ends, whatever the outcome
struct InFlight {
    running: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    fn enter(running: Arc<AtomicUsize>, permit: OwnedSemaphorePermit) -> Self {
        let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry::update_in_flight(now_running);
        Self {
            running,
            _permit: permit,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let now_running = self.running.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::update_in_flight(now_running);
    }
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    table: Arc<dyn JobTable>,
    publisher: Publisher,
    handle: SchedulerHandle,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        table: Arc<dyn JobTable>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        let max_publishes = config
            .max_concurrent_publishes
            .clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config: SchedulerConfig {
                max_concurrent_publishes: max_publishes,
                ..config
            },
            publisher: Publisher::new(table.clone(), broker),
            table,
            handle: SchedulerHandle::new(),
            permits: Arc::new(Semaphore::new(max_publishes)),
            shutdown_tx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Block until the timer elapses, a wakeup signal arrives, or shutdown.
    /// `None` waits without a timer.
    async fn wait(&self, timeout: Option<Duration>, shutdown: &mut watch::Receiver<bool>) -> Wakeup {
        let timer = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = timer => Wakeup::Timer,
            _ = self.handle.wakeup.notified() => Wakeup::Signal,
            _ = shutdown.changed() => Wakeup::Shutdown,
        }
    }

    /// Record the run in the store, then hand the broker emission to a task.
    ///
    /// The store update happens inline so the next `earliest` already sees the
    /// advanced row and the same run is never dispatched twice.
    #[instrument(skip(self, job), fields(routing_key = %job.key.routing_key, next_run = %job.next_run))]
    async fn run_due(&self, job: Job) -> Result<(), PublishError> {
        let now = Utc::now();
        match self.publisher.advance(&job, now).await? {
            Advance::Vanished => {
                debug!("Job disappeared before publish, skipping");
                return Ok(());
            }
            advance => debug!(?advance, "Dispatching publish"),
        }

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(error = %e, "Publish slots closed, dropping run");
                return Ok(());
            }
        };
        let in_flight = InFlight::enter(self.handle.running.clone(), permit);
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            let _in_flight = in_flight;
            if let Err(e) = publisher.emit(&job, now).await {
                error!(
                    routing_key = %job.key.routing_key,
                    error = %e,
                    "Failed to publish job"
                );
            }
        });

        Ok(())
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            max_concurrent_publishes = self.config.max_concurrent_publishes,
            "Starting scheduler engine"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            let state = match self.table.earliest().await {
                Ok(earliest) => State::from_earliest(earliest, Utc::now()),
                Err(e) => {
                    error!(error = %e, "Failed to read earliest job");
                    if self.wait(Some(self.config.error_backoff), &mut shutdown_rx).await
                        == Wakeup::Shutdown
                    {
                        break;
                    }
                    continue;
                }
            };

            let wakeup = match state {
                State::Idle => {
                    debug!("No jobs scheduled, waiting for wakeup signal");
                    self.wait(None, &mut shutdown_rx).await
                }
                State::Waiting(remaining) => {
                    debug!(?remaining, "Sleeping until next job");
                    self.wait(Some(remaining), &mut shutdown_rx).await
                }
                State::Due(job) => match self.run_due(job).await {
                    Ok(()) => continue,
                    Err(e) => {
                        error!(error = %e, "Failed to record job run");
                        self.wait(Some(self.config.error_backoff), &mut shutdown_rx).await
                    }
                },
            };

            if wakeup == Wakeup::Shutdown {
                break;
            }
            debug!(?wakeup, "Scheduler woke up");
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping scheduler engine");
        self.shutdown_tx.send_replace(true);

        // Holding every permit means no publish task is left
        let all_permits = self.config.max_concurrent_publishes as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.permits.acquire_many(all_permits),
        )
        .await
        {
            Ok(Ok(_permits)) => info!("In-flight publishes finished"),
            Ok(Err(e)) => warn!(error = %e, "Publish slots closed during shutdown"),
            Err(_) => warn!(
                running = self.handle.running(),
                "Timed out waiting for in-flight publishes"
            ),
        }

        Ok(())
    }
}
