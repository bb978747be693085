use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

// Helper functions for whole-second interval serialization
fn serialize_interval<S>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(interval.as_secs())
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

// ============================================================================
// Job Models
// ============================================================================

/// Identity of a job. The body is part of the key, so two payloads on the
/// same routing key are independent jobs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub routing_key: String,
    pub body: String,
}

impl JobKey {
    pub fn new(routing_key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.routing_key, self.body)
    }
}

/// Job represents a payload published to the broker every `interval`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(flatten)]
    pub key: JobKey,
    /// Spacing between runs; whole seconds
    #[serde(
        serialize_with = "serialize_interval",
        deserialize_with = "deserialize_interval"
    )]
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
    #[serde(default)]
    pub one_off: bool,
}

impl Job {
    /// Create a job whose first run is one interval from now
    pub fn new(
        routing_key: impl Into<String>,
        body: impl Into<String>,
        interval: Duration,
        one_off: bool,
    ) -> Self {
        let now = Utc::now();
        let mut job = Self {
            key: JobKey::new(routing_key, body),
            interval,
            next_run: now,
            one_off,
        };
        job.set_next_run_from(now);
        job
    }

    pub fn routing_key(&self) -> &str {
        &self.key.routing_key
    }

    pub fn body(&self) -> &str {
        &self.key.body
    }

    pub fn interval_seconds(&self) -> i64 {
        i64::try_from(self.interval.as_secs()).unwrap_or(i64::MAX)
    }

    /// The run time one interval after `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.interval_seconds())
    }

    pub fn set_next_run_from(&mut self, now: DateTime<Utc>) {
        self.next_run = self.next_run_after(now);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run <= now
    }

    /// Time left until the job is due; zero once it is due
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.next_run - now).to_std().unwrap_or(Duration::ZERO)
    }
}
