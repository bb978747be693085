// Broker seam: one message per publish, addressed by routing key

use crate::errors::QueueError;
use crate::models::Job;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tracing::{info, instrument};

pub const HEADER_INTERVAL: &str = "Interval";
pub const HEADER_PUBLISHED_AT: &str = "Published-At";
/// Per-message TTL enforced by JetStream on streams with `allow_msg_ttl`
pub const HEADER_TTL: &str = "Nats-TTL";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_ENCODING: &str = "Content-Encoding";

/// A job's payload on its way to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub body: String,
    pub interval: Duration,
    pub published_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn for_job(job: &Job, published_at: DateTime<Utc>) -> Self {
        Self {
            routing_key: job.key.routing_key.clone(),
            body: job.key.body.clone(),
            interval: job.interval,
            published_at,
        }
    }

    /// Messages expire after one interval, when their replacement is due
    pub fn ttl(&self) -> Duration {
        self.interval
    }

    /// Header name/value pairs attached to the message
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_INTERVAL, self.interval.as_secs().to_string()),
            (
                HEADER_PUBLISHED_AT,
                self.published_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (HEADER_TTL, format!("{}s", self.ttl().as_secs())),
            (HEADER_CONTENT_TYPE, "text/plain".to_string()),
            (HEADER_CONTENT_ENCODING, "UTF-8".to_string()),
        ]
    }
}

/// Destination for due job payloads
#[async_trait::async_trait]
pub trait MessageBroker: Send + Sync {
    /// Deliver one message durably
    async fn publish(&self, message: &OutboundMessage) -> Result<(), QueueError>;
}

/// NATS JetStream broker
pub struct NatsBroker {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsBroker {
    pub fn new(client: NatsClient) -> Self {
        let publish_timeout = Duration::from_secs(client.config().publish_timeout_seconds);
        Self {
            client,
            publish_timeout,
        }
    }
}

#[async_trait::async_trait]
impl MessageBroker for NatsBroker {
    #[instrument(skip(self, message), fields(routing_key = %message.routing_key))]
    async fn publish(&self, message: &OutboundMessage) -> Result<(), QueueError> {
        let subject = self.client.config().subject_for(&message.routing_key);

        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in message.headers() {
            headers.insert(name, value.as_str());
        }

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(subject.clone(), headers, message.body.clone().into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        // JetStream only acknowledges once the message is persisted
        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(_ack)) => {
                info!(subject = %subject, "Job message published");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}
