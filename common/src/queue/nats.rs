// NATS JetStream client for scheduled job messages

use crate::config;
use crate::errors::QueueError;
use async_nats::jetstream::{
    response::Response,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream capturing every scheduled message
    pub stream_name: String,
    /// Messages go to `<subject_prefix>.<routing_key>`
    pub subject_prefix: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// How long to wait for the JetStream publish acknowledgement
    pub publish_timeout_seconds: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "SCHEDULED".to_string(),
            subject_prefix: "scheduled".to_string(),
            max_age_seconds: 86400, // 24 hours
            publish_timeout_seconds: 5,
        }
    }
}

impl From<&config::NatsConfig> for NatsConfig {
    fn from(settings: &config::NatsConfig) -> Self {
        Self {
            url: settings.url.clone(),
            stream_name: settings.stream_name.clone(),
            subject_prefix: settings.subject_prefix.clone(),
            max_age_seconds: settings.max_age_seconds,
            publish_timeout_seconds: settings.publish_timeout_seconds,
        }
    }
}

impl NatsConfig {
    /// Wildcard subject bound to the stream
    pub fn stream_subject(&self) -> String {
        format!("{}.>", self.subject_prefix)
    }

    pub fn subject_for(&self, routing_key: &str) -> String {
        format!("{}.{}", self.subject_prefix, routing_key)
    }
}

/// A subject usable for publishing: dot-separated, non-empty tokens without
/// whitespace or the `*` and `>` wildcards
pub fn is_literal_subject(subject: &str) -> bool {
    subject.split('.').all(|token| {
        !token.is_empty() && !token.chars().any(|c| c.is_whitespace() || c == '*' || c == '>')
    })
}

/// NATS JetStream client
#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a NatsClient from an existing async_nats::Client
    pub fn from_client(client: async_nats::Client, config: NatsConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            config,
        }
    }

    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        Ok(Self::from_client(client, config))
    }

    /// Create the stream holding scheduled messages, or reuse an existing one
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            subject = %self.config.stream_subject(),
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.stream_subject()],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        self.enable_message_ttl(&stream).await?;

        info!(
            stream_name = %self.config.stream_name,
            "Stream initialized successfully"
        );

        Ok(stream)
    }

    /// Allow the `Nats-TTL` header on the stream so each message expires on its own.
    ///
    /// The stream config type of this client has no `allow_msg_ttl` field, so the
    /// flag is added to the server's current config and sent as a raw
    /// `STREAM.UPDATE`. Servers older than 2.11 ignore it; `max_age` still caps
    /// retention there.
    #[instrument(skip(self, stream))]
    async fn enable_message_ttl(&self, stream: &Stream) -> Result<(), QueueError> {
        let mut config = serde_json::to_value(&stream.cached_info().config).map_err(|e| {
            QueueError::StreamCreation(format!("Failed to encode stream config: {}", e))
        })?;
        if let Some(fields) = config.as_object_mut() {
            fields.insert("allow_msg_ttl".to_string(), serde_json::Value::Bool(true));
        }

        let subject = format!("STREAM.UPDATE.{}", self.config.stream_name);
        let response: Response<serde_json::Value> = self
            .jetstream
            .request(subject, &config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to update stream: {}", e)))?;

        match response {
            Response::Ok(_) => Ok(()),
            Response::Err { error } => Err(QueueError::StreamCreation(format!(
                "Failed to enable message TTL: {}",
                error
            ))),
        }
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Health check - verify the stream is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::HealthCheck(format!("Health check failed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_default() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream_name, "SCHEDULED");
        assert_eq!(config.stream_subject(), "scheduled.>");
        assert_eq!(config.max_age_seconds, 86400);
        assert_eq!(config.publish_timeout_seconds, 5);
    }

    #[test]
    fn test_subject_for_routing_key() {
        let config = NatsConfig::default();
        assert_eq!(config.subject_for("orders.created"), "scheduled.orders.created");
    }

    #[test]
    fn test_from_settings() {
        let settings = crate::config::Settings::default();
        let config = NatsConfig::from(&settings.nats);
        assert_eq!(config.subject_prefix, settings.nats.subject_prefix);
    }

    #[test]
    fn test_literal_subject() {
        assert!(is_literal_subject("orders"));
        assert!(is_literal_subject("orders.created"));
        assert!(is_literal_subject("billing-run_7.v2"));

        for subject in ["", "orders.*", ">", "orders.>", "a..b", ".a", "a.", "a b", "a\tb"] {
            assert!(!is_literal_subject(subject), "{:?}", subject);
        }
    }
}
