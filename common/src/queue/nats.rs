// NATS JetStream client for the event bus

use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name holding all events
    pub stream_name: String,
    /// Durable consumer name shared by worker instances
    pub consumer_name: String,
    /// Maximum age for unconsumed events in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum delivery attempts before the broker gives up on an event
    pub max_deliver: i64,
    /// How long a delivered event may stay unacknowledged before redelivery
    pub ack_wait_seconds: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "EVENTS".to_string(),
            consumer_name: "event-workers".to_string(),
            max_age_seconds: 7 * 86400,
            max_deliver: 10,
            ack_wait_seconds: 120,
        }
    }
}

/// Subject wildcard every event is published under; see `Event::subject`
pub const EVENT_SUBJECT_WILDCARD: &str = "events.>";

/// NATS JetStream client wrapping connection, stream, and consumer setup
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: EventBusConfig,
}

impl NatsClient {
    /// Connect to the NATS server and build a JetStream context
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: EventBusConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        info!("Connected to NATS server");

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Create (or fetch) the event stream.
    ///
    /// Work-queue retention: an event is deleted once a worker acknowledges
    /// it, which together with explicit acks gives at-least-once delivery.
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream event stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![EVENT_SUBJECT_WILDCARD.to_string()],
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        Ok(stream)
    }

    /// Create (or fetch) the durable pull consumer worker instances share
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(&self) -> Result<PullConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(format!("Stream not found: {}", e)))?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer_name.clone()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            max_deliver: self.config.max_deliver,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(
            consumer_name = %self.config.consumer_name,
            "Durable consumer ready"
        );

        Ok(consumer)
    }

    /// Get the JetStream context for publishing
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Get the raw NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &EventBusConfig {
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
    fn test_event_bus_config_default() {
        let config = EventBusConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream_name, "EVENTS");
        assert_eq!(config.consumer_name, "event-workers");
        assert_eq!(config.max_deliver, 10);
        assert!(config.ack_wait_seconds > 0);
    }
}
