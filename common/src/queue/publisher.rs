// Event publisher for NATS JetStream

use crate::errors::QueueError;
use crate::events::Event;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// EventPublisher trait for putting events on the bus
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus
    async fn publish(&self, event: &Event) -> Result<(), QueueError>;

    /// Publish an event, retrying transient failures a bounded number of times
    async fn publish_with_retry(&self, event: &Event, max_retries: u32)
        -> Result<(), QueueError>;
}

/// NATS-based event publisher
pub struct NatsEventPublisher {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsEventPublisher {
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl EventPublisher for NatsEventPublisher {
    #[instrument(skip(self, event), fields(event_id = %event.id, event_name = %event.name))]
    async fn publish(&self, event: &Event) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize event: {}", e))
        })?;

        let subject = event.subject();
        let jetstream = self.client.jetstream();

        // The event id is the broker-side dedup key: publishing the same
        // event twice within the dedup window is collapsed by JetStream
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", event.id.to_string().as_str());
        headers.insert("Event-Name", event.name.as_str());

        let publish_future: PublishAckFuture = jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish event: {}", e)))?;

        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                info!(subject = %subject, "Event published");
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

    #[instrument(skip(self, event), fields(event_id = %event.id, max_retries = max_retries))]
    async fn publish_with_retry(
        &self,
        event: &Event,
        max_retries: u32,
    ) -> Result<(), QueueError> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= max_retries {
            match self.publish(event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt <= max_retries {
                        let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                        warn!(
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            "Publish failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::PublishFailed("Unknown error during publish with retry".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::events::{names, Event, TaskAssignedPayload};
    use uuid::Uuid;

    #[test]
    fn test_event_serialization_for_wire() {
        let event = Event::new(
            names::TASK_ASSIGNED,
            &TaskAssignedPayload {
                task_id: Uuid::new_v4(),
                origin: "https://app.example.com".to_string(),
            },
        )
        .unwrap();

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: Event = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.name, event.name);
        assert_eq!(decoded.subject(), event.subject());
    }
}
