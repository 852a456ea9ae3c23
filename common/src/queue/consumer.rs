// Event consumer for NATS JetStream

use crate::errors::QueueError;
use crate::events::Event;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::Message;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

/// Event consumer trait
#[async_trait::async_trait]
pub trait EventConsumer: Send + Sync {
    /// Start consuming events from the bus; returns when shutdown is requested
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown
    fn shutdown(&self);
}

/// Callback invoked for each delivered event.
///
/// Ok(()) acknowledges the event (including handlers that durably parked a
/// run); Err nacks it so the broker redelivers, up to `max_deliver` times.
pub type EventHandler = Arc<
    dyn Fn(Event) -> futures::future::BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync,
>;

/// NATS-based event consumer
pub struct NatsEventConsumer {
    consumer: PullConsumer,
    handler: EventHandler,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl NatsEventConsumer {
    /// Create a new event consumer bound to the shared durable consumer
    #[instrument(skip(client, handler))]
    pub async fn new(client: &NatsClient, handler: EventHandler) -> Result<Self, QueueError> {
        info!("Creating event consumer");

        let consumer = client.get_or_create_consumer().await?;

        Ok(Self {
            consumer,
            handler,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Process a single delivered message
    #[instrument(skip(self, message), fields(
        stream_sequence = ?message.info().map(|i| i.stream_sequence),
    ))]
    async fn process_message(&self, message: Message) -> Result<(), QueueError> {
        let event: Event = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                // A payload that never parses would be redelivered forever;
                // drop it and keep the poison pill out of the stream
                error!(error = %e, "Undecodable event payload, discarding");
                message.ack().await.map_err(|e| {
                    QueueError::AckFailed(format!("Failed to acknowledge event: {}", e))
                })?;
                return Ok(());
            }
        };

        info!(
            event_id = %event.id,
            event_name = %event.name,
            "Processing event"
        );

        match (self.handler)(event.clone()).await {
            Ok(()) => {
                message.ack().await.map_err(|e| {
                    QueueError::AckFailed(format!("Failed to acknowledge event: {}", e))
                })?;
                Ok(())
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_name = %event.name,
                    error = %e,
                    "Event handling failed"
                );

                // Negative acknowledge - the broker redelivers
                message
                    .ack_with(async_nats::jetstream::AckKind::Nak(None))
                    .await
                    .map_err(|e| {
                        QueueError::AckFailed(format!(
                            "Failed to negative acknowledge event: {}",
                            e
                        ))
                    })?;

                Err(QueueError::ConsumeFailed(format!(
                    "Event handling failed: {}",
                    e
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl EventConsumer for NatsEventConsumer {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), QueueError> {
        info!("Starting event consumer");

        let mut messages = self.consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        info!("Consumer started, waiting for events");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            tokio::select! {
                message_result = messages.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            if let Err(e) = self.process_message(message).await {
                                error!(error = %e, "Failed to process event");
                                // Continue with the next event
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving event");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Event stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    // Loop back to re-check the shutdown flag
                    continue;
                }
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{names, Event, UserRef};

    #[test]
    fn test_event_deserialization() {
        let event = Event::new(names::USER_DELETED, &UserRef { id: "user_1".into() }).unwrap();
        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: Event = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.name, names::USER_DELETED);
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        assert!(!shutdown_flag.load(Ordering::Relaxed));

        shutdown_flag.store(true, Ordering::Relaxed);
        assert!(shutdown_flag.load(Ordering::Relaxed));
    }
}
