// Event bus module for NATS JetStream integration

pub mod consumer;
pub mod nats;
pub mod publisher;

pub use consumer::{EventConsumer, EventHandler, NatsEventConsumer};
pub use nats::{EventBusConfig, NatsClient};
pub use publisher::{EventPublisher, NatsEventPublisher};
