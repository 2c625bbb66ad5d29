//! Broker capability traits (mechanics only).
//!
//! The broker provides **at-least-once** delivery to one logical consumer
//! group:
//!
//! - a published message stays in the queue until a consumer settles it
//! - an unsettled (in-flight) message survives a consumer crash and is redelivered
//! - settling is manual: `ack`, `nack` (with or without requeue), or `dead_letter`
//!
//! Consumers must tolerate duplicates. Nothing here orders messages.
//!
//! ```text
//! publisher ──publish──▶ topic ──▶ queue (consumer group) ──receive──▶ worker
//!                                      ▲                                │
//!                                      └──── nack(requeue) ◀────────────┤
//!                                       ack / nack(drop) / dead_letter ◀┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Broker operation error.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("malformed broker entry: {0}")]
    Malformed(String),
}

/// One delivery of a message to a consumer.
///
/// `attempt` starts at 1 and grows each time the message is requeued, so a
/// consumer can bound retries without external state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned handle used to settle this delivery.
    pub tag: String,
    pub body: Vec<u8>,
    pub attempt: u32,
}

/// Publishing side of the broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Durably enqueue `body`. No priority, no delayed delivery.
    async fn publish(&self, body: Vec<u8>) -> Result<(), BrokerError>;
}

#[async_trait]
impl<P> MessagePublisher for Arc<P>
where
    P: MessagePublisher + ?Sized,
{
    async fn publish(&self, body: Vec<u8>) -> Result<(), BrokerError> {
        (**self).publish(body).await
    }
}

/// Consuming side of the broker: one named member of the consumer group.
///
/// A consumer is driven by a single task; it is `Send` but not shared.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Wait up to `wait` for the next delivery. `Ok(None)` means nothing arrived.
    async fn receive(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Remove the message permanently.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject the message. With `requeue` it is redelivered later (attempt + 1),
    /// otherwise it is dropped.
    async fn nack(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;

    /// Park the message on the dead-letter queue and remove it from the queue.
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError>;
}
