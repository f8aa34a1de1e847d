//! # Queue Abstraction
//!
//! One message-queue contract, two implementations:
//!
//! - [`InMemoryQueue`]: mutex-guarded ring buffers, one worker task per
//!   subscription. No persistence; for development and tests.
//! - [`StreamQueue`]: a durable append-only log on sled with consumer
//!   groups, a pending-entries list for in-flight deliveries, blocking reads
//!   with a tunable block interval, and `max_pending` backpressure. The
//!   semantics mirror stream brokers: entries are claimed into the group's
//!   pending list on delivery and leave it on ack; rejects either flag the
//!   entry for redelivery or move it to the dead-letter stream.
//!
//! Delivery is at-least-once on both backends. Consumers must be idempotent,
//! keyed by the envelope's `event_id`.

mod memory;
mod stream;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use estateguard_events::Event;

pub use memory::{InMemoryQueue, MemoryQueueConfig};
pub use stream::{StreamQueue, StreamQueueConfig};

/// The fixed, flat topic namespace.
pub mod topics {
    pub const LISTINGS_RAW: &str = "listings.raw";
    pub const LISTINGS_NORMALIZED: &str = "listings.normalized";
    pub const LISTINGS_PROCESSED: &str = "listings.processed";
    pub const FRAUD_DETECTED: &str = "fraud.detected";
    pub const PROCESSING_FAILED: &str = "processing.failed";
    pub const DEAD_LETTER: &str = "dead_letter";

    pub const ALL: [&str; 6] = [
        LISTINGS_RAW,
        LISTINGS_NORMALIZED,
        LISTINGS_PROCESSED,
        FRAUD_DETECTED,
        PROCESSING_FAILED,
        DEAD_LETTER,
    ];

    pub fn is_known(topic: &str) -> bool {
        ALL.contains(&topic)
    }
}

/// Backend-assigned identity of one delivery.
pub type MessageId = String;

/// Identity of a subscription, for bookkeeping and logs.
pub type SubscriptionId = u64;

/// A message as handed to a subscription handler.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: MessageId,
    pub topic: String,
    pub event: Event,
    /// How many times this message has been delivered, this one included.
    pub delivery_count: u32,
}

/// How a handler failed. The backend turns `Transient` into a requeue (up
/// to its requeue limit) and `Permanent` into a dead-letter move.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("transient handler failure: {0}")]
    Transient(String),
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

/// Async message handler. Wrap a closure with [`handler`].
pub type MessageHandler =
    Arc<dyn Fn(QueueMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Adapt an async closure into a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(QueueMessage) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |message| -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(f(message))
    })
}

/// Queue failures surfaced to callers.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is not connected")]
    NotConnected,

    #[error("unknown topic `{0}`")]
    UnknownTopic(String),

    #[error("topic `{topic}` is full ({capacity} messages)")]
    Overflow { topic: String, capacity: usize },

    #[error("unknown message id `{0}`")]
    UnknownMessage(MessageId),

    #[error("malformed message id `{0}`")]
    MalformedMessageId(MessageId),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for QueueError {
    fn from(err: sled::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

/// Connectivity and responsiveness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
}

mod duration_millis {
    use super::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connected={} latency={}ms",
            self.connected,
            self.latency.as_millis()
        )
    }
}

/// The queue contract both backends implement.
///
/// Acknowledgement is expected after all side effects of handling a message
/// have been committed; both backends auto-ack when a handler returns `Ok`.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn connect(&self) -> Result<(), QueueError>;

    /// Stop intake, requeue whatever is still in flight, release resources.
    async fn disconnect(&self) -> Result<(), QueueError>;

    async fn publish(&self, topic: &str, event: Event) -> Result<MessageId, QueueError>;

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, QueueError>;

    async fn ack(&self, id: &MessageId) -> Result<(), QueueError>;

    async fn reject(&self, id: &MessageId, requeue: bool) -> Result<(), QueueError>;

    async fn health_check(&self) -> QueueHealth;
}
