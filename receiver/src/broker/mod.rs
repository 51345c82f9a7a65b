//! Broker capability traits
//!
//! The receiver talks to a message broker only through these traits. Each
//! adapter is chosen once, when the receiver is constructed:
//!
//! - [`MemoryBroker`] - in-process durable queues, for tests and embedding
//! - `KafkaService` - librdkafka-backed adapter (feature `kafka`)
//!
//! # Lifecycle
//!
//! ```text
//! MessagingService::connect
//!   └─► create_consumer(&ConsumerSpec) ──► QueueConsumer
//!         start ─► receive ... receive ─► stop_delivery ─► terminate(grace)
//! MessagingService::disconnect
//! ```

mod memory;
#[cfg(feature = "kafka")]
mod kafka;
#[cfg(any(feature = "kafka", test))]
mod offsets;

pub use memory::{MemoryBroker, MemoryConsumer};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaQueueConsumer, KafkaService};
#[cfg(any(feature = "kafka", test))]
pub use offsets::OffsetTracker;

use async_trait::async_trait;
use laituri_core::{DeliveryReceipt, PluginError, RawMessage};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Settles a delivered message with the broker
///
/// Handed to the dispatch pipeline instead of the consumer itself, so the
/// pipeline can acknowledge but not stop, restart or terminate anything.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge the message identified by `receipt`
    ///
    /// The broker will not redeliver it afterwards.
    async fn ack(&self, receipt: DeliveryReceipt) -> Result<(), PluginError>;
}

/// How delivered messages get settled
#[derive(Clone)]
pub enum AckMode {
    /// The receiver acknowledges each message after it was consumed
    Client(Arc<dyn Acknowledger>),
    /// The broker settled the message when it delivered it
    Auto,
}

impl AckMode {
    /// Whether the receiver has to acknowledge messages itself
    pub fn is_client(&self) -> bool {
        matches!(self, AckMode::Client(_))
    }
}

impl fmt::Debug for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckMode::Client(_) => f.write_str("Client"),
            AckMode::Auto => f.write_str("Auto"),
        }
    }
}

/// What kind of queue consumer to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    /// Queue name
    pub queue: String,
    /// Client name announced to the broker
    pub client_name: String,
    /// Queue survives consumer disconnects
    pub durable: bool,
    /// At most one consumer bound at a time
    pub exclusive: bool,
}

impl ConsumerSpec {
    /// Durable exclusive queue, the only kind the receiver uses
    pub fn durable_exclusive(queue: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            client_name: client_name.into(),
            durable: true,
            exclusive: true,
        }
    }
}

/// Consumer bound to one queue
///
/// # Implementation Requirements
///
/// - `receive` is called concurrently by several worker tasks
/// - `receive` must be cancel-safe: a worker abandons it on shutdown, and no
///   message may be lost when that happens
/// - After `stop_delivery`, `receive` returns `None` promptly
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Acknowledgment capability for messages from this consumer
    fn ack_mode(&self) -> AckMode;

    /// Begin delivery
    async fn start(&self) -> Result<(), PluginError>;

    /// Next message, or `None` once delivery is stopped
    async fn receive(&self) -> Option<RawMessage>;

    /// Stop handing out messages; unacknowledged ones stay on the broker
    async fn stop_delivery(&self) -> Result<(), PluginError>;

    /// Release the queue binding, waiting at most `grace`
    async fn terminate(&self, grace: Duration) -> Result<(), PluginError>;
}

/// Connection to a message broker
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Adapter name for logs ("memory", "kafka", ...)
    fn name(&self) -> &'static str;

    /// Open the broker connection
    async fn connect(&self) -> Result<(), PluginError>;

    /// Bind a consumer to a queue
    async fn create_consumer(
        &self,
        spec: &ConsumerSpec,
    ) -> Result<Arc<dyn QueueConsumer>, PluginError>;

    /// Close the broker connection
    async fn disconnect(&self) -> Result<(), PluginError>;
}
