//! Convenience re-exports for receiver authors.
//!
//! ```rust
//! use laituri_runtime::prelude::*;
//! ```

// Core types
pub use laituri_core::{RawMessage, SignalKind, TelemetryBatch, TelemetryConsumer};

// Broker adapters
#[cfg(feature = "kafka")]
pub use laituri_receiver::KafkaService;
pub use laituri_receiver::{MemoryBroker, MessagingService, QueueConsumer};

// Consumers
pub use laituri_receiver::{OtlpGrpcConsumer, StdoutConsumer};

// Decoding
pub use laituri_receiver::{Codec, CodecRegistry, Framing};

// Configuration
pub use laituri_receiver::{BrokerConfig, Config, ReceiverConfig};

// Receiver
pub use laituri_receiver::{QueueReceiver, ReceiverState};

// Error types
pub use laituri_receiver::{PluginError, ReceiverError};

// Runtime
pub use crate::{RuntimeBuilder, Setup};
