//! laituri-receiver - Queue-to-OTLP telemetry receiver
//!
//! Pulls messages off a broker queue, works out how each payload is encoded,
//! turns it into OTLP spans and log records and hands them to a downstream
//! consumer. A message is acknowledged only after the consumer accepted
//! everything decoded from it.
//!
//! ```text
//! MessagingService ──► QueueConsumer ──► CodecRegistry ──► TelemetryConsumer
//!                            ▲                                    │
//!                            └──────────── ack ◄──────────────────┘
//! ```
//!
//! Payloads may be binary OTLP protobuf, JSON (single object, array or
//! NDJSON) or either of those wrapped in base64. Broker adapters implement
//! [`MessagingService`] and [`QueueConsumer`]; the in-memory
//! [`MemoryBroker`] ships for tests, and the `kafka` feature adds a
//! librdkafka-backed adapter.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod receiver;

pub use broker::{AckMode, Acknowledger, ConsumerSpec, MemoryBroker, MessagingService, QueueConsumer};
#[cfg(feature = "kafka")]
pub use broker::KafkaService;
pub use codec::{Codec, CodecError, CodecRegistry, DetectError, Detected, Framing};
pub use config::{BrokerConfig, Config, LogFormat, ReceiverConfig};
pub use consumer::{OtlpGrpcConsumer, StdoutConsumer};
pub use convert::ConversionError;
pub use dispatch::{DispatchOutcome, DispatchPipeline, InFlight};
pub use error::{PluginError, ReceiverError, Result};
pub use metrics::ReceiverMetrics;
pub use metrics_server::MetricsServer;
pub use receiver::{QueueReceiver, ReceiverState, ReceiverStatus};

pub use laituri_core::{
    DeliveryReceipt, RawMessage, SignalKind, SpanId, TelemetryBatch, TelemetryConsumer, TraceId,
    proto,
};
