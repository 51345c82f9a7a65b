//! laituri-core - Core types for the laituri receiver
//!
//! This crate provides the types shared between the receiver and the code
//! that plugs into it on either side:
//!
//! - [`RawMessage`] / [`DeliveryReceipt`] - what a broker adapter delivers
//! - [`TelemetryBatch`] - decoded spans and log records (OTLP model)
//! - [`TelemetryConsumer`] trait - async interface for downstream consumers
//! - [`TraceId`] / [`SpanId`] - fixed-width identifiers
//! - [`PluginError`] - error type for plugin operations
//! - [`proto`] - the OTLP message types the batch is made of
//!
//! # Why this crate exists
//!
//! Broker adapters and consumers living outside this workspace only need the
//! contracts, not the decode pipeline or its dependencies:
//!
//! ```text
//! laituri-core ◄── laituri-receiver ◄── laituri-runtime
//!      ▲
//!      └────────── external broker adapters / consumers
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod batch;
mod consume;
mod error;
/// Fixed-width trace and span identifiers
pub mod id;
/// Inbound broker message
pub mod message;

/// OTLP message types used as the canonical telemetry model
pub mod proto {
    pub use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
    pub use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    pub use opentelemetry_proto::tonic::common::v1::{
        AnyValue, InstrumentationScope, KeyValue, any_value,
    };
    pub use opentelemetry_proto::tonic::logs::v1::{
        LogRecord, ResourceLogs, ScopeLogs, SeverityNumber,
    };
    pub use opentelemetry_proto::tonic::resource::v1::Resource;
    pub use opentelemetry_proto::tonic::trace::v1::{
        ResourceSpans, ScopeSpans, Span, Status, span, status,
    };
}

pub use batch::{SignalKind, TelemetryBatch};
pub use consume::TelemetryConsumer;
pub use error::PluginError;
pub use id::{IdError, SpanId, TraceId};
pub use message::{DeliveryReceipt, RawMessage};
