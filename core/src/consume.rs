//! Consumer trait for laituri
//!
//! The [`TelemetryConsumer`] trait is the downstream side of the receiver:
//! whatever accepts decoded spans and log records (an OTLP exporter, a
//! collector pipeline, a test capture).

use crate::error::PluginError;
use crate::proto::{ExportLogsServiceRequest, ExportTraceServiceRequest};
use async_trait::async_trait;

/// Consumer trait - accepts decoded telemetry
///
/// The dispatch pipeline awaits these calls in the task that received the
/// message and acknowledges the source message only after `Ok(())`.
///
/// # Implementation Requirements
///
/// - Consumers must be `Send + Sync`; several deliveries may be dispatched
///   concurrently
/// - Return promptly. Surface backpressure as an error rather than blocking:
///   an error leaves the message unacknowledged for broker redelivery
/// - A batch is borrowed for the duration of the call only
///
/// # Example
///
/// ```ignore
/// use laituri_core::{PluginError, TelemetryConsumer};
/// use laituri_core::proto::{ExportLogsServiceRequest, ExportTraceServiceRequest};
/// use async_trait::async_trait;
///
/// struct CountingConsumer(std::sync::atomic::AtomicUsize);
///
/// #[async_trait]
/// impl TelemetryConsumer for CountingConsumer {
///     fn name(&self) -> &'static str {
///         "counting"
///     }
///
///     async fn consume_traces(&self, _: &ExportTraceServiceRequest) -> Result<(), PluginError> {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(())
///     }
///
///     async fn consume_logs(&self, _: &ExportLogsServiceRequest) -> Result<(), PluginError> {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TelemetryConsumer: Send + Sync {
    /// Short name for logs and metric labels ("stdout", "otlp-grpc", ...)
    fn name(&self) -> &'static str;

    /// Accept a batch of spans
    ///
    /// # Returns
    ///
    /// * `Ok(())` - the batch is accepted; the source message will be acknowledged
    /// * `Err(PluginError)` - rejected; the source message stays unacknowledged
    async fn consume_traces(&self, traces: &ExportTraceServiceRequest) -> Result<(), PluginError>;

    /// Accept a batch of log records
    ///
    /// Same contract as [`consume_traces`](Self::consume_traces).
    async fn consume_logs(&self, logs: &ExportLogsServiceRequest) -> Result<(), PluginError>;

    /// Whether the destination is currently accepting data
    ///
    /// Lightweight; used by the health endpoint only.
    async fn health(&self) -> bool {
        true
    }

    /// Graceful shutdown
    ///
    /// Called after the receiver has drained. Flush and release resources.
    /// The default implementation does nothing.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
