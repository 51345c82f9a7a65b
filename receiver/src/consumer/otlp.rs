//! OTLP/gRPC consumer - forwards batches to an OpenTelemetry collector
//!
//! Sends each batch as a unary `Export` call on the standard OTLP trace and
//! logs services. A transport error or non-OK status rejects the batch, so
//! the source message is redelivered. A partial success is logged but
//! counts as accepted: the collector has decided not to take the rejected
//! records, and sending them again would not change that.
//!
//! # Example
//!
//! ```ignore
//! let consumer = OtlpGrpcConsumer::connect("http://otel-collector:4317").await?;
//! ```

use async_trait::async_trait;
use laituri_core::proto::{ExportLogsServiceRequest, ExportTraceServiceRequest};
use laituri_core::{PluginError, TelemetryConsumer};
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

/// Default connect timeout (10 seconds)
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default request timeout (30 seconds)
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Forwards telemetry to an OTLP/gRPC endpoint
///
/// tonic clients are cheap to clone and safe to use concurrently, so no
/// lock is taken per call.
pub struct OtlpGrpcConsumer {
    traces: TraceServiceClient<Channel>,
    logs: LogsServiceClient<Channel>,
    endpoint: String,
}

impl OtlpGrpcConsumer {
    /// Connect eagerly; fails if the endpoint is unreachable
    ///
    /// # Arguments
    /// * `endpoint` - collector URL (e.g., "http://localhost:4317")
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, PluginError> {
        let endpoint = endpoint.into();
        let channel = configure(&endpoint)?
            .connect()
            .await
            .map_err(|e| PluginError::Connection(format!("Failed to connect to {endpoint}: {e}")))?;
        debug!(endpoint = %endpoint, "OTLP consumer connected");
        Ok(Self::from_channel(channel, endpoint))
    }

    /// Configure without connecting; the first export connects
    pub fn lazy(endpoint: impl Into<String>) -> Result<Self, PluginError> {
        let endpoint = endpoint.into();
        let channel = configure(&endpoint)?.connect_lazy();
        debug!(endpoint = %endpoint, "OTLP consumer configured (lazy)");
        Ok(Self::from_channel(channel, endpoint))
    }

    fn from_channel(channel: Channel, endpoint: String) -> Self {
        Self {
            traces: TraceServiceClient::new(channel.clone()),
            logs: LogsServiceClient::new(channel),
            endpoint,
        }
    }

    /// Collector endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn configure(endpoint: &str) -> Result<Endpoint, PluginError> {
    Ok(Endpoint::from_shared(endpoint.to_string())
        .map_err(|e| PluginError::Init(format!("Invalid endpoint URL: {e}")))?
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)))
}

#[async_trait]
impl TelemetryConsumer for OtlpGrpcConsumer {
    fn name(&self) -> &'static str {
        "otlp-grpc"
    }

    async fn consume_traces(&self, traces: &ExportTraceServiceRequest) -> Result<(), PluginError> {
        let mut client = self.traces.clone();
        let response = client
            .export(traces.clone())
            .await
            .map_err(|status| {
                PluginError::Consume(format!("trace export to {} failed: {}", self.endpoint, status))
            })?
            .into_inner();

        if let Some(partial) = response.partial_success {
            if partial.rejected_spans > 0 {
                warn!(
                    endpoint = %self.endpoint,
                    rejected = partial.rejected_spans,
                    message = %partial.error_message,
                    "Collector rejected some spans"
                );
            }
        }
        Ok(())
    }

    async fn consume_logs(&self, logs: &ExportLogsServiceRequest) -> Result<(), PluginError> {
        let mut client = self.logs.clone();
        let response = client
            .export(logs.clone())
            .await
            .map_err(|status| {
                PluginError::Consume(format!("log export to {} failed: {}", self.endpoint, status))
            })?
            .into_inner();

        if let Some(partial) = response.partial_success {
            if partial.rejected_log_records > 0 {
                warn!(
                    endpoint = %self.endpoint,
                    rejected = partial.rejected_log_records,
                    message = %partial.error_message,
                    "Collector rejected some log records"
                );
            }
        }
        Ok(())
    }
}
