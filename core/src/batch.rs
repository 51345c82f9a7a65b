//! Decoded telemetry batch
//!
//! The canonical model is OTLP itself: a batch wraps the export requests
//! defined by `opentelemetry-proto`, so a batch decoded from the binary wire
//! format is bit-for-bit what the producer serialized, and a batch converted
//! from JSON is indistinguishable from one that was.

use crate::proto::{
    ExportLogsServiceRequest, ExportTraceServiceRequest, ResourceLogs, ResourceSpans,
};
use std::fmt;

/// Which signal a record or payload carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Distributed-trace spans
    Traces,
    /// Log records
    Logs,
}

impl SignalKind {
    /// Lowercase name used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Traces => "traces",
            SignalKind::Logs => "logs",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spans and/or log records decoded from one message
///
/// Produced once per successful decode. Every producer observed so far sends
/// a single signal per message, but nothing prevents a payload (an NDJSON
/// stream, say) from mixing both, so both halves are optional.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryBatch {
    traces: Option<ExportTraceServiceRequest>,
    logs: Option<ExportLogsServiceRequest>,
}

impl TelemetryBatch {
    /// Batch holding only spans
    pub fn from_traces(traces: ExportTraceServiceRequest) -> Self {
        Self {
            traces: Some(traces),
            logs: None,
        }
    }

    /// Batch holding only log records
    pub fn from_logs(logs: ExportLogsServiceRequest) -> Self {
        Self {
            traces: None,
            logs: Some(logs),
        }
    }

    /// Batch from resource-scoped spans and logs; empty halves are dropped
    pub fn from_parts(resource_spans: Vec<ResourceSpans>, resource_logs: Vec<ResourceLogs>) -> Self {
        Self {
            traces: (!resource_spans.is_empty())
                .then_some(ExportTraceServiceRequest { resource_spans }),
            logs: (!resource_logs.is_empty())
                .then_some(ExportLogsServiceRequest { resource_logs }),
        }
    }

    /// Trace half, if any
    pub fn traces(&self) -> Option<&ExportTraceServiceRequest> {
        self.traces.as_ref()
    }

    /// Log half, if any
    pub fn logs(&self) -> Option<&ExportLogsServiceRequest> {
        self.logs.as_ref()
    }

    /// Split into owned halves
    pub fn into_parts(
        self,
    ) -> (
        Option<ExportTraceServiceRequest>,
        Option<ExportLogsServiceRequest>,
    ) {
        (self.traces, self.logs)
    }

    /// Total spans across all resources and scopes
    pub fn span_count(&self) -> usize {
        self.traces.as_ref().map_or(0, |t| {
            t.resource_spans
                .iter()
                .flat_map(|rs| &rs.scope_spans)
                .map(|ss| ss.spans.len())
                .sum()
        })
    }

    /// Total log records across all resources and scopes
    pub fn log_record_count(&self) -> usize {
        self.logs.as_ref().map_or(0, |l| {
            l.resource_logs
                .iter()
                .flat_map(|rl| &rl.scope_logs)
                .map(|sl| sl.log_records.len())
                .sum()
        })
    }

    /// Whether the batch carries no records at all
    pub fn is_empty(&self) -> bool {
        self.span_count() == 0 && self.log_record_count() == 0
    }
}
