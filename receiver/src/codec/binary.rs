//! OTLP protobuf codec - for payloads that already are OTLP envelopes
//!
//! Producers using an OTLP SDK exporter publish the serialized
//! `ExportTraceServiceRequest` / `ExportLogsServiceRequest` as-is, or
//! base64-encoded when the transport only carries text.

use super::{Codec, CodecError, Framing};
use laituri_core::proto::{ExportLogsServiceRequest, ExportTraceServiceRequest};
use laituri_core::{SpanId, TelemetryBatch, TraceId};
use prost::Message;

/// Codec for OTLP export envelopes
///
/// The payload is decoded as a trace envelope first and as a logs envelope
/// second. Protobuf is permissive (unknown fields are skipped, absent fields
/// default), so a successful parse alone proves little: the envelope must
/// carry at least one record and every identifier must have its exact width
/// before it is accepted.
///
/// # Example
///
/// ```ignore
/// use laituri_receiver::codec::{Framing, OtlpProtoCodec};
///
/// let raw = OtlpProtoCodec::new(Framing::Raw);
/// let wrapped = OtlpProtoCodec::new(Framing::Base64);
/// ```
pub struct OtlpProtoCodec {
    framing: Framing,
}

impl OtlpProtoCodec {
    /// Create a codec reading envelopes with the given framing
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }
}

impl Default for OtlpProtoCodec {
    fn default() -> Self {
        Self::new(Framing::Raw)
    }
}

impl Codec for OtlpProtoCodec {
    fn name(&self) -> &'static str {
        match self.framing {
            Framing::Raw => "otlp_proto",
            Framing::Base64 => "base64+otlp_proto",
        }
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn decode(&self, data: &[u8]) -> Result<TelemetryBatch, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Empty);
        }

        let as_traces = match decode_traces(data) {
            Ok(traces) => return Ok(TelemetryBatch::from_traces(traces)),
            Err(e) => e,
        };
        let as_logs = match decode_logs(data) {
            Ok(logs) => return Ok(TelemetryBatch::from_logs(logs)),
            Err(e) => e,
        };

        Err(CodecError::Envelope(format!(
            "not a trace envelope ({as_traces}); not a logs envelope ({as_logs})"
        )))
    }
}

fn decode_traces(data: &[u8]) -> Result<ExportTraceServiceRequest, CodecError> {
    let request = ExportTraceServiceRequest::decode(data)?;

    let mut spans = 0usize;
    for span in request
        .resource_spans
        .iter()
        .flat_map(|rs| &rs.scope_spans)
        .flat_map(|ss| &ss.spans)
    {
        TraceId::from_slice(&span.trace_id)
            .map_err(|e| CodecError::Envelope(format!("span trace_id: {e}")))?;
        SpanId::from_slice(&span.span_id)
            .map_err(|e| CodecError::Envelope(format!("span span_id: {e}")))?;
        if !span.parent_span_id.is_empty() {
            SpanId::from_slice(&span.parent_span_id)
                .map_err(|e| CodecError::Envelope(format!("span parent_span_id: {e}")))?;
        }
        spans += 1;
    }

    if spans == 0 {
        return Err(CodecError::Envelope("no spans".into()));
    }
    Ok(request)
}

fn decode_logs(data: &[u8]) -> Result<ExportLogsServiceRequest, CodecError> {
    let request = ExportLogsServiceRequest::decode(data)?;

    let mut records = 0usize;
    for record in request
        .resource_logs
        .iter()
        .flat_map(|rl| &rl.scope_logs)
        .flat_map(|sl| &sl.log_records)
    {
        // correlation ids are optional on logs, but sized when present
        if !record.trace_id.is_empty() {
            TraceId::from_slice(&record.trace_id)
                .map_err(|e| CodecError::Envelope(format!("log trace_id: {e}")))?;
        }
        if !record.span_id.is_empty() {
            SpanId::from_slice(&record.span_id)
                .map_err(|e| CodecError::Envelope(format!("log span_id: {e}")))?;
        }
        records += 1;
    }

    if records == 0 {
        return Err(CodecError::Envelope("no log records".into()));
    }
    Ok(request)
}
