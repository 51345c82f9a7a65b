//! JSON to OTLP conversion
//!
//! Producers that do not link an OTLP SDK publish flat JSON documents, one
//! per span or log record:
//!
//! ```json
//! {"trace_id": "0123456789abcdef0123456789abcdef", "span_id": "abcdef0123456789",
//!  "parent_span_id": "", "name": "GET /orders", "kind": 2,
//!  "start_time": 1700000000000000000, "end_time": 1700000000250000000,
//!  "status": {"code": 1, "message": ""}}
//!
//! {"time_unix_nano": 1700000000000000000, "severity_number": 9,
//!  "severity_text": "INFO", "body": "order placed",
//!  "attributes": [{"key": "order.id", "value": "A-1"}],
//!  "trace_id": "0123456789abcdef0123456789abcdef", "span_id": "abcdef0123456789"}
//! ```
//!
//! Identifiers are hex; a malformed span identifier rejects the record,
//! never zero-fills it. 64-bit integers may also be given as decimal strings.

mod attributes;

use laituri_core::proto::{
    LogRecord, ResourceLogs, ResourceSpans, ScopeLogs, ScopeSpans, Span, Status,
};
use laituri_core::{IdError, SignalKind, SpanId, TelemetryBatch, TraceId};
use serde_json::{Map, Value};
use thiserror::Error;

/// Fields whose presence marks a record as a log record
const LOG_FIELDS: &[&str] = &[
    "body",
    "severity_number",
    "severity_text",
    "time_unix_nano",
    "observed_time_unix_nano",
];

/// Why a JSON document could not become a span or log record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// A record was not a JSON object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A required field was absent or empty
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// An identifier was not valid hex of the right width
    #[error("field '{field}': {source}")]
    InvalidId {
        /// Field name
        field: &'static str,
        /// Underlying identifier error
        #[source]
        source: IdError,
    },

    /// A field had the wrong JSON type
    #[error("field '{field}': expected {expected}")]
    InvalidType {
        /// Field name
        field: &'static str,
        /// Human-readable description of the accepted type
        expected: &'static str,
    },

    /// The payload held no records at all
    #[error("payload contains no records")]
    Empty,
}

/// Decide whether a record is a log record or a span
///
/// Any of `body`, `severity_number`, `severity_text`, `time_unix_nano` or
/// `observed_time_unix_nano` makes it a log record; everything else is
/// treated as a span (and then has to carry span identifiers).
pub fn classify(record: &Value) -> SignalKind {
    match record.as_object() {
        Some(obj) if LOG_FIELDS.iter().any(|f| obj.contains_key(*f)) => SignalKind::Logs,
        _ => SignalKind::Traces,
    }
}

/// Convert one record of a known kind
pub fn convert(record: &Value, kind: SignalKind) -> Result<TelemetryBatch, ConversionError> {
    let mut builder = BatchBuilder::default();
    builder.push(record, kind)?;
    builder.finish()
}

/// Convert a sequence of records, classifying each one
///
/// All spans land in one resource/scope pair and all log records in
/// another, so a mixed payload yields a batch with both halves.
pub fn convert_records(records: &[Value]) -> Result<TelemetryBatch, ConversionError> {
    let mut builder = BatchBuilder::default();
    for record in records {
        builder.push(record, classify(record))?;
    }
    builder.finish()
}

/// Convert a single span document
pub fn span_from_json(record: &Value) -> Result<Span, ConversionError> {
    let obj = as_object(record)?;

    let trace_id = trace_id_field(obj, "trace_id")?.ok_or(ConversionError::MissingField("trace_id"))?;
    let span_id = span_id_field(obj, "span_id")?.ok_or(ConversionError::MissingField("span_id"))?;
    // an all-zero parent is how some producers spell "root span"
    let parent_span_id = span_id_field(obj, "parent_span_id")?
        .filter(|id| !id.is_zero())
        .map(SpanId::to_vec)
        .unwrap_or_default();

    let status = match obj.get("status") {
        None | Some(Value::Null) => None,
        Some(Value::Object(status)) => Some(Status {
            message: str_field(status, "message")?.to_string(),
            code: enum_field(status, "code")?,
        }),
        Some(_) => {
            return Err(ConversionError::InvalidType {
                field: "status",
                expected: "an object with code and message",
            });
        }
    };

    let attributes = attributes::from_record(obj)?;

    Ok(Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id,
        name: str_field(obj, "name")?.to_string(),
        kind: enum_field(obj, "kind")?,
        start_time_unix_nano: u64_field(obj, "start_time")?,
        end_time_unix_nano: u64_field(obj, "end_time")?,
        attributes: attributes.kept,
        dropped_attributes_count: attributes.dropped,
        status,
        ..Default::default()
    })
}

/// Convert a single log record document
///
/// Trace correlation is best effort: an invalid `trace_id` drops both
/// correlation ids (a span id is meaningless without its trace), an invalid
/// `span_id` drops only the span id. The record itself is always kept.
pub fn log_record_from_json(record: &Value) -> Result<LogRecord, ConversionError> {
    let obj = as_object(record)?;

    let mut attributes = attributes::from_record(obj)?;
    let event_name = str_field(obj, "event_name")?;
    if !event_name.is_empty() {
        attributes.push_str("event.name", event_name);
    }

    let body = match obj.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(attributes::string_value(s)),
        Some(_) => {
            return Err(ConversionError::InvalidType {
                field: "body",
                expected: "a string",
            });
        }
    };

    let (trace_id, span_id) = match trace_id_field(obj, "trace_id") {
        Err(_) => (Vec::new(), Vec::new()),
        Ok(trace_id) => (
            trace_id.map(TraceId::to_vec).unwrap_or_default(),
            span_id_field(obj, "span_id")
                .ok()
                .flatten()
                .map(SpanId::to_vec)
                .unwrap_or_default(),
        ),
    };

    Ok(LogRecord {
        time_unix_nano: u64_field(obj, "time_unix_nano")?,
        observed_time_unix_nano: u64_field(obj, "observed_time_unix_nano")?,
        severity_number: enum_field(obj, "severity_number")?,
        severity_text: str_field(obj, "severity_text")?.to_string(),
        body,
        attributes: attributes.kept,
        dropped_attributes_count: attributes.dropped,
        trace_id,
        span_id,
        ..Default::default()
    })
}

// ============================================================================
// Batch assembly
// ============================================================================

#[derive(Default)]
struct BatchBuilder {
    spans: Vec<Span>,
    log_records: Vec<LogRecord>,
}

impl BatchBuilder {
    fn push(&mut self, record: &Value, kind: SignalKind) -> Result<(), ConversionError> {
        match kind {
            SignalKind::Traces => self.spans.push(span_from_json(record)?),
            SignalKind::Logs => self.log_records.push(log_record_from_json(record)?),
        }
        Ok(())
    }

    fn finish(self) -> Result<TelemetryBatch, ConversionError> {
        if self.spans.is_empty() && self.log_records.is_empty() {
            return Err(ConversionError::Empty);
        }

        let resource_spans = if self.spans.is_empty() {
            Vec::new()
        } else {
            vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: self.spans,
                    ..Default::default()
                }],
                ..Default::default()
            }]
        };
        let resource_logs = if self.log_records.is_empty() {
            Vec::new()
        } else {
            vec![ResourceLogs {
                scope_logs: vec![ScopeLogs {
                    log_records: self.log_records,
                    ..Default::default()
                }],
                ..Default::default()
            }]
        };

        Ok(TelemetryBatch::from_parts(resource_spans, resource_logs))
    }
}

// ============================================================================
// Field access
// ============================================================================

fn as_object(record: &Value) -> Result<&Map<String, Value>, ConversionError> {
    record.as_object().ok_or_else(|| {
        ConversionError::NotAnObject(match record {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Object(_) => "an object",
        })
    })
}

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn str_field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, ConversionError> {
    match field(obj, name) {
        None => Ok(""),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ConversionError::InvalidType {
            field: name,
            expected: "a string",
        }),
    }
}

fn u64_field(obj: &Map<String, Value>, name: &'static str) -> Result<u64, ConversionError> {
    let invalid = || ConversionError::InvalidType {
        field: name,
        expected: "a non-negative integer",
    };
    match field(obj, name) {
        None => Ok(0),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid),
        Some(Value::String(s)) => s.parse().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// Enum values are forwarded as given; unknown values are left to the
/// consumer, the same as for binary OTLP.
fn enum_field(obj: &Map<String, Value>, name: &'static str) -> Result<i32, ConversionError> {
    let invalid = || ConversionError::InvalidType {
        field: name,
        expected: "a 32-bit integer",
    };
    let value: i64 = match field(obj, name) {
        None => 0,
        Some(Value::Number(n)) => n.as_i64().ok_or_else(invalid)?,
        Some(Value::String(s)) => s.parse().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };
    i32::try_from(value).map_err(|_| invalid())
}

fn hex_field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<Option<&'a str>, ConversionError> {
    str_field(obj, name).map(|s| (!s.is_empty()).then_some(s))
}

fn trace_id_field(obj: &Map<String, Value>, name: &'static str) -> Result<Option<TraceId>, ConversionError> {
    hex_field(obj, name)?
        .map(|s| TraceId::from_hex(s).map_err(|source| ConversionError::InvalidId { field: name, source }))
        .transpose()
}

fn span_id_field(obj: &Map<String, Value>, name: &'static str) -> Result<Option<SpanId>, ConversionError> {
    hex_field(obj, name)?
        .map(|s| SpanId::from_hex(s).map_err(|source| ConversionError::InvalidId { field: name, source }))
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use laituri_core::proto::any_value;
    use serde_json::json;

    const TRACE_ID: &str = "0123456789abcdef0123456789abcdef";
    const SPAN_ID: &str = "abcdef0123456789";

    fn span_json() -> Value {
        json!({
            "trace_id": TRACE_ID,
            "span_id": SPAN_ID,
            "parent_span_id": "1111111111111111",
            "name": "GET /orders",
            "kind": 2,
            "start_time": 1_700_000_000_000_000_000u64,
            "end_time": 1_700_000_000_250_000_000u64,
            "status": {"code": 2, "message": "upstream timeout"}
        })
    }

    fn log_json() -> Value {
        json!({
            "time_unix_nano": 1_700_000_000_000_000_000u64,
            "observed_time_unix_nano": 1_700_000_000_000_000_100u64,
            "severity_number": 9,
            "severity_text": "INFO",
            "body": "order placed",
            "attributes": [{"key": "order.id", "value": "A-1"}],
            "trace_id": TRACE_ID,
            "span_id": SPAN_ID
        })
    }

    // ==========================================================================
    // Classification
    // ==========================================================================

    #[test]
    fn test_classify() {
        assert_eq!(classify(&span_json()), SignalKind::Traces);
        assert_eq!(classify(&log_json()), SignalKind::Logs);
        assert_eq!(classify(&json!({"severity_text": "WARN"})), SignalKind::Logs);
        assert_eq!(classify(&json!({"name": "x"})), SignalKind::Traces);
        assert_eq!(classify(&json!("scalar")), SignalKind::Traces);
    }

    // ==========================================================================
    // Spans
    // ==========================================================================

    #[test]
    fn test_span_fields() {
        let span = span_from_json(&span_json()).unwrap();
        assert_eq!(hex::encode(&span.trace_id), TRACE_ID);
        assert_eq!(hex::encode(&span.span_id), SPAN_ID);
        assert_eq!(span.parent_span_id, vec![0x11; 8]);
        assert_eq!(span.name, "GET /orders");
        assert_eq!(span.kind, 2);
        assert_eq!(span.start_time_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(span.end_time_unix_nano, 1_700_000_000_250_000_000);
        let status = span.status.unwrap();
        assert_eq!(status.code, 2);
        assert_eq!(status.message, "upstream timeout");
    }

    #[test]
    fn test_span_ids_are_exact_width() {
        let span = span_from_json(&span_json()).unwrap();
        assert_eq!(span.trace_id.len(), 16);
        assert_eq!(span.span_id.len(), 8);
    }

    #[test]
    fn test_short_trace_id_is_rejected() {
        let mut record = span_json();
        record["trace_id"] = json!("0123456789");
        let err = span_from_json(&record).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::InvalidId {
                field: "trace_id",
                source: IdError::Length { actual: 10, .. }
            }
        ));
    }

    #[test]
    fn test_non_hex_span_id_is_rejected() {
        let mut record = span_json();
        record["span_id"] = json!("zzzzzzzzzzzzzzzz");
        assert!(matches!(
            span_from_json(&record),
            Err(ConversionError::InvalidId { field: "span_id", .. })
        ));
    }

    #[test]
    fn test_missing_ids_are_rejected() {
        let err = span_from_json(&json!({"name": "orphan"})).unwrap_err();
        assert_eq!(err, ConversionError::MissingField("trace_id"));

        let err = span_from_json(&json!({"trace_id": TRACE_ID})).unwrap_err();
        assert_eq!(err, ConversionError::MissingField("span_id"));
    }

    #[test]
    fn test_root_span_parent_forms() {
        for parent in [json!(null), json!(""), json!("0000000000000000")] {
            let mut record = span_json();
            record["parent_span_id"] = parent;
            assert!(span_from_json(&record).unwrap().parent_span_id.is_empty());
        }
        let mut record = span_json();
        record.as_object_mut().unwrap().remove("parent_span_id");
        assert!(span_from_json(&record).unwrap().parent_span_id.is_empty());
    }

    #[test]
    fn test_unknown_span_enums_are_forwarded() {
        let mut record = span_json();
        record["kind"] = json!(6);
        record["status"]["code"] = json!(3);
        let span = span_from_json(&record).unwrap();
        assert_eq!(span.kind, 6);
        assert_eq!(span.status.unwrap().code, 3);
    }

    #[test]
    fn test_enum_must_fit_i32() {
        let mut record = span_json();
        record["kind"] = json!(1_i64 << 40);
        assert!(matches!(
            span_from_json(&record),
            Err(ConversionError::InvalidType { field: "kind", .. })
        ));

        record["kind"] = json!(1.5);
        assert!(span_from_json(&record).is_err());
    }

    #[test]
    fn test_timestamps_accept_decimal_strings() {
        let mut record = span_json();
        record["start_time"] = json!("1700000000000000000");
        let span = span_from_json(&record).unwrap();
        assert_eq!(span.start_time_unix_nano, 1_700_000_000_000_000_000);

        record["end_time"] = json!(-1);
        assert!(span_from_json(&record).is_err());
    }

    #[test]
    fn test_span_attributes_are_coerced() {
        let mut record = span_json();
        record["attributes"] = json!([
            {"key": "http.status_code", "value": 503},
            {"key": "tags", "value": ["a", "b"]}
        ]);
        let span = span_from_json(&record).unwrap();
        assert_eq!(span.attributes.len(), 1);
        assert_eq!(span.dropped_attributes_count, 1);
    }

    // ==========================================================================
    // Log records
    // ==========================================================================

    #[test]
    fn test_log_fields() {
        let record = log_record_from_json(&log_json()).unwrap();
        assert_eq!(record.time_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(record.observed_time_unix_nano, 1_700_000_000_000_000_100);
        assert_eq!(record.severity_number, 9);
        assert_eq!(record.severity_text, "INFO");
        assert_eq!(
            record.body.unwrap().value,
            Some(any_value::Value::StringValue("order placed".into()))
        );
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(record.trace_id.len(), 16);
        assert_eq!(record.span_id.len(), 8);
    }

    #[test]
    fn test_nested_attribute_dropped_record_kept() {
        let mut record = log_json();
        record["attributes"] = json!([
            {"key": "order.id", "value": "A-1"},
            {"key": "customer", "value": {"tier": "gold"}}
        ]);
        let record = log_record_from_json(&record).unwrap();
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(record.attributes[0].key, "order.id");
        assert_eq!(record.dropped_attributes_count, 1);
    }

    #[test]
    fn test_invalid_trace_id_drops_both_correlation_ids() {
        let mut record = log_json();
        record["trace_id"] = json!("not-hex");
        let record = log_record_from_json(&record).unwrap();
        assert!(record.trace_id.is_empty());
        assert!(record.span_id.is_empty());
        assert_eq!(record.severity_text, "INFO");
    }

    #[test]
    fn test_invalid_span_id_drops_only_span_id() {
        let mut record = log_json();
        record["span_id"] = json!("abc");
        let record = log_record_from_json(&record).unwrap();
        assert_eq!(record.trace_id.len(), 16);
        assert!(record.span_id.is_empty());
    }

    #[test]
    fn test_event_name_becomes_attribute() {
        let mut record = log_json();
        record["event_name"] = json!("checkout.completed");
        let record = log_record_from_json(&record).unwrap();
        let event = record
            .attributes
            .iter()
            .find(|kv| kv.key == "event.name")
            .unwrap();
        assert_eq!(
            event.value.as_ref().unwrap().value,
            Some(any_value::Value::StringValue("checkout.completed".into()))
        );
    }

    #[test]
    fn test_unknown_severity_is_forwarded() {
        let mut record = log_json();
        record["severity_number"] = json!(25);
        let record = log_record_from_json(&record).unwrap();
        assert_eq!(record.severity_number, 25);
    }

    #[test]
    fn test_non_string_body_is_rejected() {
        let mut record = log_json();
        record["body"] = json!({"message": "structured"});
        assert!(matches!(
            log_record_from_json(&record),
            Err(ConversionError::InvalidType { field: "body", .. })
        ));
    }

    // ==========================================================================
    // Batches
    // ==========================================================================

    #[test]
    fn test_convert_single_record() {
        let batch = convert(&span_json(), SignalKind::Traces).unwrap();
        assert_eq!(batch.span_count(), 1);
        assert!(batch.logs().is_none());

        let batch = convert(&log_json(), SignalKind::Logs).unwrap();
        assert_eq!(batch.log_record_count(), 1);
        assert!(batch.traces().is_none());
    }

    #[test]
    fn test_convert_records_merges_into_one_scope() {
        let batch = convert_records(&[span_json(), span_json(), log_json()]).unwrap();
        let traces = batch.traces().unwrap();
        assert_eq!(traces.resource_spans.len(), 1);
        assert_eq!(traces.resource_spans[0].scope_spans.len(), 1);
        assert_eq!(batch.span_count(), 2);
        assert_eq!(batch.log_record_count(), 1);
    }

    #[test]
    fn test_one_bad_record_fails_the_payload() {
        let mut bad = span_json();
        bad["trace_id"] = json!("0123456789");
        assert!(convert_records(&[span_json(), bad]).is_err());
    }

    #[test]
    fn test_convert_records_rejects_empty_and_scalars() {
        assert_eq!(convert_records(&[]).unwrap_err(), ConversionError::Empty);
        assert_eq!(
            convert_records(&[json!(42)]).unwrap_err(),
            ConversionError::NotAnObject("a number")
        );
    }
}
