//! JSON codec - for flat JSON span and log record documents
//!
//! Supports:
//! - Single JSON object
//! - JSON array of objects
//! - Newline-delimited JSON (NDJSON/JSON Lines)

use super::{Codec, CodecError, Framing};
use crate::convert;
use laituri_core::TelemetryBatch;
use serde_json::Value;

/// JSON codec
///
/// Accepts records in multiple layouts:
/// - Single object: `{"trace_id": "...", ...}`
/// - Array: `[{...}, {...}]`
/// - Newline-delimited: `{...}\n{...}\n{...}`
///
/// Each record is classified as a span or a log record and converted; all
/// records of a payload end up in one batch. See [`crate::convert`] for the
/// field mapping.
pub struct JsonCodec {
    framing: Framing,
}

impl JsonCodec {
    /// Create a codec reading JSON with the given framing
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(Framing::Raw)
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        match self.framing {
            Framing::Raw => "json",
            Framing::Base64 => "base64+json",
        }
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn decode(&self, data: &[u8]) -> Result<TelemetryBatch, CodecError> {
        let text = std::str::from_utf8(data).map_err(|e| CodecError::Utf8(e.to_string()))?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CodecError::Empty);
        }

        let records = if trimmed.starts_with('[') {
            parse_array(trimmed)?
        } else {
            // A pretty-printed object spans lines, so try it whole first
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => vec![value],
                Err(single) if trimmed.lines().nth(1).is_some() => {
                    parse_ndjson(trimmed).map_err(|_| CodecError::from(single))?
                }
                Err(single) => return Err(single.into()),
            }
        };

        Ok(convert::convert_records(&records)?)
    }
}

fn parse_array(text: &str) -> Result<Vec<Value>, CodecError> {
    Ok(serde_json::from_str(text)?)
}

fn parse_ndjson(text: &str) -> Result<Vec<Value>, CodecError> {
    let mut records = Vec::new();

    for (line_num, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = serde_json::from_str(trimmed)
            .map_err(|e| CodecError::Json(format!("line {}: {}", line_num + 1, e)))?;
        records.push(record);
    }

    Ok(records)
}
