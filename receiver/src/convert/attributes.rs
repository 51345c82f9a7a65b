//! JSON attribute coercion
//!
//! OTLP attribute values are typed; JSON values are not quite. A value maps
//! onto exactly one of string, bool, int or double. Anything else (null,
//! arrays, nested objects) has no scalar counterpart and the attribute is
//! dropped, with the drop counted on the owning record.

use super::ConversionError;
use laituri_core::proto::{AnyValue, KeyValue, any_value};
use serde_json::{Map, Value};

/// Attributes that survived coercion plus how many were dropped
#[derive(Debug, Default)]
pub(crate) struct Attributes {
    pub(crate) kept: Vec<KeyValue>,
    pub(crate) dropped: u32,
}

impl Attributes {
    pub(crate) fn push_str(&mut self, key: &str, value: &str) {
        self.kept.push(KeyValue {
            key: key.to_string(),
            value: Some(string_value(value)),
        });
    }
}

pub(crate) fn string_value(s: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(s.to_string())),
    }
}

/// Map a JSON scalar onto an OTLP value
pub(crate) fn coerce(value: &Value) -> Option<AnyValue> {
    let value = match value {
        Value::String(s) => any_value::Value::StringValue(s.clone()),
        Value::Bool(b) => any_value::Value::BoolValue(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => any_value::Value::IntValue(i),
            None => any_value::Value::DoubleValue(n.as_f64()?),
        },
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    Some(AnyValue { value: Some(value) })
}

/// Read the `attributes` array of a record
///
/// Each entry is `{"key": "...", "value": ...}`. Entries without a string
/// key or with a non-scalar value are dropped and counted.
pub(crate) fn from_record(record: &Map<String, Value>) -> Result<Attributes, ConversionError> {
    let mut attributes = Attributes::default();

    let entries = match record.get("attributes") {
        None | Some(Value::Null) => return Ok(attributes),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ConversionError::InvalidType {
                field: "attributes",
                expected: "an array of {key, value} objects",
            });
        }
    };

    for entry in entries {
        let key = entry.get("key").and_then(Value::as_str);
        let value = entry.get("value").and_then(coerce);
        match (key, value) {
            (Some(key), Some(value)) => attributes.kept.push(KeyValue {
                key: key.to_string(),
                value: Some(value),
            }),
            _ => attributes.dropped += 1,
        }
    }

    Ok(attributes)
}
