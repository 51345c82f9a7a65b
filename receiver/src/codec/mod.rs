//! Codec system for laituri
//!
//! Codecs turn the raw payload of a broker message into a [`TelemetryBatch`].
//! The receiver does not know up front which encoding a producer used, so
//! the [`CodecRegistry`] tries every codec in priority order until one
//! succeeds.
//!
//! # Architecture
//!
//! ```text
//! raw bytes ──► CodecRegistry::detect ──► Detected { codec, batch }
//!                 │
//!                 ├─ otlp_proto          (raw bytes)
//!                 ├─ base64+otlp_proto   (base64 text, decoded once)
//!                 ├─ base64+json         (same decoded bytes)
//!                 └─ json                (raw bytes)
//! ```
//!
//! # Built-in Codecs
//!
//! - `OtlpProtoCodec` - OTLP `Export*ServiceRequest` protobuf envelopes
//! - `JsonCodec` - flat JSON span / log record documents

mod binary;
mod json;
mod registry;

pub use binary::OtlpProtoCodec;
pub use json::JsonCodec;
pub use registry::{CodecRegistry, DetectError, Detected};

use crate::convert::ConversionError;
use laituri_core::TelemetryBatch;
use thiserror::Error;

/// How a codec's input is framed inside the message payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The payload bytes as delivered
    Raw,
    /// The payload is base64 text; the codec sees the decoded bytes
    Base64,
}

/// Why a single codec rejected a payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Nothing to decode
    #[error("empty payload")]
    Empty,

    /// Payload is not valid base64 text
    #[error("invalid base64: {0}")]
    Base64(String),

    /// Protobuf parse failure
    #[error("invalid protobuf: {0}")]
    Protobuf(String),

    /// Protobuf parsed but the envelope is unusable
    #[error("invalid envelope: {0}")]
    Envelope(String),

    /// Payload is not UTF-8 text
    #[error("invalid UTF-8: {0}")]
    Utf8(String),

    /// JSON parse failure
    #[error("invalid JSON: {0}")]
    Json(String),

    /// JSON parsed but could not be mapped onto spans or log records
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl From<prost::DecodeError> for CodecError {
    fn from(e: prost::DecodeError) -> Self {
        CodecError::Protobuf(e.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}

/// One step of a detection run: which codec ran and what it produced
#[derive(Debug)]
pub struct DecodeAttempt {
    /// Codec name
    pub codec: &'static str,
    /// Decoded batch, or the reason the codec rejected the payload
    pub outcome: Result<TelemetryBatch, CodecError>,
}

impl DecodeAttempt {
    /// Whether this attempt produced a batch
    pub fn is_decoded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Codec trait - interprets a payload as one wire format
///
/// Codecs are pure: no I/O, no shared state. A failure is only a negative
/// result for this codec; the registry moves on to the next one.
///
/// # Implementing a Codec
///
/// ```ignore
/// use laituri_receiver::codec::{Codec, CodecError, Framing};
/// use laituri_core::TelemetryBatch;
///
/// struct MsgpackCodec;
///
/// impl Codec for MsgpackCodec {
///     fn name(&self) -> &'static str {
///         "msgpack"
///     }
///
///     fn framing(&self) -> Framing {
///         Framing::Raw
///     }
///
///     fn decode(&self, data: &[u8]) -> Result<TelemetryBatch, CodecError> {
///         todo!()
///     }
/// }
/// ```
pub trait Codec: Send + Sync {
    /// Unique name for this codec (for logs and metric labels)
    fn name(&self) -> &'static str;

    /// Framing the registry must strip before calling [`decode`](Self::decode)
    fn framing(&self) -> Framing;

    /// Decode `data` into a batch
    ///
    /// # Errors
    /// Any [`CodecError`] means "not this format".
    fn decode(&self, data: &[u8]) -> Result<TelemetryBatch, CodecError>;
}
