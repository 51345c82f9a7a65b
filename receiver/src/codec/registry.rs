//! Codec Registry (format detection)
//!
//! Holds codecs in priority order and runs them against a payload until one
//! succeeds.
//!
//! # Invariants
//!
//! - Codecs run strictly in registration order; the first success wins and
//!   no later codec is invoked
//! - A payload is base64-decoded at most once per `detect` call, however
//!   many base64-framed codecs are registered
//! - A failing codec never stops the chain; only exhausting it does

use super::{Codec, CodecError, DecodeAttempt, Framing, JsonCodec, OtlpProtoCodec};
use base64::Engine as _;
use laituri_core::TelemetryBatch;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// How many payload bytes a [`DetectError`] keeps for diagnostics
const PREVIEW_LEN: usize = 32;

/// Successful detection: the winning codec and its batch
#[derive(Debug)]
pub struct Detected {
    /// Name of the codec that decoded the payload
    pub codec: &'static str,
    /// Decoded telemetry
    pub batch: TelemetryBatch,
}

/// Every codec rejected the payload
#[derive(Error, Debug)]
#[error("no codec could decode {payload_len}-byte payload: {}", Failures(.failures))]
pub struct DetectError {
    /// Each codec's rejection, in the order they ran
    pub failures: Vec<(&'static str, CodecError)>,
    /// Size of the rejected payload
    pub payload_len: usize,
    /// First bytes of the rejected payload
    pub preview: Vec<u8>,
}

struct Failures<'a>(&'a [(&'static str, CodecError)]);

impl fmt::Display for Failures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (codec, error)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{codec}: {error}")?;
        }
        Ok(())
    }
}

/// Ordered set of codecs
///
/// Populated at startup and read-only afterwards.
///
/// # Example
///
/// ```ignore
/// use laituri_receiver::codec::CodecRegistry;
///
/// let registry = CodecRegistry::standard();
/// let detected = registry.detect(payload)?;
/// println!("decoded by {}", detected.codec);
/// ```
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    /// The standard chain: binary, base64 binary, base64 JSON, JSON
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(Arc::new(OtlpProtoCodec::new(Framing::Raw)));
        registry.add(Arc::new(OtlpProtoCodec::new(Framing::Base64)));
        registry.add(Arc::new(JsonCodec::new(Framing::Base64)));
        registry.add(Arc::new(JsonCodec::new(Framing::Raw)));
        registry
    }

    /// Append a codec at the lowest priority
    pub fn add(&mut self, codec: Arc<dyn Codec>) {
        info!(
            codec = codec.name(),
            priority = self.codecs.len(),
            "Registered codec"
        );
        self.codecs.push(codec);
    }

    /// Codec names in priority order
    pub fn names(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|c| c.name()).collect()
    }

    /// Number of registered codecs
    pub fn count(&self) -> usize {
        self.codecs.len()
    }

    /// Decode `raw` with the first codec that accepts it
    ///
    /// # Errors
    /// [`DetectError`] with every codec's rejection when none accepts it.
    pub fn detect(&self, raw: &[u8]) -> Result<Detected, DetectError> {
        let mut unwrapped: Option<Result<Vec<u8>, CodecError>> = None;
        let mut failures = Vec::new();

        for codec in &self.codecs {
            let attempt = attempt(codec.as_ref(), raw, &mut unwrapped);
            match attempt.outcome {
                Ok(batch) => {
                    debug!(
                        codec = attempt.codec,
                        bytes = raw.len(),
                        spans = batch.span_count(),
                        log_records = batch.log_record_count(),
                        "Payload decoded"
                    );
                    return Ok(Detected {
                        codec: attempt.codec,
                        batch,
                    });
                }
                Err(error) => failures.push((attempt.codec, error)),
            }
        }

        Err(DetectError {
            failures,
            payload_len: raw.len(),
            preview: raw[..raw.len().min(PREVIEW_LEN)].to_vec(),
        })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn attempt(
    codec: &dyn Codec,
    raw: &[u8],
    unwrapped: &mut Option<Result<Vec<u8>, CodecError>>,
) -> DecodeAttempt {
    let outcome = match codec.framing() {
        Framing::Raw => codec.decode(raw),
        Framing::Base64 => match unwrapped.get_or_insert_with(|| unwrap_base64(raw)) {
            Ok(bytes) => codec.decode(bytes),
            Err(e) => Err(e.clone()),
        },
    };
    DecodeAttempt {
        codec: codec.name(),
        outcome,
    }
}

fn unwrap_base64(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let text = std::str::from_utf8(raw).map_err(|e| CodecError::Base64(e.to_string()))?;
    let text = text.trim_ascii();
    if text.is_empty() {
        return Err(CodecError::Empty);
    }
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CodecError::Base64(e.to_string()))
}
