//! Fixed-width trace and span identifiers
//!
//! OTLP carries identifiers as raw `bytes`; producers writing JSON carry them
//! as lowercase hex. [`TraceId`] (16 bytes) and [`SpanId`] (8 bytes) are the
//! only way into the canonical model: an identifier of any other width is
//! rejected, never truncated or zero-padded.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why an identifier could not be built
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdError {
    /// Input had the wrong width
    #[error("expected {expected} {unit}, got {actual}")]
    Length {
        /// Required width
        expected: usize,
        /// Width that was supplied
        actual: usize,
        /// "hex characters" or "bytes"
        unit: &'static str,
    },

    /// Input contained a non-hex character
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

macro_rules! fixed_width_id {
    ($(#[$meta:meta])* $name:ident, $width:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name([u8; $width]);

        impl $name {
            /// Width in bytes
            pub const WIDTH: usize = $width;

            /// The all-zero identifier
            pub const ZERO: Self = Self([0; $width]);

            /// Wrap raw bytes
            pub const fn from_bytes(bytes: [u8; $width]) -> Self {
                Self(bytes)
            }

            /// Build from a byte slice of exactly [`Self::WIDTH`] bytes
            pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
                let array: [u8; $width] = bytes.try_into().map_err(|_| IdError::Length {
                    expected: $width,
                    actual: bytes.len(),
                    unit: "bytes",
                })?;
                Ok(Self(array))
            }

            /// Decode from exactly `2 * WIDTH` hex characters (either case)
            pub fn from_hex(s: &str) -> Result<Self, IdError> {
                if s.len() != $width * 2 {
                    return Err(IdError::Length {
                        expected: $width * 2,
                        actual: s.len(),
                        unit: "hex characters",
                    });
                }
                let mut bytes = [0u8; $width];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }

            /// Raw bytes
            pub const fn to_bytes(self) -> [u8; $width] {
                self.0
            }

            /// Owned bytes, the representation used by OTLP messages
            pub fn to_vec(self) -> Vec<u8> {
                self.0.to_vec()
            }

            /// Whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

fixed_width_id!(
    /// 16-byte trace identifier
    TraceId,
    16
);

fixed_width_id!(
    /// 8-byte span identifier
    SpanId,
    8
);
