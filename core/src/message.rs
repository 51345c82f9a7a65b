//! Inbound broker message
//!
//! A [`RawMessage`] is what a broker adapter hands to the dispatch pipeline:
//! the payload exactly as it arrived plus a [`DeliveryReceipt`] the adapter
//! understands when it is time to acknowledge.
//!
//! ```text
//! broker ──► RawMessage { payload, receipt } ──► detect ──► consumer
//!                                  │                            │
//!                                  └──────── ack(receipt) ◄─────┘
//! ```
//!
//! The payload is `Bytes`, so adapters can hand over their receive buffer
//! without copying. Acknowledging takes the message by value
//! ([`RawMessage::into_receipt`]), which makes a second acknowledgment of the
//! same delivery impossible to express.

use bytes::Bytes;
use std::fmt;

/// Broker-assigned token identifying one delivery
///
/// Opaque to everything except the adapter that created it. `partition` is
/// the broker's delivery channel (a Kafka partition, a flow id, or 0 for
/// single-channel queues) and `sequence` the position within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryReceipt {
    partition: i32,
    sequence: i64,
}

impl DeliveryReceipt {
    /// Create a receipt
    pub const fn new(partition: i32, sequence: i64) -> Self {
        Self {
            partition,
            sequence,
        }
    }

    /// Delivery channel the message arrived on
    pub const fn partition(&self) -> i32 {
        self.partition
    }

    /// Position of the message within its channel
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.sequence)
    }
}

/// A message as delivered by the broker
///
/// Never mutated after construction. The dispatch pipeline owns it for the
/// duration of one dispatch and either acknowledges it (consuming it) or
/// drops it, leaving it eligible for broker redelivery.
#[derive(Clone)]
pub struct RawMessage {
    payload: Option<Bytes>,
    receipt: DeliveryReceipt,
    redelivered: bool,
}

impl RawMessage {
    /// Create a message carrying a payload
    pub fn new(payload: impl Into<Bytes>, receipt: DeliveryReceipt) -> Self {
        Self {
            payload: Some(payload.into()),
            receipt,
            redelivered: false,
        }
    }

    /// Create a message with no binary attachment
    pub fn empty(receipt: DeliveryReceipt) -> Self {
        Self {
            payload: None,
            receipt,
            redelivered: false,
        }
    }

    /// Mark the message as a broker redelivery
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Payload bytes, if the message has any
    pub fn payload_as_bytes(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Payload as UTF-8 text, if present and valid UTF-8
    pub fn payload_as_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Payload length in bytes (0 when absent)
    pub fn len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Whether the payload is absent or empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receipt used to acknowledge this delivery
    pub fn receipt(&self) -> DeliveryReceipt {
        self.receipt
    }

    /// Whether the broker flagged this as a redelivery
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Consume the message, keeping only what acknowledgment needs
    pub fn into_receipt(self) -> DeliveryReceipt {
        self.receipt
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("receipt", &self.receipt)
            .field("len", &self.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
