//! Prometheus metrics for the receiver
//!
//! Metrics live on an explicit [`Registry`] rather than the process-global
//! default one, so several receivers (or several tests) can coexist.

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metric name prefix
const NAMESPACE: &str = "laituri";

/// All receiver metrics
#[derive(Clone)]
pub struct ReceiverMetrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────
    /// Messages received from the broker (by redelivered = "true"/"false")
    pub messages_received: IntCounterVec,

    /// Messages decoded (by codec)
    pub messages_decoded: IntCounterVec,

    /// Messages no codec could decode
    pub decode_failures: IntCounter,

    // ─────────────────────────────────────────────────────────────────────────
    // Downstream
    // ─────────────────────────────────────────────────────────────────────────
    /// Records handed to the consumer (by signal)
    pub records_forwarded: IntCounterVec,

    /// Consumer rejections (by signal)
    pub consumer_failures: IntCounterVec,

    /// Acknowledgment results (by outcome: acked, auto, failed)
    pub acks: IntCounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────
    /// Messages currently between receipt and settlement
    pub in_flight: IntGauge,

    /// Time from receipt to settlement, in seconds
    pub dispatch_duration_seconds: Histogram,
}

impl ReceiverMetrics {
    /// Create the metrics and register them on `registry`
    ///
    /// # Errors
    /// Fails if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            messages_received: IntCounterVec::new(
                Opts::new("messages_received_total", "Messages received from the broker")
                    .namespace(NAMESPACE),
                &["redelivered"],
            )?,
            messages_decoded: IntCounterVec::new(
                Opts::new("messages_decoded_total", "Messages decoded, by codec")
                    .namespace(NAMESPACE),
                &["codec"],
            )?,
            decode_failures: IntCounter::with_opts(
                Opts::new("decode_failures_total", "Messages no codec could decode")
                    .namespace(NAMESPACE),
            )?,
            records_forwarded: IntCounterVec::new(
                Opts::new("records_forwarded_total", "Spans and log records handed downstream")
                    .namespace(NAMESPACE),
                &["signal"],
            )?,
            consumer_failures: IntCounterVec::new(
                Opts::new("consumer_failures_total", "Batches rejected by the consumer")
                    .namespace(NAMESPACE),
                &["signal"],
            )?,
            acks: IntCounterVec::new(
                Opts::new("acks_total", "Acknowledgment results").namespace(NAMESPACE),
                &["outcome"],
            )?,
            in_flight: IntGauge::with_opts(
                Opts::new("in_flight", "Messages currently being dispatched").namespace(NAMESPACE),
            )?,
            dispatch_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "dispatch_duration_seconds",
                    "Time from receipt to settlement",
                )
                .namespace(NAMESPACE)
                // Buckets: 100us to 10s
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
                ]),
            )?,
        };

        registry.register(Box::new(metrics.messages_received.clone()))?;
        registry.register(Box::new(metrics.messages_decoded.clone()))?;
        registry.register(Box::new(metrics.decode_failures.clone()))?;
        registry.register(Box::new(metrics.records_forwarded.clone()))?;
        registry.register(Box::new(metrics.consumer_failures.clone()))?;
        registry.register(Box::new(metrics.acks.clone()))?;
        registry.register(Box::new(metrics.in_flight.clone()))?;
        registry.register(Box::new(metrics.dispatch_duration_seconds.clone()))?;

        Ok(metrics)
    }

    /// Metrics registered on a private registry nobody scrapes
    pub fn detached() -> Result<Self> {
        Self::new(&Registry::new())
    }
}

/// Render everything on `registry` in the Prometheus text format
pub fn gather(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
