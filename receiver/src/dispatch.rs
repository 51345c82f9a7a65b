//! Dispatch pipeline - decode, consume, acknowledge
//!
//! One inbound message goes through these steps, strictly in order and
//! inside the task that received it:
//!
//! ```text
//! RawMessage ──► detect ──► consume_traces / consume_logs ──► ack
//!                  │                    │                      │
//!             decode failed      consumer failed          ack failed
//!                  └──────── left unacknowledged ──────────────┘
//! ```
//!
//! Nothing is retried here. A message that is not acknowledged stays on the
//! broker and comes back as a redelivery.
//!
//! # Invariants
//!
//! - A message is acknowledged only after every consumer call returned `Ok`
//! - A message is acknowledged at most once (acknowledging consumes it)
//! - Every message counts as in flight from receipt until it is settled or
//!   abandoned, whichever way the dispatch ends

use crate::broker::AckMode;
use crate::codec::CodecRegistry;
use crate::metrics::ReceiverMetrics;
use laituri_core::{DeliveryReceipt, RawMessage, SignalKind, TelemetryBatch, TelemetryConsumer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, warn};

// ============================================================================
// In-flight tracking
// ============================================================================

/// Counts messages currently being dispatched
///
/// Shutdown waits on [`wait_idle`](Self::wait_idle) so no message is cut off
/// half-way between consumer and acknowledgment.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message in; it counts out when the guard drops
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { in_flight: self }
    }

    /// Messages currently in flight
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once nothing is in flight
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            // register before reading the count so the last exit is not missed
            idle.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Keeps one message counted as in flight
#[must_use = "the message stops counting as in flight when the guard drops"]
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// How a dispatch ended
///
/// Informational only: every outcome has already been logged and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Consumed and acknowledged
    Acknowledged,
    /// Consumed; the broker acknowledged on delivery
    AutoAcknowledged,
    /// Message had no payload; left unacknowledged
    NoPayload,
    /// No codec accepted the payload; left unacknowledged
    DecodeFailed,
    /// The consumer rejected the batch; left unacknowledged
    ConsumerFailed,
    /// Consumed, but the acknowledgment itself failed
    AckFailed,
}

impl DispatchOutcome {
    /// Whether the consumer accepted the batch
    pub fn is_consumed(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Acknowledged
                | DispatchOutcome::AutoAcknowledged
                | DispatchOutcome::AckFailed
        )
    }

    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Acknowledged => "acknowledged",
            DispatchOutcome::AutoAcknowledged => "auto_acknowledged",
            DispatchOutcome::NoPayload => "no_payload",
            DispatchOutcome::DecodeFailed => "decode_failed",
            DispatchOutcome::ConsumerFailed => "consumer_failed",
            DispatchOutcome::AckFailed => "ack_failed",
        }
    }
}

/// Decodes messages, hands them to the consumer and settles them
///
/// # Example
///
/// ```ignore
/// use laituri_receiver::dispatch::DispatchPipeline;
///
/// let pipeline = DispatchPipeline::new(consumer, queue_consumer.ack_mode())
///     .with_metrics(metrics)
///     .with_span(span);
///
/// while let Some(msg) = queue_consumer.receive().await {
///     pipeline.handle(msg).await;
/// }
/// ```
pub struct DispatchPipeline {
    codecs: Arc<CodecRegistry>,
    consumer: Arc<dyn TelemetryConsumer>,
    ack: AckMode,
    in_flight: Arc<InFlight>,
    metrics: Option<ReceiverMetrics>,
    span: tracing::Span,
}

impl DispatchPipeline {
    /// Pipeline with the standard codec chain and its own in-flight counter
    pub fn new(consumer: Arc<dyn TelemetryConsumer>, ack: AckMode) -> Self {
        Self {
            codecs: Arc::new(CodecRegistry::standard()),
            consumer,
            ack,
            in_flight: Arc::new(InFlight::new()),
            metrics: None,
            span: tracing::Span::none(),
        }
    }

    /// Use a different codec chain
    pub fn with_codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Share an in-flight counter (the receiver's)
    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Record metrics
    pub fn with_metrics(mut self, metrics: ReceiverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run every dispatch inside `span`
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// The in-flight counter this pipeline reports to
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Decode a raw message and dispatch it
    ///
    /// Decoding counts as in flight too.
    pub async fn handle(&self, raw: RawMessage) -> DispatchOutcome {
        async {
            let _tracked = self.track();

            if let Some(m) = &self.metrics {
                m.messages_received
                    .with_label_values(&[if raw.is_redelivered() { "true" } else { "false" }])
                    .inc();
            }
            if raw.is_redelivered() {
                debug!(receipt = %raw.receipt(), "Processing redelivered message");
            }

            let Some(payload) = raw.payload_as_bytes() else {
                warn!(receipt = %raw.receipt(), "Message has no payload, leaving unacknowledged");
                return DispatchOutcome::NoPayload;
            };

            let detected = match self.codecs.detect(payload) {
                Ok(detected) => detected,
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.decode_failures.inc();
                    }
                    warn!(
                        receipt = %raw.receipt(),
                        bytes = e.payload_len,
                        "No codec could decode message, leaving unacknowledged"
                    );
                    debug!(
                        receipt = %raw.receipt(),
                        preview = %hex::encode(&e.preview),
                        error = %e,
                        "Decode attempts"
                    );
                    return DispatchOutcome::DecodeFailed;
                }
            };

            if let Some(m) = &self.metrics {
                m.messages_decoded.with_label_values(&[detected.codec]).inc();
            }
            self.deliver(detected.batch, raw.into_receipt()).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Dispatch an already-decoded batch
    pub async fn dispatch(&self, batch: TelemetryBatch, raw: RawMessage) -> DispatchOutcome {
        async {
            let _tracked = self.track();
            self.deliver(batch, raw.into_receipt()).await
        }
        .instrument(self.span.clone())
        .await
    }

    async fn deliver(&self, batch: TelemetryBatch, receipt: DeliveryReceipt) -> DispatchOutcome {
        let consumer = self.consumer.name();

        if let Some(traces) = batch.traces() {
            if let Err(e) = self.consumer.consume_traces(traces).await {
                self.consumer_failed(SignalKind::Traces, receipt, &e);
                return DispatchOutcome::ConsumerFailed;
            }
            self.forwarded(SignalKind::Traces, batch.span_count());
        }

        if let Some(logs) = batch.logs() {
            if let Err(e) = self.consumer.consume_logs(logs).await {
                self.consumer_failed(SignalKind::Logs, receipt, &e);
                return DispatchOutcome::ConsumerFailed;
            }
            self.forwarded(SignalKind::Logs, batch.log_record_count());
        }

        debug!(
            consumer,
            %receipt,
            spans = batch.span_count(),
            log_records = batch.log_record_count(),
            "Batch consumed"
        );

        self.settle(receipt).await
    }

    async fn settle(&self, receipt: DeliveryReceipt) -> DispatchOutcome {
        let outcome = match &self.ack {
            AckMode::Auto => DispatchOutcome::AutoAcknowledged,
            AckMode::Client(acker) => match acker.ack(receipt).await {
                Ok(()) => DispatchOutcome::Acknowledged,
                Err(e) => {
                    error!(%receipt, error = %e, "Failed to acknowledge message");
                    DispatchOutcome::AckFailed
                }
            },
        };

        if let Some(m) = &self.metrics {
            let label = match outcome {
                DispatchOutcome::Acknowledged => "acked",
                DispatchOutcome::AutoAcknowledged => "auto",
                _ => "failed",
            };
            m.acks.with_label_values(&[label]).inc();
        }
        outcome
    }

    fn consumer_failed(&self, signal: SignalKind, receipt: DeliveryReceipt, e: &laituri_core::PluginError) {
        if let Some(m) = &self.metrics {
            m.consumer_failures.with_label_values(&[signal.as_str()]).inc();
        }
        error!(
            consumer = self.consumer.name(),
            %signal,
            %receipt,
            error = %e,
            "Consumer rejected batch, leaving unacknowledged"
        );
    }

    fn forwarded(&self, signal: SignalKind, records: usize) {
        if let Some(m) = &self.metrics {
            m.records_forwarded
                .with_label_values(&[signal.as_str()])
                .inc_by(records as u64);
        }
    }

    fn track(&self) -> Tracked<'_> {
        if let Some(m) = &self.metrics {
            m.in_flight.inc();
        }
        Tracked {
            _guard: self.in_flight.enter(),
            metrics: self.metrics.as_ref(),
            started: Instant::now(),
        }
    }
}

/// In-flight guard that also feeds the gauge and latency histogram
struct Tracked<'a> {
    _guard: InFlightGuard<'a>,
    metrics: Option<&'a ReceiverMetrics>,
    started: Instant,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.metrics {
            m.in_flight.dec();
            m.dispatch_duration_seconds
                .observe(self.started.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::Acknowledger;
    use async_trait::async_trait;
    use laituri_core::PluginError;
    use laituri_core::proto::{ExportLogsServiceRequest, ExportTraceServiceRequest};
    use parking_lot::Mutex;
    use std::time::Duration;

    const SPAN_JSON: &[u8] = br#"{"trace_id":"0123456789abcdef0123456789abcdef","span_id":"abcdef0123456789","name":"op"}"#;
    const LOG_JSON: &[u8] = br#"{"severity_text":"INFO","body":"hello"}"#;

    // ==========================================================================
    // Test doubles
    // ==========================================================================

    #[derive(Default)]
    struct Capture {
        traces: Mutex<Vec<ExportTraceServiceRequest>>,
        logs: Mutex<Vec<ExportLogsServiceRequest>>,
        fail_logs: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TelemetryConsumer for Capture {
        fn name(&self) -> &'static str {
            "capture"
        }

        async fn consume_traces(&self, traces: &ExportTraceServiceRequest) -> Result<(), PluginError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.traces.lock().push(traces.clone());
            Ok(())
        }

        async fn consume_logs(&self, logs: &ExportLogsServiceRequest) -> Result<(), PluginError> {
            if self.fail_logs {
                return Err(PluginError::Consume("collector unavailable".into()));
            }
            self.logs.lock().push(logs.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAcker {
        acked: Mutex<Vec<DeliveryReceipt>>,
        fail: bool,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self, receipt: DeliveryReceipt) -> Result<(), PluginError> {
            if self.fail {
                return Err(PluginError::Ack("session closed".into()));
            }
            self.acked.lock().push(receipt);
            Ok(())
        }
    }

    fn msg(payload: &'static [u8], sequence: i64) -> RawMessage {
        RawMessage::new(payload, DeliveryReceipt::new(0, sequence))
    }

    fn pipeline(consumer: Arc<Capture>, acker: Arc<RecordingAcker>) -> DispatchPipeline {
        DispatchPipeline::new(consumer, AckMode::Client(acker))
            .with_metrics(ReceiverMetrics::detached().unwrap())
    }

    // ==========================================================================
    // Acknowledgment
    // ==========================================================================

    #[tokio::test]
    async fn test_success_acks_exactly_once() {
        let consumer = Arc::new(Capture::default());
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(consumer.clone(), acker.clone());

        let outcome = pipeline.handle(msg(SPAN_JSON, 7)).await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged);
        assert_eq!(consumer.traces.lock().len(), 1);
        assert_eq!(*acker.acked.lock(), vec![DeliveryReceipt::new(0, 7)]);
    }

    #[tokio::test]
    async fn test_consumer_failure_is_not_acked() {
        let consumer = Arc::new(Capture {
            fail_logs: true,
            ..Default::default()
        });
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(consumer, acker.clone());

        let outcome = pipeline.handle(msg(LOG_JSON, 1)).await;

        assert_eq!(outcome, DispatchOutcome::ConsumerFailed);
        assert!(acker.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_skips_consumer_and_ack() {
        let consumer = Arc::new(Capture::default());
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(consumer.clone(), acker.clone());

        let bad = br#"{"trace_id":"0123456789","span_id":"abcdef0123456789"}"#;
        let outcome = pipeline.handle(msg(bad, 1)).await;

        assert_eq!(outcome, DispatchOutcome::DecodeFailed);
        assert!(consumer.traces.lock().is_empty());
        assert!(acker.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload() {
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(Arc::new(Capture::default()), acker.clone());

        let outcome = pipeline
            .handle(RawMessage::empty(DeliveryReceipt::new(0, 1)))
            .await;

        assert_eq!(outcome, DispatchOutcome::NoPayload);
        assert!(acker.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ack_failure_is_terminal() {
        let consumer = Arc::new(Capture::default());
        let acker = Arc::new(RecordingAcker {
            fail: true,
            ..Default::default()
        });
        let pipeline = pipeline(consumer.clone(), acker);

        let outcome = pipeline.handle(msg(SPAN_JSON, 1)).await;

        assert_eq!(outcome, DispatchOutcome::AckFailed);
        assert!(outcome.is_consumed());
        assert_eq!(consumer.traces.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_ack_sends_nothing() {
        let consumer = Arc::new(Capture::default());
        let pipeline = DispatchPipeline::new(consumer.clone(), AckMode::Auto);

        let outcome = pipeline.handle(msg(LOG_JSON, 1)).await;

        assert_eq!(outcome, DispatchOutcome::AutoAcknowledged);
        assert_eq!(consumer.logs.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_mixed_batch_needs_both_halves() {
        let consumer = Arc::new(Capture {
            fail_logs: true,
            ..Default::default()
        });
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(consumer.clone(), acker.clone());

        let mut payload = SPAN_JSON.to_vec();
        payload.push(b'\n');
        payload.extend_from_slice(LOG_JSON);
        let raw = RawMessage::new(payload, DeliveryReceipt::new(0, 1));

        let outcome = pipeline.handle(raw).await;

        assert_eq!(outcome, DispatchOutcome::ConsumerFailed);
        // traces went out before logs failed; the whole message comes back
        assert_eq!(consumer.traces.lock().len(), 1);
        assert!(acker.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_decoded_batch() {
        let consumer = Arc::new(Capture::default());
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = pipeline(consumer.clone(), acker.clone());

        let batch = TelemetryBatch::from_traces(ExportTraceServiceRequest::default());
        let outcome = pipeline
            .dispatch(batch, RawMessage::empty(DeliveryReceipt::new(2, 40)))
            .await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged);
        assert_eq!(*acker.acked.lock(), vec![DeliveryReceipt::new(2, 40)]);
    }

    // ==========================================================================
    // In-flight tracking
    // ==========================================================================

    #[test]
    fn test_guard_counts_in_and_out() {
        let in_flight = InFlight::new();
        let a = in_flight.enter();
        let b = in_flight.enter();
        assert_eq!(in_flight.count(), 2);
        drop(a);
        assert_eq!(in_flight.count(), 1);
        drop(b);
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_at_zero() {
        let in_flight = InFlight::new();
        tokio::time::timeout(Duration::from_millis(100), in_flight.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_return_to_zero() {
        let consumer = Arc::new(Capture {
            fail_logs: true,
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = Arc::new(pipeline(consumer.clone(), acker.clone()));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let pipeline = Arc::clone(&pipeline);
            let payload: &'static [u8] = match i % 3 {
                0 => SPAN_JSON,
                1 => LOG_JSON,
                _ => b"garbage",
            };
            tasks.push(tokio::spawn(async move { pipeline.handle(msg(payload, i)).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(pipeline.in_flight().count(), 0);
        assert_eq!(consumer.traces.lock().len(), 11);
        assert_eq!(acker.acked.lock().len(), 11);
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_slow_consumer() {
        let consumer = Arc::new(Capture {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let acker = Arc::new(RecordingAcker::default());
        let pipeline = Arc::new(pipeline(consumer, acker.clone()));

        let running = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.handle(msg(SPAN_JSON, 1)).await })
        };
        while pipeline.in_flight().count() == 0 {
            tokio::task::yield_now().await;
        }

        pipeline.in_flight().wait_idle().await;
        assert_eq!(acker.acked.lock().len(), 1);
        running.await.unwrap();
    }
}
