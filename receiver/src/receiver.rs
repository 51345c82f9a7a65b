//! Receiver lifecycle
//!
//! [`QueueReceiver`] owns the broker connection and the queue consumer and
//! moves through four states:
//!
//! ```text
//! Stopped ──start──► Connecting ──► Listening ──stop──► Draining ──► Stopped
//!    ▲                   │
//!    └──── failure ──────┘
//! ```
//!
//! While listening, `workers` tasks poll the queue consumer and run each
//! message through the [`DispatchPipeline`]. Stopping first cuts off new
//! deliveries, then waits for every in-flight message to be settled before
//! the consumer is terminated and the connection closed.

use crate::broker::{ConsumerSpec, MessagingService, QueueConsumer};
use crate::codec::CodecRegistry;
use crate::config::ReceiverConfig;
use crate::dispatch::{DispatchPipeline, InFlight};
use crate::error::{PluginError, ReceiverError, Result};
use crate::metrics::ReceiverMetrics;
use laituri_core::TelemetryConsumer;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

/// How long aborted workers get to unwind after a drain timeout
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Where a receiver is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Not connected, nothing running
    Stopped,
    /// Connecting to the broker and binding the queue
    Connecting,
    /// Delivering messages
    Listening,
    /// Delivery stopped, waiting for in-flight messages
    Draining,
}

impl ReceiverState {
    /// Lowercase name for logs and the health endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverState::Stopped => "stopped",
            ReceiverState::Connecting => "connecting",
            ReceiverState::Listening => "listening",
            ReceiverState::Draining => "draining",
        }
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a receiver for health reporting
#[derive(Clone)]
pub struct ReceiverStatus {
    state: Arc<RwLock<ReceiverState>>,
    in_flight: Arc<InFlight>,
}

impl ReceiverStatus {
    /// Current lifecycle state
    pub fn state(&self) -> ReceiverState {
        *self.state.read()
    }

    /// Messages currently being dispatched
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }
}

/// Everything that exists only while the receiver is running
struct Running {
    queue_consumer: Arc<dyn QueueConsumer>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Consumes a broker queue and forwards decoded telemetry
///
/// # Example
///
/// ```ignore
/// use laituri_receiver::{MemoryBroker, QueueReceiver, ReceiverConfig, StdoutConsumer};
///
/// let receiver = QueueReceiver::new(
///     Arc::new(MemoryBroker::new()),
///     Arc::new(StdoutConsumer::new()),
///     ReceiverConfig::default(),
/// );
/// receiver.start().await?;
/// // ...
/// receiver.stop().await?;
/// ```
pub struct QueueReceiver {
    service: Arc<dyn MessagingService>,
    consumer: Arc<dyn TelemetryConsumer>,
    config: ReceiverConfig,
    codecs: Arc<CodecRegistry>,
    metrics: Option<ReceiverMetrics>,
    in_flight: Arc<InFlight>,
    state: Arc<RwLock<ReceiverState>>,
    running: Mutex<Option<Running>>,
    span: tracing::Span,
}

impl QueueReceiver {
    /// Create a stopped receiver
    pub fn new(
        service: Arc<dyn MessagingService>,
        consumer: Arc<dyn TelemetryConsumer>,
        config: ReceiverConfig,
    ) -> Self {
        let span = tracing::info_span!(
            "receiver",
            queue = %config.queue,
            client = %config.client_name,
        );
        Self {
            service,
            consumer,
            config,
            codecs: Arc::new(CodecRegistry::standard()),
            metrics: None,
            in_flight: Arc::new(InFlight::new()),
            state: Arc::new(RwLock::new(ReceiverState::Stopped)),
            running: Mutex::new(None),
            span,
        }
    }

    /// Use a different codec chain
    pub fn with_codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Record metrics
    pub fn with_metrics(mut self, metrics: ReceiverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReceiverState {
        *self.state.read()
    }

    /// Health view that outlives borrows of the receiver
    pub fn status(&self) -> ReceiverStatus {
        ReceiverStatus {
            state: Arc::clone(&self.state),
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// The receiver's in-flight counter
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// The span every receiver log line is recorded in
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Connect, bind the queue and start delivering
    ///
    /// # Errors
    /// - `ReceiverError::AlreadyRunning` unless the receiver is stopped
    /// - `ReceiverError::Config` for unusable settings
    /// - `ReceiverError::Startup` when any broker step fails; whatever was
    ///   set up is torn down again and the receiver stays stopped
    pub async fn start(&self) -> Result<()> {
        async {
            let mut running = self.running.lock().await;
            if running.is_some() || self.state() != ReceiverState::Stopped {
                return Err(ReceiverError::AlreadyRunning);
            }
            self.config.validate()?;

            self.set_state(ReceiverState::Connecting);
            info!(
                broker = self.service.name(),
                workers = self.config.workers,
                "Receiver starting"
            );

            match self.bring_up().await {
                Ok(up) => {
                    *running = Some(up);
                    self.set_state(ReceiverState::Listening);
                    info!("Receiver listening");
                    Ok(())
                }
                Err(e) => {
                    self.set_state(ReceiverState::Stopped);
                    error!(error = %e, "Receiver failed to start");
                    Err(e)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop delivery, drain in-flight messages and disconnect
    ///
    /// Idempotent: stopping a stopped receiver does nothing. The receiver
    /// always ends up stopped; an error reports the first step that failed.
    pub async fn stop(&self) -> Result<()> {
        async {
            let mut running = self.running.lock().await;
            let Some(up) = running.take() else {
                debug!("Receiver already stopped");
                return Ok(());
            };

            self.set_state(ReceiverState::Draining);
            info!(in_flight = self.in_flight.count(), "Receiver draining");

            let mut first_error: Option<PluginError> = None;

            if let Err(e) = up.queue_consumer.stop_delivery().await {
                warn!(error = %e, "Failed to stop delivery");
                first_error.get_or_insert(e);
            }
            // workers exit between messages, never mid-dispatch
            let _ = up.shutdown.send(true);

            if let Err(e) = self.drain(up.workers).await {
                first_error.get_or_insert(e);
            }

            if let Err(e) = up.queue_consumer.terminate(self.config.terminate_grace).await {
                warn!(error = %e, "Failed to terminate queue consumer");
                first_error.get_or_insert(e);
            }
            if let Err(e) = self.service.disconnect().await {
                warn!(error = %e, "Failed to disconnect from broker");
                first_error.get_or_insert(e);
            }

            self.set_state(ReceiverState::Stopped);
            info!("Receiver stopped");

            match first_error {
                Some(e) => Err(ReceiverError::Shutdown(e)),
                None => Ok(()),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    fn set_state(&self, state: ReceiverState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        debug!(from = %previous, to = %state, "Receiver state changed");
    }

    async fn bring_up(&self) -> Result<Running> {
        self.service
            .connect()
            .await
            .map_err(|e| ReceiverError::startup("connecting to broker", e))?;

        let spec = ConsumerSpec::durable_exclusive(&self.config.queue, &self.config.client_name);
        let queue_consumer = match self.service.create_consumer(&spec).await {
            Ok(c) => c,
            Err(e) => {
                self.disconnect_after_failure().await;
                return Err(ReceiverError::startup("binding queue consumer", e));
            }
        };

        if let Err(e) = queue_consumer.start().await {
            if let Err(term) = queue_consumer.terminate(self.config.terminate_grace).await {
                warn!(error = %term, "Failed to terminate consumer after failed start");
            }
            self.disconnect_after_failure().await;
            return Err(ReceiverError::startup("starting queue consumer", e));
        }

        let ack = queue_consumer.ack_mode();
        debug!(ack_mode = ?ack, "Resolved acknowledgment mode");

        let mut pipeline = DispatchPipeline::new(Arc::clone(&self.consumer), ack)
            .with_codecs(Arc::clone(&self.codecs))
            .with_in_flight(Arc::clone(&self.in_flight))
            .with_span(self.span.clone());
        if let Some(metrics) = &self.metrics {
            pipeline = pipeline.with_metrics(metrics.clone());
        }
        let pipeline = Arc::new(pipeline);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = (0..self.config.workers)
            .map(|id| {
                tokio::spawn(
                    deliver(
                        id,
                        Arc::clone(&queue_consumer),
                        Arc::clone(&pipeline),
                        shutdown_rx.clone(),
                    )
                    .instrument(self.span.clone()),
                )
            })
            .collect();

        Ok(Running {
            queue_consumer,
            shutdown,
            workers,
        })
    }

    async fn disconnect_after_failure(&self) {
        if let Err(e) = self.service.disconnect().await {
            warn!(error = %e, "Failed to disconnect after failed start");
        }
    }

    async fn drain(&self, mut workers: Vec<JoinHandle<()>>) -> std::result::Result<(), PluginError> {
        let in_flight = Arc::clone(&self.in_flight);
        let settle = async {
            for worker in workers.iter_mut() {
                if let Err(e) = worker.await {
                    warn!(error = %e, "Delivery worker ended abnormally");
                }
            }
            in_flight.wait_idle().await;
        };

        let Some(limit) = self.config.drain_timeout else {
            settle.await;
            return Ok(());
        };
        if tokio::time::timeout(limit, settle).await.is_ok() {
            return Ok(());
        }

        let abandoned = self.in_flight.count();
        for worker in &workers {
            worker.abort();
        }
        // aborted workers drop their in-flight guards once they are polled
        let reaped = tokio::time::timeout(ABORT_GRACE, async {
            for worker in workers.iter_mut().filter(|w| !w.is_finished()) {
                let _ = worker.await;
            }
        })
        .await;

        let remaining = self.in_flight.count();
        warn!(
            abandoned,
            remaining,
            timeout_ms = limit.as_millis() as u64,
            "Drain timed out, abandoning in-flight messages for redelivery"
        );
        if reaped.is_err() || remaining > 0 {
            error!(remaining, "Delivery workers did not settle after abort");
        }
        Err(PluginError::Shutdown(format!(
            "drain timed out with {abandoned} messages in flight"
        )))
    }
}

/// Delivery worker: poll, dispatch, repeat until told to stop
async fn deliver(
    id: usize,
    queue_consumer: Arc<dyn QueueConsumer>,
    pipeline: Arc<DispatchPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = id, "Delivery worker started");
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            msg = queue_consumer.receive() => match msg {
                Some(msg) => {
                    pipeline.handle(msg).await;
                }
                None => break,
            },
        }
    }
    debug!(worker = id, "Delivery worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::consumer::StdoutConsumer;

    const QUEUE: &str = "telemetry-queue";

    fn receiver(broker: &MemoryBroker) -> QueueReceiver {
        QueueReceiver::new(
            Arc::new(broker.clone()),
            Arc::new(StdoutConsumer::new()),
            ReceiverConfig::for_queue(QUEUE),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let broker = MemoryBroker::new();
        let receiver = receiver(&broker);
        assert_eq!(receiver.state(), ReceiverState::Stopped);

        receiver.start().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Listening);
        assert!(broker.is_connected());
        assert!(broker.is_bound(QUEUE));

        receiver.stop().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(!broker.is_connected());
        assert!(!broker.is_bound(QUEUE));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let receiver = receiver(&broker);
        receiver.start().await.unwrap();

        assert!(matches!(
            receiver.start().await,
            Err(ReceiverError::AlreadyRunning)
        ));
        assert_eq!(receiver.state(), ReceiverState::Listening);
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let receiver = receiver(&MemoryBroker::new());
        receiver.stop().await.unwrap();
        receiver.stop().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let broker = MemoryBroker::new();
        let receiver = receiver(&broker);
        receiver.start().await.unwrap();
        receiver.stop().await.unwrap();
        receiver.start().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Listening);
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_receiver_stopped() {
        let broker = MemoryBroker::new();
        broker.fail_connect(true);
        let receiver = receiver(&broker);

        let err = receiver.start().await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Startup {
                stage: "connecting to broker",
                ..
            }
        ));
        assert_eq!(receiver.state(), ReceiverState::Stopped);
    }

    #[tokio::test]
    async fn test_consumer_start_failure_tears_down() {
        let broker = MemoryBroker::new();
        broker.fail_start(true);
        let receiver = receiver(&broker);

        let err = receiver.start().await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Startup {
                stage: "starting queue consumer",
                ..
            }
        ));
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(!broker.is_bound(QUEUE));
        assert!(!broker.is_connected());

        broker.fail_start(false);
        receiver.start().await.unwrap();
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        let broker = MemoryBroker::new();
        let receiver = QueueReceiver::new(
            Arc::new(broker.clone()),
            Arc::new(StdoutConsumer::new()),
            ReceiverConfig {
                workers: 0,
                ..ReceiverConfig::default()
            },
        );

        assert!(matches!(
            receiver.start().await,
            Err(ReceiverError::Config(_))
        ));
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_status_view() {
        let broker = MemoryBroker::new();
        let receiver = receiver(&broker);
        let status = receiver.status();

        receiver.start().await.unwrap();
        assert_eq!(status.state(), ReceiverState::Listening);
        assert_eq!(status.in_flight(), 0);
        receiver.stop().await.unwrap();
        assert_eq!(status.state(), ReceiverState::Stopped);
    }
}
