//! laituri runtime - batteries-included receiver startup
//!
//! Provides [`run()`] for zero-boilerplate startup, and [`RuntimeBuilder`]
//! for users who need control over the metrics server, configuration source
//! or shutdown trigger.
//!
//! # Quick start
//!
//! ```ignore
//! use laituri_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     laituri_runtime::run(|setup| async move {
//!         Ok(setup.consumer(OtlpGrpcConsumer::lazy("http://otel-collector:4317")?))
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use laituri_core::TelemetryConsumer;
use laituri_receiver::broker::MessagingService;
use laituri_receiver::codec::CodecRegistry;
use laituri_receiver::config::{Config, LogFormat};
use laituri_receiver::consumer::StdoutConsumer;
use laituri_receiver::metrics::ReceiverMetrics;
use laituri_receiver::metrics_server::MetricsServer;
use laituri_receiver::receiver::QueueReceiver;
use prometheus::Registry;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run a receiver with default settings.
///
/// Loads configuration from environment variables, initialises tracing and
/// metrics, calls your closure to pick the broker and consumer, then
/// receives until SIGINT/SIGTERM and drains before returning.
///
/// # Example
///
/// ```ignore
/// laituri_runtime::run(|setup| async move {
///     let endpoint = std::env::var("OTLP_ENDPOINT")?;
///     Ok(setup.consumer(OtlpGrpcConsumer::connect(endpoint).await?))
/// }).await
/// ```
pub async fn run<F, Fut>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Setup) -> Fut,
    Fut: Future<Output = anyhow::Result<Setup>>,
{
    RuntimeBuilder::new().configure(configure).await
}

/// What the receiver is wired to
///
/// Handed to the configure closure with the loaded [`Config`]. Anything
/// left unset falls back to a default: the Kafka adapter built from
/// `config.broker` (with the `kafka` feature), the standard codec chain,
/// and a [`StdoutConsumer`].
pub struct Setup {
    config: Config,
    service: Option<Arc<dyn MessagingService>>,
    consumer: Option<Arc<dyn TelemetryConsumer>>,
    codecs: Option<Arc<CodecRegistry>>,
}

impl Setup {
    fn new(config: Config) -> Self {
        Self {
            config,
            service: None,
            consumer: None,
            codecs: None,
        }
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Use this broker adapter
    pub fn broker<S: MessagingService + 'static>(self, service: S) -> Self {
        self.broker_arc(Arc::new(service))
    }

    /// Use this broker adapter (already shared)
    pub fn broker_arc(mut self, service: Arc<dyn MessagingService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Send decoded telemetry to this consumer
    pub fn consumer<C: TelemetryConsumer + 'static>(self, consumer: C) -> Self {
        self.consumer_arc(Arc::new(consumer))
    }

    /// Send decoded telemetry to this consumer (already shared)
    pub fn consumer_arc(mut self, consumer: Arc<dyn TelemetryConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Replace the standard codec chain
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Some(Arc::new(codecs));
        self
    }

    fn into_parts(
        self,
    ) -> anyhow::Result<(
        Arc<dyn MessagingService>,
        Arc<dyn TelemetryConsumer>,
        Arc<CodecRegistry>,
        Config,
    )> {
        let service = match self.service {
            Some(service) => service,
            None => default_broker(&self.config)?,
        };
        let consumer = self
            .consumer
            .unwrap_or_else(|| Arc::new(StdoutConsumer::new()));
        let codecs = self
            .codecs
            .unwrap_or_else(|| Arc::new(CodecRegistry::standard()));
        Ok((service, consumer, codecs, self.config))
    }
}

#[cfg(feature = "kafka")]
fn default_broker(config: &Config) -> anyhow::Result<Arc<dyn MessagingService>> {
    config.validate()?;
    let service = laituri_receiver::broker::KafkaService::new(config.broker.clone())?;
    Ok(Arc::new(service))
}

#[cfg(not(feature = "kafka"))]
fn default_broker(_config: &Config) -> anyhow::Result<Arc<dyn MessagingService>> {
    anyhow::bail!("no broker adapter configured: call Setup::broker or enable the `kafka` feature")
}

type ShutdownTrigger = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Power-user builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// RuntimeBuilder::new()
///     .metrics_addr("127.0.0.1:9091".parse()?)
///     .configure(|setup| async move {
///         Ok(setup.consumer(StdoutConsumer::pretty()))
///     })
///     .await
/// ```
pub struct RuntimeBuilder {
    config: Option<Config>,
    metrics_addr: Option<SocketAddr>,
    metrics_enabled: bool,
    shutdown: Option<ShutdownTrigger>,
}

impl RuntimeBuilder {
    /// Create a new builder with defaults from environment variables.
    pub fn new() -> Self {
        Self {
            config: None,
            metrics_addr: None,
            metrics_enabled: true,
            shutdown: None,
        }
    }

    /// Use this configuration instead of loading it from the environment.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the metrics HTTP server address.
    ///
    /// Default: loaded from `LAITURI_METRICS_ADDR`, or `0.0.0.0:9090`.
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Do not start the metrics HTTP server.
    pub fn disable_metrics_server(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Stop when `trigger` completes instead of on SIGINT/SIGTERM.
    pub fn shutdown_on<F>(mut self, trigger: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(trigger));
        self
    }

    /// Configure the receiver and run it to completion.
    ///
    /// This is the terminal method — it blocks until shutdown.
    pub async fn configure<F, Fut>(self, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(Setup) -> Fut,
        Fut: Future<Output = anyhow::Result<Setup>>,
    {
        // ── 1. Load config ───────────────────────────────────────
        let mut config = match self.config {
            Some(config) => config,
            None => Config::from_env()?,
        };
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = addr;
        }
        // broker settings are checked by whichever adapter consumes them
        config.receiver.validate()?;

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&config);

        info!(
            queue = %config.receiver.queue,
            client = %config.receiver.client_name,
            workers = config.receiver.workers,
            metrics_addr = %config.metrics_addr,
            "Starting laituri"
        );

        // ── 3. User wires broker and consumer ────────────────────
        let setup = configure(Setup::new(config)).await?;
        let (service, consumer, codecs, config) = setup.into_parts()?;

        // ── 4. Build receiver + metrics ──────────────────────────
        let registry = Registry::new();
        let metrics = ReceiverMetrics::new(&registry)?;
        let receiver = QueueReceiver::new(service, Arc::clone(&consumer), config.receiver.clone())
            .with_codecs(codecs)
            .with_metrics(metrics);

        let metrics_handle = self
            .metrics_enabled
            .then(|| MetricsServer::start(config.metrics_addr, registry, receiver.status()));

        // ── 5. Receive until told to stop ────────────────────────
        if let Err(e) = receiver.start().await {
            if let Some(handle) = metrics_handle {
                handle.abort();
            }
            return Err(e.into());
        }
        info!(consumer = consumer.name(), "Receiver running, waiting for shutdown signal");

        match self.shutdown {
            Some(trigger) => trigger.await,
            None => shutdown_signal().await,
        }

        // ── 6. Shutdown ──────────────────────────────────────────
        let stopped = receiver.stop().await;
        if let Err(e) = &stopped {
            error!(error = %e, "Receiver did not stop cleanly");
        }
        if let Err(e) = consumer.shutdown().await {
            warn!(error = %e, consumer = consumer.name(), "Consumer shutdown failed");
        }
        if let Some(handle) = metrics_handle {
            handle.abort();
        }
        info!("laituri shutdown complete");

        stopped.map_err(Into::into)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialise the tracing subscriber based on config.
///
/// A subscriber installed earlier (by a test harness or the embedding
/// application) is left in place.
fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
