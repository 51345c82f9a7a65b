//! HTTP server for Prometheus metrics and receiver health
//!
//! Runs a lightweight HTTP server on a separate port for Prometheus scraping
//! and liveness probes.
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus metrics
//! - `GET /health` - Receiver state as JSON, 503 unless listening
//!
//! # Example
//!
//! ```ignore
//! use laituri_receiver::metrics_server::MetricsServer;
//!
//! let handle = MetricsServer::start(config.metrics_addr, registry, receiver.status());
//! ```

use crate::metrics;
use crate::receiver::{ReceiverState, ReceiverStatus};
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use prometheus::Registry;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared state for the metrics server
#[derive(Clone)]
struct AppState {
    registry: Registry,
    status: ReceiverStatus,
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on the given address
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(addr: SocketAddr, registry: Registry, status: ReceiverStatus) -> JoinHandle<()> {
        let app = Self::router(registry, status);

        tokio::spawn(async move {
            info!(addr = %addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, addr = %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }

    /// Routes without a listener, for embedding in another server
    pub fn router(registry: Registry, status: ReceiverStatus) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(AppState { registry, status })
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = metrics::gather(&state.registry);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Receiver health summary
#[derive(serde::Serialize)]
struct HealthSummary {
    status: &'static str,
    state: &'static str,
    in_flight: usize,
}

/// Handler for /health endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let receiver_state = state.status.state();
    let (code, status) = match receiver_state {
        ReceiverState::Listening => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    let summary = HealthSummary {
        status,
        state: receiver_state.as_str(),
        in_flight: state.status.in_flight(),
    };

    (code, Json(summary))
}
