//! Error types for the receiver

use thiserror::Error;

pub use laituri_core::PluginError;

/// Result type alias for receiver operations
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Errors surfaced synchronously by the receiver
///
/// Only lifecycle operations (configuration, start, stop) report errors to
/// their caller. Per-message failures are logged by the dispatch pipeline
/// and never show up here.
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Startup failed at the named stage; nothing was left running
    #[error("startup failed while {stage}: {source}")]
    Startup {
        stage: &'static str,
        #[source]
        source: PluginError,
    },

    /// `start` called on a receiver that is not stopped
    #[error("receiver is already running")]
    AlreadyRunning,

    /// A shutdown step failed; the receiver is stopped regardless
    #[error("shutdown error: {0}")]
    Shutdown(#[from] PluginError),

    /// Metric registration error
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiverError {
    pub(crate) fn startup(stage: &'static str, source: PluginError) -> Self {
        ReceiverError::Startup { stage, source }
    }
}
