//! Error types for laituri plugins

use thiserror::Error;

/// Error type for plugin operations
///
/// Shared by everything that sits on a plugin boundary: broker adapters,
/// acknowledgers and downstream consumers. Per-message failures are reported
/// through this type and logged by the dispatch pipeline; they never escape
/// to the caller that delivered the message.
///
/// # Example
///
/// ```
/// use laituri_core::PluginError;
///
/// fn connect_to_broker() -> Result<(), PluginError> {
///     Err(PluginError::Connection("refused".to_string()))
/// }
///
/// match connect_to_broker() {
///     Ok(_) => println!("Connected!"),
///     Err(PluginError::Connection(msg)) => println!("Connection failed: {}", msg),
///     Err(e) => println!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Initialization failed
    ///
    /// Returned when an adapter cannot be built, typically during startup.
    /// Examples: invalid client configuration, queue already bound.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Connection error
    ///
    /// Returned when the broker or a downstream endpoint is unreachable.
    /// Examples: DNS lookup failed, connection refused, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Consume failed
    ///
    /// Returned by a downstream consumer that rejected a batch.
    /// Examples: export timeout, collector returned an error, backpressure.
    #[error("consume failed: {0}")]
    Consume(String),

    /// Acknowledgment failed
    ///
    /// Returned when the broker rejects an acknowledgment. Terminal for the
    /// message it was issued for.
    #[error("acknowledgment failed: {0}")]
    Ack(String),

    /// Not ready
    ///
    /// Returned when an adapter is used before it is connected or started.
    #[error("plugin not ready")]
    NotReady,

    /// Shutdown error
    ///
    /// Returned when a graceful shutdown step fails.
    /// Examples: consumer terminate timed out, disconnect refused.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}
