//! Configuration for the receiver
//!
//! Everything is loaded from `LAITURI_*` environment variables. Parsing goes
//! through [`Config::from_lookup`] so tests can feed a map instead of
//! touching the process environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LAITURI_BROKER_HOST` | (required) |
//! | `LAITURI_BROKER_PORT` | (required) |
//! | `LAITURI_BROKER_VPN` | (required) |
//! | `LAITURI_BROKER_USERNAME` | (required) |
//! | `LAITURI_BROKER_PASSWORD` | (required) |
//! | `LAITURI_BROKER_TLS` | `false` |
//! | `LAITURI_TRUST_STORE_DIR` | `SESSION_SSL_TRUST_STORE_DIR`, then `truststore` |
//! | `LAITURI_QUEUE` | `telemetry-queue` |
//! | `LAITURI_CLIENT_NAME` | `otlp-receiver` |
//! | `LAITURI_WORKERS` | `4` |
//! | `LAITURI_DRAIN_TIMEOUT_MS` | unset (wait indefinitely) |
//! | `LAITURI_TERMINATE_GRACE_MS` | `10000` |
//! | `LAITURI_METRICS_ADDR` | `0.0.0.0:9090` |
//! | `LAITURI_LOG_LEVEL` | `info` |
//! | `LAITURI_LOG_FORMAT` | `pretty` (`json` for structured output) |

use crate::error::{ReceiverError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default queue, matching what producers publish to out of the box
pub const DEFAULT_QUEUE: &str = "telemetry-queue";

/// Default client name announced to the broker
pub const DEFAULT_CLIENT_NAME: &str = "otlp-receiver";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = ReceiverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ReceiverError::Config(format!(
                "unknown log format '{other}' (expected 'json' or 'pretty')"
            ))),
        }
    }
}

/// Broker connection settings
///
/// Consumed by broker adapters; the core pipeline never looks at them.
#[derive(Clone, Default)]
pub struct BrokerConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Message VPN (tenant namespace on the broker)
    pub vpn: String,
    /// Basic-auth user name
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Use TLS for the broker connection
    pub tls: bool,
    /// Directory or file holding trusted CA certificates
    pub trust_store: PathBuf,
}

impl BrokerConfig {
    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ReceiverError::Config("broker host must be specified".into()));
        }
        if self.port == 0 {
            return Err(ReceiverError::Config("broker port must be greater than 0".into()));
        }
        if self.vpn.is_empty() {
            return Err(ReceiverError::Config("broker vpn must be specified".into()));
        }
        if self.username.is_empty() {
            return Err(ReceiverError::Config("broker username must be specified".into()));
        }
        if self.password.is_empty() {
            return Err(ReceiverError::Config("broker password must be specified".into()));
        }
        if self.tls && self.trust_store.as_os_str().is_empty() {
            return Err(ReceiverError::Config(
                "trust store must be specified when TLS is enabled".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vpn", &self.vpn)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("trust_store", &self.trust_store)
            .finish()
    }
}

/// Settings the receiver lifecycle itself uses
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Durable queue to consume from
    pub queue: String,
    /// Client name announced to the broker
    pub client_name: String,
    /// Number of concurrent delivery workers
    pub workers: usize,
    /// Upper bound on waiting for in-flight messages at shutdown
    ///
    /// `None` waits for as long as the consumer takes.
    pub drain_timeout: Option<Duration>,
    /// Grace period handed to the queue consumer's terminate call
    pub terminate_grace: Duration,
}

impl ReceiverConfig {
    /// Settings for consuming `queue` with everything else defaulted
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    /// Check the lifecycle settings
    pub fn validate(&self) -> Result<()> {
        if self.queue.is_empty() {
            return Err(ReceiverError::Config("queue must be specified".into()));
        }
        if self.client_name.is_empty() {
            return Err(ReceiverError::Config("client name must be specified".into()));
        }
        if self.workers == 0 {
            return Err(ReceiverError::Config("workers must be greater than 0".into()));
        }
        Ok(())
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            workers: 4,
            drain_timeout: None,
            terminate_grace: Duration::from_secs(10),
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection
    pub broker: BrokerConfig,
    /// Receiver lifecycle
    pub receiver: ReceiverConfig,
    /// Address of the metrics/health HTTP server
    pub metrics_addr: SocketAddr,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                trust_store: PathBuf::from("truststore"),
                ..BrokerConfig::default()
            },
            receiver: ReceiverConfig::default(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("LAITURI_BROKER_HOST") {
            config.broker.host = host;
        }
        if let Some(port) = get("LAITURI_BROKER_PORT") {
            config.broker.port = parse("LAITURI_BROKER_PORT", &port)?;
        }
        if let Some(vpn) = get("LAITURI_BROKER_VPN") {
            config.broker.vpn = vpn;
        }
        if let Some(username) = get("LAITURI_BROKER_USERNAME") {
            config.broker.username = username;
        }
        if let Some(password) = get("LAITURI_BROKER_PASSWORD") {
            config.broker.password = password;
        }
        if let Some(tls) = get("LAITURI_BROKER_TLS") {
            config.broker.tls = parse_bool("LAITURI_BROKER_TLS", &tls)?;
        }
        if let Some(dir) = get("LAITURI_TRUST_STORE_DIR").or_else(|| get("SESSION_SSL_TRUST_STORE_DIR")) {
            config.broker.trust_store = PathBuf::from(dir);
        }

        if let Some(queue) = get("LAITURI_QUEUE") {
            config.receiver.queue = queue;
        }
        if let Some(name) = get("LAITURI_CLIENT_NAME") {
            config.receiver.client_name = name;
        }
        if let Some(workers) = get("LAITURI_WORKERS") {
            config.receiver.workers = parse("LAITURI_WORKERS", &workers)?;
        }
        if let Some(ms) = get("LAITURI_DRAIN_TIMEOUT_MS") {
            config.receiver.drain_timeout =
                Some(Duration::from_millis(parse("LAITURI_DRAIN_TIMEOUT_MS", &ms)?));
        }
        if let Some(ms) = get("LAITURI_TERMINATE_GRACE_MS") {
            config.receiver.terminate_grace =
                Duration::from_millis(parse("LAITURI_TERMINATE_GRACE_MS", &ms)?);
        }

        if let Some(addr) = get("LAITURI_METRICS_ADDR") {
            config.metrics_addr = parse("LAITURI_METRICS_ADDR", &addr)?;
        }
        if let Some(level) = get("LAITURI_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = get("LAITURI_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        Ok(config)
    }

    /// Validate broker and receiver settings
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.receiver.validate()
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| ReceiverError::Config(format!("{key}='{value}': {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ReceiverError::Config(format!(
            "{key}='{value}': expected a boolean"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("LAITURI_BROKER_HOST", "broker.internal"),
            ("LAITURI_BROKER_PORT", "55443"),
            ("LAITURI_BROKER_VPN", "telemetry"),
            ("LAITURI_BROKER_USERNAME", "collector"),
            ("LAITURI_BROKER_PASSWORD", "s3cret"),
        ]
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.receiver.queue, "telemetry-queue");
        assert_eq!(config.receiver.client_name, "otlp-receiver");
        assert_eq!(config.receiver.workers, 4);
        assert_eq!(config.receiver.drain_timeout, None);
        assert_eq!(config.receiver.terminate_grace, Duration::from_secs(10));
        assert_eq!(config.broker.trust_store, PathBuf::from("truststore"));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn complete_environment_validates() {
        let config = Config::from_lookup(lookup(&complete())).unwrap();
        assert_eq!(config.broker.endpoint(), "broker.internal:55443");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_broker_fields_fail_validation() {
        let config = Config::from_lookup(|_| None).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker host must be specified"));
    }

    #[test]
    fn empty_queue_fails_validation() {
        let mut vars = complete();
        vars.push(("LAITURI_QUEUE", ""));
        let mut config = Config::from_lookup(lookup(&vars)).unwrap();
        // empty variables fall back to defaults
        assert_eq!(config.receiver.queue, "telemetry-queue");

        config.receiver.queue.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_requires_trust_store() {
        let mut config = Config::from_lookup(lookup(&complete())).unwrap();
        config.broker.tls = true;
        assert!(config.validate().is_ok());

        config.broker.trust_store = PathBuf::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("trust store"));

        config.broker.tls = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_fail_validation() {
        let mut vars = complete();
        vars.push(("LAITURI_WORKERS", "0"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn trust_store_falls_back_to_session_variable() {
        let config =
            Config::from_lookup(lookup(&[("SESSION_SSL_TRUST_STORE_DIR", "/etc/ssl/solace")]))
                .unwrap();
        assert_eq!(config.broker.trust_store, PathBuf::from("/etc/ssl/solace"));

        let config = Config::from_lookup(lookup(&[
            ("SESSION_SSL_TRUST_STORE_DIR", "/etc/ssl/solace"),
            ("LAITURI_TRUST_STORE_DIR", "/etc/ssl/laituri"),
        ]))
        .unwrap();
        assert_eq!(config.broker.trust_store, PathBuf::from("/etc/ssl/laituri"));
    }

    #[test]
    fn durations_and_flags_parse() {
        let config = Config::from_lookup(lookup(&[
            ("LAITURI_DRAIN_TIMEOUT_MS", "2500"),
            ("LAITURI_TERMINATE_GRACE_MS", "100"),
            ("LAITURI_BROKER_TLS", "TRUE"),
            ("LAITURI_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.receiver.drain_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.receiver.terminate_grace, Duration::from_millis(100));
        assert!(config.broker.tls);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("LAITURI_BROKER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ReceiverError::Config(_)));

        let err = Config::from_lookup(lookup(&[("LAITURI_BROKER_TLS", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));
    }

    #[test]
    fn password_is_redacted_from_debug() {
        let config = Config::from_lookup(lookup(&complete())).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
