//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay node.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Downstream peer. `None` runs the node in standalone mode.
    pub downstream: Option<DownstreamConfig>,

    /// Relay behaviour.
    pub relay: RelaySettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9996").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent HTTP/2 streams per connection.
    pub max_concurrent_streams: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9996".to_string(),
            tls: None,
            max_concurrent_streams: 256,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Downstream peer (Hop) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Downstream host name or address.
    pub host: String,

    /// Downstream port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client TLS settings. `None` connects in plaintext.
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
}

impl DownstreamConfig {
    /// Endpoint URI for the downstream channel.
    pub fn endpoint(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

fn default_port() -> u16 {
    9996
}

/// Client TLS configuration for the downstream connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientTlsConfig {
    /// Root CA used to verify the downstream (PEM).
    pub ca_path: String,

    /// Client certificate chain for mutual TLS (PEM).
    #[serde(default)]
    pub cert_path: Option<String>,

    /// Client private key for mutual TLS (PEM).
    #[serde(default)]
    pub key_path: Option<String>,

    /// Server name expected in the downstream certificate.
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
}

fn default_domain_name() -> String {
    "hello.grpc.io".to_string()
}

/// Relay behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Name added as the hop marker on forwarded calls.
    pub node_name: String,

    /// Synthesize locally even when the downstream answers with a terminal error.
    pub fallback_on_terminal: bool,

    /// Capacity of the bounded channels used by streaming calls.
    pub stream_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            node_name: "grpc-relay".to_string(),
            fallback_on_terminal: false,
            stream_buffer: 16,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Server-side limit for a call handler, in milliseconds.
    ///
    /// tonic applies it until the handler returns its response, so it also
    /// caps the whole inbound stream of a `TalkMoreAnswerOne` call. Streamed
    /// responses are not bounded by it. Keep it well above the longest
    /// expected client-streaming session.
    pub request_ms: u64,

    /// Deadline for each downstream call, in milliseconds.
    pub downstream_ms: u64,

    /// Connection establishment timeout for the downstream, in milliseconds.
    pub connect_ms: u64,

    /// Drain period after a shutdown signal, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn downstream(&self) -> Duration {
        Duration::from_millis(self.downstream_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            downstream_ms: 2_000,
            connect_ms: 3_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub initial_delay_ms: u64,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Random jitter as a fraction of each delay (0.0 disables it).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2_000,
            jitter_ratio: 0.0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9997".to_string(),
        }
    }
}
