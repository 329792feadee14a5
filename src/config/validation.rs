//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, backoff sane)
//! - Check that TLS material is referenced consistently
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_concurrent_streams == 0 {
        errors.push(ValidationError::new("listener.max_concurrent_streams", "must be > 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are required",
            ));
        }
    }

    if let Some(downstream) = &config.downstream {
        if downstream.host.trim().is_empty() {
            errors.push(ValidationError::new("downstream.host", "must not be empty"));
        }
        if downstream.port == 0 {
            errors.push(ValidationError::new("downstream.port", "must be > 0"));
        }
        if let Some(tls) = &downstream.tls {
            if tls.ca_path.is_empty() {
                errors.push(ValidationError::new("downstream.tls.ca_path", "must not be empty"));
            }
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                errors.push(ValidationError::new(
                    "downstream.tls",
                    "cert_path and key_path must be set together",
                ));
            }
        }
    }

    if config.relay.stream_buffer == 0 {
        errors.push(ValidationError::new("relay.stream_buffer", "must be > 0"));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.request_ms", timeouts.request_ms),
        ("timeouts.downstream_ms", timeouts.downstream_ms),
        ("timeouts.connect_ms", timeouts.connect_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    let retries = &config.retries;
    if !(retries.multiplier >= 1.0) {
        errors.push(ValidationError::new("retries.multiplier", "must be >= 1.0"));
    }
    if retries.initial_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.initial_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retries.jitter_ratio) {
        errors.push(ValidationError::new("retries.jitter_ratio", "must be within [0, 1]"));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClientTlsConfig, DownstreamConfig};

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = RelayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.retries.multiplier = 0.5;
        config.timeouts.downstream_ms = 0;
        config.relay.stream_buffer = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "relay.stream_buffer",
                "timeouts.downstream_ms",
                "retries.multiplier",
            ]
        );
    }

    #[test]
    fn mutual_tls_needs_both_halves() {
        let mut config = RelayConfig::default();
        config.downstream = Some(DownstreamConfig {
            host: "hop".into(),
            port: 9996,
            tls: Some(ClientTlsConfig {
                ca_path: "root.cer".into(),
                cert_path: Some("chain.pem".into()),
                key_path: None,
                domain_name: "hello.grpc.io".into(),
            }),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "downstream.tls");
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = RelayConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
