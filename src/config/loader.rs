//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{ClientTlsConfig, DownstreamConfig, RelayConfig, TlsConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the file if one is given, otherwise start from defaults, then apply
/// the override variables resolved through `lookup` and validate the result.
pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => RelayConfig::default(),
    };
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Environment variables understood by the relay node.
pub mod env {
    pub const SERVER_PORT: &str = "GRPC_SERVER_PORT";
    pub const BACKEND: &str = "GRPC_HELLO_BACKEND";
    pub const BACKEND_PORT: &str = "GRPC_HELLO_BACKEND_PORT";
    pub const SECURE: &str = "GRPC_HELLO_SECURE";
    pub const CERT_DIR: &str = "GRPC_HELLO_CERT_DIR";
}

const DEFAULT_CERT_DIR: &str = "/var/hello_grpc";

/// Overlay environment settings on top of `config`.
///
/// `lookup` resolves a variable name; tests pass a closure over a map.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let server_port = lookup(env::SERVER_PORT).and_then(|p| p.parse::<u16>().ok());
    if let Some(port) = server_port {
        config.listener.bind_address = match config.listener.bind_address.rsplit_once(':') {
            Some((host, _)) => format!("{}:{}", host, port),
            None => format!("0.0.0.0:{}", port),
        };
    }

    if let Some(host) = lookup(env::BACKEND).filter(|h| !h.is_empty()) {
        let port = lookup(env::BACKEND_PORT)
            .and_then(|p| p.parse::<u16>().ok())
            .or(server_port);
        match config.downstream.as_mut() {
            Some(downstream) => {
                downstream.host = host;
                if let Some(port) = port {
                    downstream.port = port;
                }
            }
            None => {
                config.downstream = Some(DownstreamConfig {
                    host,
                    port: port.unwrap_or(9996),
                    tls: None,
                });
            }
        }
    }

    if lookup(env::SECURE).is_some_and(|v| v == "Y") {
        let cert_dir = lookup(env::CERT_DIR).unwrap_or_else(|| DEFAULT_CERT_DIR.to_string());
        let cert_dir = Path::new(&cert_dir);
        let path = |sub: &str, file: &str| cert_dir.join(sub).join(file).display().to_string();

        if config.listener.tls.is_none() {
            config.listener.tls = Some(TlsConfig {
                cert_path: path("server_certs", "full_chain.pem"),
                key_path: path("server_certs", "private.key"),
            });
        }
        if let Some(downstream) = config.downstream.as_mut() {
            if downstream.tls.is_none() {
                downstream.tls = Some(ClientTlsConfig {
                    ca_path: path("client_certs", "myssl_root.cer"),
                    cert_path: Some(path("client_certs", "full_chain.pem")),
                    key_path: Some(path("client_certs", "private.key")),
                    domain_name: "hello.grpc.io".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_environment_keeps_standalone() {
        let mut config = RelayConfig::default();
        apply_env_overrides(&mut config, lookup(&[]));
        assert!(config.downstream.is_none());
        assert!(config.listener.tls.is_none());
    }

    #[test]
    fn backend_variables_enable_relay_mode() {
        let mut config = RelayConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                (env::SERVER_PORT, "8866"),
                (env::BACKEND, "hello-next"),
                (env::BACKEND_PORT, "9999"),
            ]),
        );

        assert_eq!(config.listener.bind_address, "0.0.0.0:8866");
        let downstream = config.downstream.unwrap();
        assert_eq!(downstream.host, "hello-next");
        assert_eq!(downstream.port, 9999);
    }

    #[test]
    fn backend_port_falls_back_to_server_port() {
        let mut config = RelayConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[(env::SERVER_PORT, "8866"), (env::BACKEND, "hello-next")]),
        );
        assert_eq!(config.downstream.unwrap().port, 8866);
    }

    #[test]
    fn empty_backend_is_ignored() {
        let mut config = RelayConfig::default();
        apply_env_overrides(&mut config, lookup(&[(env::BACKEND, "")]));
        assert!(config.downstream.is_none());
    }

    #[test]
    fn secure_flag_fills_certificate_paths() {
        let mut config = RelayConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                (env::BACKEND, "hello-next"),
                (env::SECURE, "Y"),
                (env::CERT_DIR, "/certs"),
            ]),
        );

        let tls = config.listener.tls.unwrap();
        assert_eq!(tls.cert_path, "/certs/server_certs/full_chain.pem");
        assert_eq!(tls.key_path, "/certs/server_certs/private.key");

        let client_tls = config.downstream.unwrap().tls.unwrap();
        assert_eq!(client_tls.ca_path, "/certs/client_certs/myssl_root.cer");
        assert_eq!(client_tls.domain_name, "hello.grpc.io");
    }

    #[test]
    fn load_with_uses_lookup_without_a_file() {
        let config = load_with(None, lookup(&[(env::BACKEND, "hello-next")])).unwrap();
        assert_eq!(config.downstream.unwrap().endpoint(), "http://hello-next:9996");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_with(Some(Path::new("/definitely/not/here.toml")), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
