//! TLS configuration and certificate loading.
//!
//! PEM files are checked with `rustls-pemfile` before they reach tonic so a
//! misconfigured path fails at startup with the offending file named.
//! Certificate and key contents never appear in errors or logs.

use std::io;
use std::path::Path;

use thiserror::Error;
use tonic::transport::{Certificate, ClientTlsConfig as TonicClientTls, Identity};

use crate::config::{ClientTlsConfig, TlsConfig};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("{path} is not valid PEM: {source}")]
    Malformed { path: String, source: io::Error },
    #[error("{path} contains no certificates")]
    NoCertificates { path: String },
    #[error("{path} contains no private key")]
    NoPrivateKey { path: String },
}

async fn read_pem(path: &str) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(Path::new(path))
        .await
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })
}

/// Count the certificates in a PEM bundle, rejecting empty or malformed input.
pub fn check_certificates(path: &str, pem: &[u8]) -> Result<usize, TlsError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Malformed {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates {
            path: path.to_string(),
        });
    }
    Ok(certs.len())
}

/// Ensure a PEM file holds a private key.
pub fn check_private_key(path: &str, pem: &[u8]) -> Result<(), TlsError> {
    let mut reader = pem;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(TlsError::NoPrivateKey {
            path: path.to_string(),
        }),
        Err(source) => Err(TlsError::Malformed {
            path: path.to_string(),
            source,
        }),
    }
}

/// Load the listener identity from certificate chain and key files.
pub async fn load_server_identity(config: &TlsConfig) -> Result<Identity, TlsError> {
    let cert = read_pem(&config.cert_path).await?;
    let key = read_pem(&config.key_path).await?;

    let chain_len = check_certificates(&config.cert_path, &cert)?;
    check_private_key(&config.key_path, &key)?;

    tracing::info!(cert_path = %config.cert_path, chain_len, "Loaded server identity");
    Ok(Identity::from_pem(cert, key))
}

/// Build the client TLS settings for the downstream channel.
pub async fn load_client_tls(config: &ClientTlsConfig) -> Result<TonicClientTls, TlsError> {
    let ca = read_pem(&config.ca_path).await?;
    check_certificates(&config.ca_path, &ca)?;

    let mut tls = TonicClientTls::new()
        .domain_name(config.domain_name.clone())
        .ca_certificate(Certificate::from_pem(ca));

    if let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) {
        let cert = read_pem(cert_path).await?;
        let key = read_pem(key_path).await?;
        check_certificates(cert_path, &cert)?;
        check_private_key(key_path, &key)?;
        tls = tls.identity(Identity::from_pem(cert, key));
    }

    tracing::info!(
        ca_path = %config.ca_path,
        domain = %config.domain_name,
        mutual = config.cert_path.is_some(),
        "Loaded downstream TLS settings"
    );
    Ok(tls)
}
