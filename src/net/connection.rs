//! Downstream connection and credential provider.
//!
//! # Responsibilities
//! - Build the single shared channel to the downstream peer (the Hop)
//! - Hand out cheap clones of that channel to every call
//! - Supply the listener credentials (TLS identity or explicit insecure)
//!
//! # Design Decisions
//! - The channel is created lazily; an unreachable downstream surfaces per call
//!   as UNAVAILABLE instead of failing startup
//! - No call ever owns or closes the channel
//! - The relay service only sees this trait, never files or environment

use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Channel, Endpoint, Identity};

use crate::config::{DownstreamConfig, RelayConfig};
use crate::net::tls::{self, TlsError};
use crate::proto::landing_service_client::LandingServiceClient;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid downstream endpoint {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        source: tonic::transport::Error,
    },
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Shared handle to the downstream peer.
#[derive(Debug, Clone)]
pub struct Hop {
    endpoint: String,
    channel: Channel,
}

impl Hop {
    /// Lazily connected hop to `endpoint` without TLS.
    pub fn lazy(endpoint: &str, connect_timeout: Duration) -> Result<Self, ConnectError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|source| ConnectError::Endpoint {
                endpoint: endpoint.to_string(),
                source,
            })?
            .connect_timeout(connect_timeout)
            .connect_lazy();
        Ok(Self::from_channel(endpoint, channel))
    }

    /// Build the hop described by `config`, loading client TLS material if configured.
    pub async fn from_config(
        config: &DownstreamConfig,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let endpoint = config.endpoint();
        let invalid = |source| ConnectError::Endpoint {
            endpoint: endpoint.clone(),
            source,
        };

        let mut builder = Endpoint::from_shared(endpoint.clone())
            .map_err(invalid)?
            .connect_timeout(connect_timeout);
        if let Some(tls_config) = &config.tls {
            let client_tls = tls::load_client_tls(tls_config).await?;
            builder = builder.tls_config(client_tls).map_err(invalid)?;
        }

        tracing::info!(
            endpoint = %endpoint,
            tls = config.tls.is_some(),
            "Downstream hop configured"
        );
        Ok(Self::from_channel(&endpoint, builder.connect_lazy()))
    }

    pub fn from_channel(endpoint: &str, channel: Channel) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            channel,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A client multiplexed over the shared channel.
    pub fn client(&self) -> LandingServiceClient<Channel> {
        LandingServiceClient::new(self.channel.clone())
    }
}

/// Credentials the listener serves with.
#[derive(Debug, Clone)]
pub enum ServerCredentials {
    Tls(Identity),
    Insecure,
}

impl ServerCredentials {
    pub fn is_tls(&self) -> bool {
        matches!(self, ServerCredentials::Tls(_))
    }
}

/// Source of the downstream handle and listener credentials.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// The downstream hop, or `None` in standalone mode.
    fn client(&self) -> Option<Hop>;

    fn server_credentials(&self) -> &ServerCredentials;
}

/// Provider whose hop and credentials are fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticConnectionProvider {
    hop: Option<Hop>,
    credentials: ServerCredentials,
}

impl StaticConnectionProvider {
    pub fn standalone() -> Self {
        Self {
            hop: None,
            credentials: ServerCredentials::Insecure,
        }
    }

    pub fn relay(hop: Hop) -> Self {
        Self {
            hop: Some(hop),
            credentials: ServerCredentials::Insecure,
        }
    }

    /// Build from configuration: loads TLS material and prepares the hop.
    pub async fn from_config(config: &RelayConfig) -> Result<Self, ConnectError> {
        let credentials = match &config.listener.tls {
            Some(tls_config) => ServerCredentials::Tls(tls::load_server_identity(tls_config).await?),
            None => ServerCredentials::Insecure,
        };

        let hop = match &config.downstream {
            Some(downstream) => {
                Some(Hop::from_config(downstream, config.timeouts.connect()).await?)
            }
            None => None,
        };

        if hop.is_none() {
            tracing::info!("Operating in standalone mode (no downstream)");
        }
        Ok(Self { hop, credentials })
    }
}

impl ConnectionProvider for StaticConnectionProvider {
    fn client(&self) -> Option<Hop> {
        self.hop.clone()
    }

    fn server_credentials(&self) -> &ServerCredentials {
        &self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_has_no_hop() {
        let provider = StaticConnectionProvider::standalone();
        assert!(provider.client().is_none());
        assert!(!provider.server_credentials().is_tls());
    }

    #[tokio::test]
    async fn lazy_hop_does_not_connect_eagerly() {
        let hop = Hop::lazy("http://127.0.0.1:1", Duration::from_millis(100)).unwrap();
        assert_eq!(hop.endpoint(), "http://127.0.0.1:1");

        let provider = StaticConnectionProvider::relay(hop);
        assert_eq!(provider.client().unwrap().endpoint(), "http://127.0.0.1:1");
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = Hop::lazy("not a uri", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ConnectError::Endpoint { .. }));
    }

    #[tokio::test]
    async fn standalone_config_builds_without_io() {
        let provider = StaticConnectionProvider::from_config(&RelayConfig::default())
            .await
            .unwrap();
        assert!(provider.client().is_none());
    }
}
