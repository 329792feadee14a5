//! gRPC server setup and configuration.
//!
//! # Responsibilities
//! - Build the tonic server with the listener credentials
//! - Wire up layers (request tracing, per-call timeout, stream limits)
//! - Serve the relay service on an already bound listener
//! - Stop accepting and drain in-flight calls on shutdown

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, ServerTlsConfig};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::net::{ConnectionProvider, ServerCredentials};
use crate::rpc::service::RelayService;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// gRPC server for a relay node.
pub struct RelayServer {
    config: RelayConfig,
    provider: Arc<dyn ConnectionProvider>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { config, provider }
    }

    pub fn service(&self) -> RelayService {
        RelayService::from_config(self.provider.clone(), &self.config)
    }

    /// Serve until `shutdown` fires, then drain in-flight calls.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let credentials = self.provider.server_credentials();

        let max_streams = self.config.listener.max_concurrent_streams;
        // Bounds a client-streaming call as a whole, not per downstream call.
        let mut builder = Server::builder()
            .timeout(self.config.timeouts.request())
            .concurrency_limit_per_connection(max_streams)
            .max_concurrent_streams(max_streams as u32);
        if let ServerCredentials::Tls(identity) = credentials {
            builder = builder.tls_config(ServerTlsConfig::new().identity(identity.clone()))?;
        }

        tracing::info!(
            address = %addr,
            tls = credentials.is_tls(),
            mode = if self.provider.client().is_some() { "relay" } else { "standalone" },
            "gRPC server starting"
        );

        let layers = ServiceBuilder::new()
            .layer(TraceLayer::new_for_grpc())
            .into_inner();

        builder
            .layer(layers)
            .add_service(self.service().into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining calls");
            })
            .await?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}
