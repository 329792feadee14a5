//! gRPC relay node.
//!
//! Serves the `LandingService`. With a downstream configured (config file,
//! `--backend`, or `GRPC_HELLO_BACKEND`) every call is forwarded to the next
//! node; otherwise answers are synthesized locally.
//!
//! # Startup
//! ```text
//! parse CLI → load config (file or defaults) → CLI/env overrides → validate
//!     → init logging → build connection provider (TLS material checked here)
//!     → optional metrics exporter → bind → serve until SIGINT/SIGTERM
//!     → drain in-flight calls for the grace period
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use grpc_relay::config::loader::env;
use grpc_relay::config::{self, RelayConfig};
use grpc_relay::lifecycle::{self, Shutdown};
use grpc_relay::observability::{logging, metrics};
use grpc_relay::{RelayServer, StaticConnectionProvider};

#[derive(Parser, Debug)]
#[command(name = "grpc-relay", version, about = "Chain-capable gRPC relay node")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides GRPC_SERVER_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Downstream host; enables relay mode (overrides GRPC_HELLO_BACKEND)
    #[arg(long)]
    backend: Option<String>,

    /// Downstream port (overrides GRPC_HELLO_BACKEND_PORT)
    #[arg(long)]
    backend_port: Option<u16>,

    /// Serve and connect with TLS using the certificate directory
    #[arg(long)]
    secure: bool,
}

impl Cli {
    /// CLI values keyed by the environment variable they override.
    fn overrides(&self) -> HashMap<&'static str, String> {
        let mut overrides = HashMap::new();
        if let Some(port) = self.port {
            overrides.insert(env::SERVER_PORT, port.to_string());
        }
        if let Some(backend) = &self.backend {
            overrides.insert(env::BACKEND, backend.clone());
        }
        if let Some(port) = self.backend_port {
            overrides.insert(env::BACKEND_PORT, port.to_string());
        }
        if self.secure {
            overrides.insert(env::SECURE, "Y".to_string());
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let overrides = cli.overrides();
    let config = match config::load_with(cli.config.as_deref(), |key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("grpc-relay: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logging::init(&config.observability) {
        eprintln!("grpc-relay: failed to initialize logging: {}", err);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Relay node failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.relay.node_name,
        "grpc-relay starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        downstream = config.downstream.as_ref().map(|d| d.endpoint()).as_deref().unwrap_or("none"),
        listener_tls = config.listener.tls.is_some(),
        downstream_timeout_ms = config.timeouts.downstream_ms,
        max_retries = config.retries.max_retries,
        "Configuration loaded"
    );

    let provider = Arc::new(StaticConnectionProvider::from_config(&config).await?);

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let grace = config.timeouts.shutdown_grace();
    let shutdown = Shutdown::new();
    let server = RelayServer::new(config, provider);
    let mut serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut serving => {
            // The server stopped on its own; report why.
            result??;
            return Ok(());
        }
        _ = lifecycle::wait_for_signal() => {}
    }

    if shutdown.drain(grace, &mut serving).await {
        tracing::info!("Shutdown complete");
    } else {
        serving.abort();
        tracing::warn!("Forced shutdown");
    }
    Ok(())
}
