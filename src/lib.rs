//! Chain-capable gRPC relay node.
//!
//! A node serves the `LandingService` (unary, server-streaming,
//! client-streaming and bidirectional calls). With a downstream configured it
//! forwards each call to the next node and relays the answers back; without
//! one, or when the downstream fails transiently, it synthesizes the answers
//! itself.
//!
//! ```text
//!   client ──▶ node A ──▶ node B ──▶ node C (standalone)
//!              relay      relay      local synthesis
//! ```

pub mod proto {
    #![allow(clippy::all)]
    tonic::include_proto!("org.feuyeux.grpc");
}

// Core subsystems
pub mod config;
pub mod net;
pub mod rpc;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::RelayConfig;
pub use lifecycle::Shutdown;
pub use net::{ConnectionProvider, StaticConnectionProvider};
pub use rpc::{RelayServer, RelayService};
