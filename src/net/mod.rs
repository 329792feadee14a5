//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     RelayConfig
//!     → tls.rs (load + check PEM material)
//!     → connection.rs (listener credentials, lazy downstream channel)
//!     → ConnectionProvider handed to the rpc layer
//!
//! Per call:
//!     ConnectionProvider::client() → Some(Hop) | None
//! ```
//!
//! # Design Decisions
//! - One downstream channel per process, multiplexed by every call
//! - TLS is optional on both sides and handled transparently

pub mod connection;
pub mod tls;

pub use connection::{
    ConnectError, ConnectionProvider, Hop, ServerCredentials, StaticConnectionProvider,
};
