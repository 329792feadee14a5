//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (GRPC_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → handed to net/ and rpc/ at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_with, ConfigError};
pub use schema::{
    ClientTlsConfig, DownstreamConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    RelayConfig, RelaySettings, RetryConfig, TimeoutConfig, TlsConfig,
};
