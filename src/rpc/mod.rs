//! gRPC relay subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound call (server.rs)
//!     → service.rs (extract tracing context, resolve route)
//!     → relay.rs (forward to the hop, or fall back)
//!     → synth.rs (local answers)
//!     → stream.rs (cancellable response streams)
//!     → context.rs (one completion record per call)
//! ```
//!
//! # Design Decisions
//! - Route is resolved once per call; a call never changes hop mid-flight
//! - Response order always matches request order
//! - A streaming call ends with at most one terminal error

pub mod context;
pub mod relay;
pub mod server;
pub mod service;
pub mod stream;
pub mod synth;

pub use context::{CallContext, Mode};
pub use relay::{Forwarder, Route};
pub use server::{RelayServer, ServerError};
pub use service::RelayService;
pub use stream::CallStream;
