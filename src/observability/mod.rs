//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → tracing.rs (trace headers carried across hops)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Distributed tracing (B3 / OpenTracing headers relayed unchanged)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows through every call log record
//! - Metrics are cheap (no-ops until an exporter is installed)

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::tracing::{TracingContext, HOP_MARKER, TRACING_KEYS};
