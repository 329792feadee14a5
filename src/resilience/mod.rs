//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to downstream:
//!     → timeouts.rs (per-call deadline)
//!     → On failure: errors.rs (classify into the canonical taxonomy)
//!     → retries.rs (retry transient kinds with backoff.rs delays)
//!     → On exhaustion: caller falls back to local synthesis
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - Retries only for transient kinds (unavailable, deadline, exhausted, internal)
//! - Cancellation by the caller stops retries immediately

pub mod backoff;
pub mod errors;
pub mod retries;
pub mod timeouts;

pub use backoff::RetryPolicy;
pub use errors::{classify, Classify, ErrorCategory, ErrorKind, RelayError};
pub use retries::{RetryError, RetryExecutor};
pub use timeouts::with_deadline;
