//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap downstream calls with a deadline
//! - Advertise the deadline to the downstream via `grpc-timeout`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Deadlines are per downstream call, never per relay session
//! - An elapsed deadline is reported as DEADLINE_EXCEEDED so it classifies as transient

use std::future::Future;
use std::time::Duration;

use tonic::{Request, Status};

/// Await `future`, failing with `DEADLINE_EXCEEDED` once `deadline` elapses.
pub async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "downstream did not answer within {}ms",
            deadline.as_millis()
        ))),
    }
}

/// Set the `grpc-timeout` header on an outbound request.
pub fn set_deadline<T>(request: &mut Request<T>, deadline: Duration) {
    request.set_timeout(deadline);
}
