//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): calls by method, mode, status code
//! - `relay_request_duration_seconds` (histogram): call latency by method
//! - `relay_fallbacks_total` (counter): switches to local synthesis by method, reason
//! - `relay_retries_total` (counter): downstream retries by operation
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one finished call.
pub fn record_call(method: &'static str, mode: &'static str, code: &'static str, start: Instant) {
    counter!(
        "relay_requests_total",
        "method" => method,
        "mode" => mode,
        "code" => code
    )
    .increment(1);
    histogram!("relay_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

/// Record a switch from relaying to local synthesis.
pub fn record_fallback(method: &'static str, reason: &'static str) {
    counter!("relay_fallbacks_total", "method" => method, "reason" => reason).increment(1);
}

/// Record one retry of a downstream operation.
pub fn record_retry(operation: &str) {
    counter!("relay_retries_total", "operation" => operation.to_string()).increment(1);
}
