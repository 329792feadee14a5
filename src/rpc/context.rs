//! Per-call bookkeeping.
//!
//! # Responsibilities
//! - Assign the request ID used in every log line of a call
//! - Emit exactly one completion record per call (request id, method, peer,
//!   mode, duration, code)
//! - Count calls and fallbacks
//!
//! # Design Decisions
//! - Reuse the caller's `x-request-id` when present, otherwise a UUID v4
//! - Completion records go through the error mapper so codes are canonical

use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;

use crate::observability::{metrics, TracingContext};
use crate::resilience::errors::{self, Classify};

/// Where a call's answers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Local,
    Relay,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Relay => "relay",
        }
    }
}

/// Identity and timing of one inbound call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    pub method: &'static str,
    pub peer: String,
    pub mode: Mode,
    start: Instant,
}

impl CallContext {
    pub fn new(
        method: &'static str,
        tracing: &TracingContext,
        peer: Option<SocketAddr>,
        mode: Mode,
    ) -> Self {
        let request_id = tracing
            .request_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let peer = peer.map_or_else(|| "unknown".to_string(), |addr| addr.to_string());

        tracing::debug!(
            request_id = %request_id,
            method,
            peer = %peer,
            mode = mode.as_str(),
            tracing_headers = tracing.len(),
            "Call received"
        );

        Self {
            request_id,
            method,
            peer,
            mode,
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// The call completed normally.
    pub fn finish(&self, answered: usize) {
        tracing::info!(
            request_id = %self.request_id,
            method = self.method,
            peer = %self.peer,
            mode = self.mode.as_str(),
            duration_ms = self.elapsed_ms(),
            answered,
            code = "ok",
            "Call completed"
        );
        metrics::record_call(self.method, self.mode.as_str(), "ok", self.start);
    }

    /// The call ended with an error visible to the caller.
    pub fn fail<E: Classify + ?Sized>(&self, error: &E) {
        let kind = error.kind();
        tracing::error!(
            request_id = %self.request_id,
            method = self.method,
            peer = %self.peer,
            mode = self.mode.as_str(),
            duration_ms = self.elapsed_ms(),
            code = kind.as_str(),
            error = %errors::format(error, &self.request_id),
            "Call failed"
        );
        metrics::record_call(self.method, self.mode.as_str(), kind.as_str(), self.start);
    }

    /// The caller went away before the call completed.
    pub fn cancelled(&self) {
        tracing::info!(
            request_id = %self.request_id,
            method = self.method,
            peer = %self.peer,
            mode = self.mode.as_str(),
            duration_ms = self.elapsed_ms(),
            code = "cancelled",
            "Call cancelled by peer"
        );
        metrics::record_call(self.method, self.mode.as_str(), "cancelled", self.start);
    }

    /// The downstream failed and the call (or its remainder) is answered locally.
    pub fn fallback<E: Classify + ?Sized>(&self, error: &E, remaining: usize) {
        let kind = error.kind();
        tracing::warn!(
            request_id = %self.request_id,
            method = self.method,
            peer = %self.peer,
            duration_ms = self.elapsed_ms(),
            code = kind.as_str(),
            remaining,
            error = %errors::format(error, &self.request_id),
            "Downstream failed, answering locally"
        );
        metrics::record_fallback(self.method, kind.as_str());
    }

    /// Reading the inbound stream failed.
    pub fn read_failed<E: Classify + ?Sized>(&self, error: &E) {
        let kind = error.kind();
        tracing::warn!(
            request_id = %self.request_id,
            method = self.method,
            peer = %self.peer,
            duration_ms = self.elapsed_ms(),
            code = kind.as_str(),
            error = %errors::format(error, &self.request_id),
            "Inbound stream failed"
        );
        metrics::record_call(self.method, self.mode.as_str(), kind.as_str(), self.start);
    }
}
