//! Distributed tracing header propagation.
//!
//! # Responsibilities
//! - Extract trace context from incoming call metadata
//! - Propagate trace context to downstream calls
//! - Mark forwarded calls with the relaying node
//!
//! # Design Decisions
//! - Fixed allow-list of B3 / OpenTracing keys; everything else is dropped
//! - Values are forwarded byte-for-byte, never rewritten
//! - At most one hop marker is added per forwarded call

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::Request;

/// Header keys forwarded verbatim across hops.
pub const TRACING_KEYS: [&str; 7] = [
    "x-request-id",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
    "x-ot-span-context",
];

/// Header naming the node that forwarded a call.
pub const HOP_MARKER: &str = "x-relay-hop";

/// Allow-listed tracing headers of one call, in allow-list order.
#[derive(Debug, Clone, Default)]
pub struct TracingContext {
    entries: Vec<(&'static str, MetadataValue<Ascii>)>,
}

impl TracingContext {
    /// Keep only the allow-listed keys of `metadata`.
    pub fn extract(metadata: &MetadataMap) -> Self {
        let entries = TRACING_KEYS
            .iter()
            .filter_map(|key| metadata.get(*key).map(|value| (*key, value.clone())))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value of an allow-listed key, if present and printable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// The caller's `x-request-id`, if it sent one.
    pub fn request_id(&self) -> Option<&str> {
        self.get("x-request-id")
    }

    /// Outbound metadata: the tracing headers unchanged plus an optional hop marker.
    pub fn propagate(&self, hop: Option<&str>) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        for (key, value) in &self.entries {
            metadata.insert(*key, value.clone());
        }
        if let Some(marker) = hop.and_then(|h| h.parse::<MetadataValue<Ascii>>().ok()) {
            metadata.insert(HOP_MARKER, marker);
        }
        metadata
    }

    /// Attach the propagated headers to an outbound request.
    pub fn apply<T>(&self, request: &mut Request<T>, hop: Option<&str>) {
        let outbound = request.metadata_mut();
        for (key, value) in &self.entries {
            tracing::trace!(key, "Propagating tracing header");
            outbound.insert(*key, value.clone());
        }
        if let Some(marker) = hop.and_then(|h| h.parse::<MetadataValue<Ascii>>().ok()) {
            outbound.insert(HOP_MARKER, marker);
        }
    }
}
