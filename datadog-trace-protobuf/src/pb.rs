// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire types shared by every stage of the ingestion pipeline: the payload decoder produces
//! these, the obfuscator mutates them in place, the OTLP translator builds them directly, and
//! the exporter (out of scope here) would serialize them back out.
//!
//! These are plain owned structs rather than the zero-copy, interned representation used
//! elsewhere in the wider trace-agent family: there is no FFI boundary here to amortize an
//! arena over, and the one place a real borrow discipline pays for itself (the SQL tokenizer)
//! already has its own `Token` type for that.

use crate::deserializers::{
    deserialize_duration, deserialize_map_with_nullable_values, deserialize_null_into_default,
    is_default,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub trace_id: u64,
    #[serde(default)]
    pub span_id: u64,
    #[serde(default)]
    pub parent_id: u64,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub duration: i64,
    #[serde(default)]
    pub error: i32,
    #[serde(
        default,
        deserialize_with = "deserialize_map_with_nullable_values",
        skip_serializing_if = "is_default"
    )]
    pub meta: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "is_default")]
    pub metrics: HashMap<String, f64>,
}

impl Span {
    /// Identity per §3: `(trace_id, span_id)`.
    pub fn key(&self) -> (u64, u64) {
        (self.trace_id, self.span_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceChunk {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub dropped_trace: bool,
    #[serde(default, skip_serializing_if = "is_default")]
    pub tags: HashMap<String, String>,
}

impl TraceChunk {
    /// All spans in a chunk must share a `trace_id`; returns it if the chunk is non-empty and
    /// consistent, `None` otherwise. Callers that need to reject inconsistent chunks can match
    /// on `None` explicitly rather than silently picking the first span's id.
    pub fn trace_id(&self) -> Option<u64> {
        let first = self.spans.first()?.trace_id;
        self.spans
            .iter()
            .all(|s| s.trace_id == first)
            .then_some(first)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerPayload {
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub language_name: String,
    #[serde(default)]
    pub language_version: String,
    #[serde(default)]
    pub tracer_version: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "is_default")]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub chunks: Vec<TraceChunk>,
}

/// `/v0.6/stats` envelope. Decoded in full so the endpoint round-trips a `200`, but the bucket
/// contents themselves are opaque — stats aggregation is out of scope here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStatsPayload {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub tracer_version: String,
    #[serde(default)]
    pub runtime_id: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub agent_aggregation: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_into_default")]
    pub stats: Vec<serde_json::Value>,
}
