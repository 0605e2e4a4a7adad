// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turning decoded spans/chunks (§ decode) into a `pb::TracerPayload` ready for the outbound
//! channel: trace-id grouping for the flat v0.1 wire shape, basic shape normalization, and
//! attaching the request-header tags every version carries outside its body.

use datadog_trace_protobuf::pb;
use std::collections::HashMap;

const UNNAMED_SERVICE: &str = "unnamed-service";
const UNNAMED_OPERATION: &str = "unnamed-operation";

const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";

/// A priority that has not yet been assigned by a sampler. Chunks built here from wire payloads
/// that don't carry an explicit sampling decision use this rather than guessing one.
pub const NO_SAMPLING_PRIORITY: i32 = i32::MIN;
/// `AutoKeep`: the decision an agent applies when the tracer sent no decision of its own and a
/// default has to be picked anyway (e.g. OTLP ingestion).
pub const AUTO_KEEP: i32 = 1;

/// Header-sourced fields every trace payload version carries outside its body.
#[derive(Debug, Clone, Default)]
pub struct TracerHeaderTags<'a> {
    pub lang: &'a str,
    pub lang_version: &'a str,
    pub tracer_version: &'a str,
    pub container_id: &'a str,
}

/// Fills empty `Service`/`Name` with a sentinel and `Resource` from `Name` when also empty, and
/// clamps a negative `Duration` to zero. This is the minimum needed to hand a well-formed span
/// downstream; it is not a substitute for full trace normalization (tag rewriting, span-kind
/// inference), which happens further down the pipeline.
pub fn normalize_span(span: &mut pb::Span) {
    if span.service.is_empty() {
        span.service = UNNAMED_SERVICE.to_string();
    }
    if span.name.is_empty() {
        span.name = UNNAMED_OPERATION.to_string();
    }
    if span.resource.is_empty() {
        span.resource = span.name.clone();
    }
    if span.duration < 0 {
        span.duration = 0;
    }
}

/// The `_sampling_priority_v1` metric from the first span that carries one, if any.
pub fn priority_from_spans(spans: &[pb::Span]) -> Option<i32> {
    spans
        .iter()
        .find_map(|s| s.metrics.get(SAMPLING_PRIORITY_KEY))
        .map(|p| *p as i32)
}

/// Builds a chunk from a decoded trace, normalizing every span and resolving priority from the
/// `_sampling_priority_v1` metric (or [`NO_SAMPLING_PRIORITY`] if none of the spans carry one).
pub fn chunk_from_spans(mut spans: Vec<pb::Span>) -> pb::TraceChunk {
    let priority = priority_from_spans(&spans).unwrap_or(NO_SAMPLING_PRIORITY);
    for span in &mut spans {
        normalize_span(span);
    }
    pb::TraceChunk {
        priority,
        spans,
        dropped_trace: false,
        tags: HashMap::new(),
    }
}

/// v0.1's wire format is a flat span list with no chunk boundaries; regroup by `TraceID` into
/// one chunk per trace, in first-seen order.
pub fn group_flat_spans(spans: Vec<pb::Span>) -> Vec<pb::TraceChunk> {
    let mut order: Vec<u64> = Vec::new();
    let mut grouped: HashMap<u64, Vec<pb::Span>> = HashMap::new();
    for span in spans {
        let trace_id = span.trace_id;
        grouped.entry(trace_id).or_insert_with(|| {
            order.push(trace_id);
            Vec::new()
        });
        grouped.get_mut(&trace_id).unwrap().push(span);
    }
    order
        .into_iter()
        .map(|id| chunk_from_spans(grouped.remove(&id).unwrap()))
        .collect()
}

/// Builds chunks (with per-chunk normalization/priority resolution) from the plain trace arrays
/// produced by the v0.2–v0.5/v0.7 decoders.
pub fn chunks_from_traces(traces: Vec<Vec<pb::Span>>) -> Vec<pb::TraceChunk> {
    traces.into_iter().map(chunk_from_spans).collect()
}

/// Attaches request-header tags to a freshly decoded set of chunks, producing the `TracerPayload`
/// published on the outbound channel. `Env`/`Hostname`/`Tags` are left for the container-tag
/// enrichment step (outside this module) to fill in.
pub fn build_tracer_payload(
    chunks: Vec<pb::TraceChunk>,
    header_tags: &TracerHeaderTags,
) -> pb::TracerPayload {
    pb::TracerPayload {
        container_id: header_tags.container_id.to_string(),
        language_name: header_tags.lang.to_string(),
        language_version: header_tags.lang_version.to_string(),
        tracer_version: header_tags.tracer_version.to_string(),
        env: String::new(),
        hostname: String::new(),
        tags: HashMap::new(),
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace_id: u64, span_id: u64) -> pb::Span {
        pb::Span {
            trace_id,
            span_id,
            ..Default::default()
        }
    }

    #[test]
    fn normalize_fills_sentinels_and_clamps_duration() {
        let mut s = pb::Span {
            duration: -5,
            ..Default::default()
        };
        normalize_span(&mut s);
        assert_eq!(s.service, UNNAMED_SERVICE);
        assert_eq!(s.name, UNNAMED_OPERATION);
        assert_eq!(s.resource, UNNAMED_OPERATION);
        assert_eq!(s.duration, 0);
    }

    #[test]
    fn normalize_leaves_non_empty_fields_alone() {
        let mut s = pb::Span {
            service: "web".to_string(),
            name: "web.request".to_string(),
            resource: "GET /".to_string(),
            duration: 10,
            ..Default::default()
        };
        normalize_span(&mut s);
        assert_eq!(s.service, "web");
        assert_eq!(s.resource, "GET /");
        assert_eq!(s.duration, 10);
    }

    #[test]
    fn groups_flat_spans_by_trace_id_preserving_order() {
        let spans = vec![span(2, 1), span(1, 1), span(2, 2), span(1, 2)];
        let chunks = group_flat_spans(spans);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].spans.len(), 2);
        assert!(chunks[0].spans.iter().all(|s| s.trace_id == 2));
        assert!(chunks[1].spans.iter().all(|s| s.trace_id == 1));
    }

    #[test]
    fn chunk_priority_defaults_to_no_priority_sentinel() {
        let chunk = chunk_from_spans(vec![span(1, 1)]);
        assert_eq!(chunk.priority, NO_SAMPLING_PRIORITY);
    }

    #[test]
    fn chunk_priority_resolves_from_sampling_metric() {
        let mut s = span(1, 1);
        s.metrics.insert(SAMPLING_PRIORITY_KEY.to_string(), 2.0);
        let chunk = chunk_from_spans(vec![s]);
        assert_eq!(chunk.priority, 2);
    }

    #[test]
    fn build_tracer_payload_attaches_header_tags() {
        let chunks = chunks_from_traces(vec![vec![span(1, 1)]]);
        let header_tags = TracerHeaderTags {
            lang: "python",
            lang_version: "3.12",
            tracer_version: "2.1.0",
            container_id: "abc123",
        };
        let payload = build_tracer_payload(chunks, &header_tags);
        assert_eq!(payload.language_name, "python");
        assert_eq!(payload.container_id, "abc123");
        assert_eq!(payload.chunks.len(), 1);
    }
}
