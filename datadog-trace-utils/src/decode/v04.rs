// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! v0.1 (flat JSON span list) through v0.4 (JSON or MessagePack traces) decoding. None of these
//! wire shapes need a hand-rolled reader: [`pb::Span`] already carries the `serde` impls that
//! give null-tolerant `meta` values and duration clamping, so a direct `serde_json`/`rmp_serde`
//! deserialization onto it is enough.

use crate::decode::error::DecodeError;
use datadog_trace_protobuf::pb;

/// v0.1: a flat JSON array of spans, with no trace grouping performed by the wire format itself.
pub fn decode_json_flat_spans(data: &[u8]) -> Result<Vec<pb::Span>, DecodeError> {
    serde_json::from_slice(data).map_err(DecodeError::from)
}

/// v0.2 / v0.3 / v0.4 JSON body: a sequence of traces, each trace a sequence of spans.
pub fn decode_json_traces(data: &[u8]) -> Result<Vec<Vec<pb::Span>>, DecodeError> {
    serde_json::from_slice(data).map_err(DecodeError::from)
}

/// v0.3 / v0.4 MessagePack body: same shape as [`decode_json_traces`], MessagePack-encoded.
pub fn decode_msgpack_traces(data: &[u8]) -> Result<Vec<Vec<pb::Span>>, DecodeError> {
    rmp_serde::from_slice(data).map_err(DecodeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_span() -> pb::Span {
        pb::Span {
            trace_id: 1,
            span_id: 2,
            parent_id: 0,
            service: "web".to_string(),
            name: "web.request".to_string(),
            resource: "GET /".to_string(),
            r#type: "web".to_string(),
            start: 1,
            duration: 5,
            error: 0,
            meta: HashMap::new(),
            metrics: HashMap::new(),
        }
    }

    #[test]
    fn decodes_flat_json_spans() {
        let span = sample_span();
        let json = serde_json::to_vec(&vec![span.clone()]).unwrap();
        let spans = decode_json_flat_spans(&json).unwrap();
        assert_eq!(spans, vec![span]);
    }

    #[test]
    fn decodes_json_traces() {
        let span = sample_span();
        let json = serde_json::to_vec(&vec![vec![span.clone()]]).unwrap();
        let traces = decode_json_traces(&json).unwrap();
        assert_eq!(traces, vec![vec![span]]);
    }

    #[test]
    fn decodes_msgpack_traces() {
        let span = sample_span();
        let encoded = rmp_serde::to_vec_named(&vec![vec![span.clone()]]).unwrap();
        let traces = decode_msgpack_traces(&encoded).unwrap();
        assert_eq!(traces, vec![vec![span]]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode_json_traces(b"not json").is_err());
    }

    #[test]
    fn negative_duration_clamps_to_zero_through_decode() {
        let json = br#"[[{"trace_id":1,"span_id":2,"duration":-9}]]"#;
        let traces = decode_json_traces(json).unwrap();
        assert_eq!(traces[0][0].duration, 0);
    }
}
