// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-version payload decoding: JSON/MessagePack bodies in, a uniform sequence of
//! `Vec<pb::Span>` traces out. Dictionary expansion (v0.5) and direct `TracerPayload` decode
//! (v0.7) are handled by dedicated submodules; everything else is a thin `serde` pass since
//! [`datadog_trace_protobuf::pb::Span`] already carries the wire-tolerant deserializers it needs.

pub mod error;
mod number;
mod string;
pub mod stats;
pub mod v04;
pub mod v05;
pub mod v07;

pub use error::DecodeError;

use datadog_trace_protobuf::pb;

/// The payload versions this decoder accepts on `/v0.{1..7}/traces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceVersion {
    V01,
    V02,
    V03,
    V04,
    V05,
    V07,
}

/// Whether the request body is JSON or MessagePack. `/info` negotiation and the receiver's
/// `Content-Type` check (§4.I, not this module) decide which applies to a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    MsgPack,
}

/// Decodes a request body into a sequence of traces, each trace an ordered sequence of spans.
///
/// v0.1 bodies are a flat span list rather than a sequence of traces; callers that need chunk
/// grouping for v0.1 should use [`crate::tracer_payload::group_flat_spans`] on the single
/// resulting trace.
pub fn decode_traces(
    version: TraceVersion,
    encoding: Encoding,
    data: &[u8],
) -> Result<Vec<Vec<pb::Span>>, DecodeError> {
    match (version, encoding) {
        (TraceVersion::V01, Encoding::Json) => {
            v04::decode_json_flat_spans(data).map(|spans| vec![spans])
        }
        (TraceVersion::V01, Encoding::MsgPack) => Err(DecodeError::InvalidFormat(
            "v0.1 does not support MessagePack".to_string(),
        )),
        (TraceVersion::V02 | TraceVersion::V03 | TraceVersion::V04, Encoding::Json) => {
            v04::decode_json_traces(data)
        }
        (TraceVersion::V03 | TraceVersion::V04, Encoding::MsgPack) => {
            v04::decode_msgpack_traces(data)
        }
        (TraceVersion::V02, Encoding::MsgPack) => Err(DecodeError::InvalidFormat(
            "v0.2 does not support MessagePack".to_string(),
        )),
        (TraceVersion::V05, Encoding::MsgPack) => v05::from_slice(data),
        (TraceVersion::V05, Encoding::Json) => Err(DecodeError::InvalidFormat(
            "v0.5 requires MessagePack".to_string(),
        )),
        (TraceVersion::V07, Encoding::MsgPack) => {
            v07::decode_tracer_payload(data).map(|payload| {
                payload
                    .chunks
                    .into_iter()
                    .map(|chunk| chunk.spans)
                    .collect()
            })
        }
        (TraceVersion::V07, Encoding::Json) => Err(DecodeError::InvalidFormat(
            "v0.7 requires MessagePack".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v01_wraps_flat_spans_into_a_single_trace() {
        let json = br#"[{"trace_id":1,"span_id":2},{"trace_id":1,"span_id":3}]"#;
        let traces = decode_traces(TraceVersion::V01, Encoding::Json, json).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].len(), 2);
    }

    #[test]
    fn v01_rejects_msgpack() {
        let result = decode_traces(TraceVersion::V01, Encoding::MsgPack, b"");
        assert!(result.is_err());
    }

    #[test]
    fn v04_accepts_both_encodings() {
        let json = br#"[[{"trace_id":1,"span_id":2}]]"#;
        assert!(decode_traces(TraceVersion::V04, Encoding::Json, json).is_ok());
        let msgpack = rmp_serde::to_vec_named(&vec![vec![pb::Span {
            trace_id: 1,
            span_id: 2,
            ..Default::default()
        }]])
        .unwrap();
        assert!(decode_traces(TraceVersion::V04, Encoding::MsgPack, &msgpack).is_ok());
    }

    #[test]
    fn v02_rejects_msgpack() {
        let result = decode_traces(TraceVersion::V02, Encoding::MsgPack, b"");
        assert!(result.is_err());
    }
}
