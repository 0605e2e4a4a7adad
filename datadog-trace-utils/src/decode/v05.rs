// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dictionary-compressed MessagePack wire format: a top-level 2-element array
//! `[dict: Vec<String>, traces: Vec<Vec<Span>>]` where each span is a fixed 12-element tuple
//! and every string-typed field is an index into `dict` rather than an inline string.

use crate::decode::error::DecodeError;
use crate::decode::number::read_number_slice;
use crate::decode::string::read_string_ref;
use datadog_trace_protobuf::pb;
use rmp::decode;
use std::collections::HashMap;

const PAYLOAD_LEN: u32 = 2;
const SPAN_ELEM_COUNT: u32 = 12;

fn get_from_dict<'a>(dict: &'a [String], idx: u32) -> Result<&'a str, DecodeError> {
    dict.get(idx as usize)
        .map(String::as_str)
        .ok_or_else(|| DecodeError::InvalidFormat(format!("dict index {idx} out of bounds")))
}

fn deserialize_dict(buf: &mut &[u8]) -> Result<Vec<String>, DecodeError> {
    let len = decode::read_array_len(buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading dict array len: {e}")))?;
    let mut dict = Vec::with_capacity(len as usize);
    for _ in 0..len {
        dict.push(read_string_ref(buf)?.to_owned());
    }
    Ok(dict)
}

fn deserialize_meta(buf: &mut &[u8], dict: &[String]) -> Result<HashMap<String, String>, DecodeError> {
    let len = decode::read_map_len(buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading meta map len: {e}")))?;
    let mut meta = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let key_idx: u32 = read_number_slice(buf)?;
        let value_idx: u32 = read_number_slice(buf)?;
        meta.insert(
            get_from_dict(dict, key_idx)?.to_owned(),
            get_from_dict(dict, value_idx)?.to_owned(),
        );
    }
    Ok(meta)
}

fn deserialize_metrics(buf: &mut &[u8], dict: &[String]) -> Result<HashMap<String, f64>, DecodeError> {
    let len = decode::read_map_len(buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading metrics map len: {e}")))?;
    let mut metrics = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let key_idx: u32 = read_number_slice(buf)?;
        let value: f64 = read_number_slice(buf)?;
        metrics.insert(get_from_dict(dict, key_idx)?.to_owned(), value);
    }
    Ok(metrics)
}

fn deserialize_span(buf: &mut &[u8], dict: &[String]) -> Result<pb::Span, DecodeError> {
    let len = decode::read_array_len(buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading span array len: {e}")))?;
    if len != SPAN_ELEM_COUNT {
        return Err(DecodeError::InvalidFormat(format!(
            "expected a {SPAN_ELEM_COUNT}-element span tuple, got {len}"
        )));
    }
    let service_idx: u32 = read_number_slice(buf)?;
    let name_idx: u32 = read_number_slice(buf)?;
    let resource_idx: u32 = read_number_slice(buf)?;
    let trace_id: u64 = read_number_slice(buf)?;
    let span_id: u64 = read_number_slice(buf)?;
    let parent_id: u64 = read_number_slice(buf)?;
    let start: i64 = read_number_slice(buf)?;
    let duration: i64 = read_number_slice(buf)?;
    let error: i32 = read_number_slice(buf)?;
    let meta = deserialize_meta(buf, dict)?;
    let metrics = deserialize_metrics(buf, dict)?;
    let type_idx: u32 = read_number_slice(buf)?;

    Ok(pb::Span {
        service: get_from_dict(dict, service_idx)?.to_owned(),
        name: get_from_dict(dict, name_idx)?.to_owned(),
        resource: get_from_dict(dict, resource_idx)?.to_owned(),
        trace_id,
        span_id,
        parent_id,
        start,
        duration: duration.max(0),
        error,
        meta,
        metrics,
        r#type: get_from_dict(dict, type_idx)?.to_owned(),
    })
}

/// Decodes a v0.5 payload into a sequence of traces (each trace a sequence of spans).
pub fn from_slice(data: &[u8]) -> Result<Vec<Vec<pb::Span>>, DecodeError> {
    let mut buf = data;
    let payload_len = decode::read_array_len(&mut buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading payload array len: {e}")))?;
    if payload_len != PAYLOAD_LEN {
        return Err(DecodeError::InvalidFormat(format!(
            "expected a {PAYLOAD_LEN}-element payload, got {payload_len}"
        )));
    }

    let dict = deserialize_dict(&mut buf)?;

    let trace_count = decode::read_array_len(&mut buf)
        .map_err(|e| DecodeError::InvalidFormat(format!("reading trace array len: {e}")))?;
    let mut traces = Vec::with_capacity(trace_count as usize);
    for _ in 0..trace_count {
        let span_count = decode::read_array_len(&mut buf)
            .map_err(|e| DecodeError::InvalidFormat(format!("reading span array len: {e}")))?;
        let mut spans = Vec::with_capacity(span_count as usize);
        for _ in 0..span_count {
            spans.push(deserialize_span(&mut buf, &dict)?);
        }
        traces.push(spans);
    }
    Ok(traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmp::encode;

    fn encode_payload(dict: &[&str], traces: &[Vec<(usize, usize, usize, u64, u64, u64, i64, i64, i32, usize)>]) -> Vec<u8> {
        let mut buf = Vec::new();
        encode::write_array_len(&mut buf, PAYLOAD_LEN).unwrap();
        encode::write_array_len(&mut buf, dict.len() as u32).unwrap();
        for s in dict {
            encode::write_str(&mut buf, s).unwrap();
        }
        encode::write_array_len(&mut buf, traces.len() as u32).unwrap();
        for trace in traces {
            encode::write_array_len(&mut buf, trace.len() as u32).unwrap();
            for &(service, name, resource, trace_id, span_id, parent_id, start, duration, error, type_idx) in trace {
                encode::write_array_len(&mut buf, SPAN_ELEM_COUNT).unwrap();
                encode::write_uint(&mut buf, service as u64).unwrap();
                encode::write_uint(&mut buf, name as u64).unwrap();
                encode::write_uint(&mut buf, resource as u64).unwrap();
                encode::write_uint(&mut buf, trace_id).unwrap();
                encode::write_uint(&mut buf, span_id).unwrap();
                encode::write_uint(&mut buf, parent_id).unwrap();
                encode::write_sint(&mut buf, start).unwrap();
                encode::write_sint(&mut buf, duration).unwrap();
                encode::write_sint(&mut buf, error as i64).unwrap();
                encode::write_map_len(&mut buf, 0).unwrap(); // meta
                encode::write_map_len(&mut buf, 0).unwrap(); // metrics
                encode::write_uint(&mut buf, type_idx as u64).unwrap();
            }
        }
        buf
    }

    #[test]
    fn decodes_a_single_span() {
        let dict = ["", "web", "web.request", "GET /"];
        let data = encode_payload(&dict, &[vec![(1, 2, 3, 111, 222, 0, 10, 50, 0, 0)]]);
        let traces = from_slice(&data).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].len(), 1);
        let span = &traces[0][0];
        assert_eq!(span.service, "web");
        assert_eq!(span.name, "web.request");
        assert_eq!(span.resource, "GET /");
        assert_eq!(span.trace_id, 111);
        assert_eq!(span.span_id, 222);
        assert_eq!(span.duration, 50);
        assert_eq!(span.r#type, "");
    }

    #[test]
    fn rejects_wrong_span_arity() {
        let mut buf = Vec::new();
        encode::write_array_len(&mut buf, PAYLOAD_LEN).unwrap();
        encode::write_array_len(&mut buf, 1).unwrap();
        encode::write_str(&mut buf, "").unwrap();
        encode::write_array_len(&mut buf, 1).unwrap();
        encode::write_array_len(&mut buf, 1).unwrap(); // one trace
        encode::write_array_len(&mut buf, 3).unwrap(); // malformed span: only 3 elements
        encode::write_uint(&mut buf, 0).unwrap();
        encode::write_uint(&mut buf, 0).unwrap();
        encode::write_uint(&mut buf, 0).unwrap();

        assert!(from_slice(&buf).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_dict_index() {
        let dict = [""];
        let data = encode_payload(&dict, &[vec![(5, 0, 0, 1, 2, 0, 0, 0, 0, 0)]]);
        assert!(from_slice(&data).is_err());
    }

    #[test]
    fn empty_payload_decodes_to_no_traces() {
        let dict: [&str; 1] = [""];
        let data = encode_payload(&dict, &[]);
        let traces = from_slice(&data).unwrap();
        assert!(traces.is_empty());
    }
}
