// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! OTLP `ExportTraceServiceRequest` → internal `pb::TracerPayload` translation. One
//! `TracerPayload` is produced per `ResourceSpans` entry; chunks within it are grouped by
//! trace id the same way the wire decoders in `datadog-trace-utils` do, but priority falls back
//! to `AutoKeep` rather than "unscored" per the mapping rules below.

use datadog_trace_protobuf::pb;
use datadog_trace_utils::tracer_payload::{priority_from_spans, AUTO_KEEP};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, ResourceSpans, Span as OtlpSpan};
use std::collections::HashMap;

const NO_SERVICE_NAME: &str = "OTLPResourceNoServiceName";
const ANALYTICS_EVENT_KEY: &str = "_dd.analytics.event.sampling_rate";
const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";

/// Translates a full OTLP export request into one `TracerPayload` per resource.
pub fn translate_export_request(req: &ExportTraceServiceRequest) -> Vec<pb::TracerPayload> {
    req.resource_spans
        .iter()
        .map(translate_resource_spans)
        .collect()
}

/// Translates one `ResourceSpans` entry (one OTLP "resource", i.e. one service/process) into a
/// `TracerPayload` with its spans grouped into chunks by trace id.
pub fn translate_resource_spans(rs: &ResourceSpans) -> pb::TracerPayload {
    let resource_tags = rs
        .resource
        .as_ref()
        .map(flatten_attributes)
        .unwrap_or_default();
    let hostname = resource_tags
        .get("host.name")
        .cloned()
        .unwrap_or_default();
    let env = resource_tags.get("deployment.environment").cloned().unwrap_or_default();

    let mut spans: Vec<pb::Span> = Vec::new();
    for scope_spans in &rs.scope_spans {
        let lib_name = scope_spans
            .scope
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("");
        for otlp_span in &scope_spans.spans {
            spans.push(translate_span(otlp_span, &resource_tags, lib_name));
        }
    }

    let chunks = group_by_trace_id(spans);

    pb::TracerPayload {
        hostname,
        env,
        tags: HashMap::new(),
        chunks,
        ..Default::default()
    }
}

/// Groups spans into chunks by trace id, resolving chunk priority from the
/// `_sampling_priority_v1` metric or falling back to `AutoKeep` (unlike the wire decoders, which
/// fall back to "unscored").
fn group_by_trace_id(spans: Vec<pb::Span>) -> Vec<pb::TraceChunk> {
    let mut order: Vec<u64> = Vec::new();
    let mut grouped: HashMap<u64, Vec<pb::Span>> = HashMap::new();
    for span in spans {
        grouped
            .entry(span.trace_id)
            .or_insert_with(|| {
                order.push(span.trace_id);
                Vec::new()
            })
            .push(span);
    }
    order
        .into_iter()
        .map(|id| {
            let spans = grouped.remove(&id).unwrap();
            let priority = priority_from_spans(&spans).unwrap_or(AUTO_KEEP);
            pb::TraceChunk {
                priority,
                spans,
                dropped_trace: false,
                tags: HashMap::new(),
            }
        })
        .collect()
}

fn flatten_attributes(resource: &Resource) -> HashMap<String, String> {
    let mut tags = HashMap::with_capacity(resource.attributes.len());
    for kv in &resource.attributes {
        tags.insert(kv.key.clone(), any_value_to_string(kv.value.as_ref()));
    }
    tags
}

fn any_value_to_string(value: Option<&AnyValue>) -> String {
    match value.and_then(|v| v.value.as_ref()) {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => d.to_string(),
        Some(Value::BytesValue(b)) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

fn trace_id_to_u64(bytes: &[u8]) -> u64 {
    // Last 8 bytes of the 16-byte OTLP trace id, big-endian.
    let tail = if bytes.len() >= 8 {
        &bytes[bytes.len() - 8..]
    } else {
        bytes
    };
    let mut buf = [0u8; 8];
    buf[8 - tail.len()..].copy_from_slice(tail);
    u64::from_be_bytes(buf)
}

fn span_id_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}

fn span_kind_str(kind: i32) -> &'static str {
    match SpanKind::try_from(kind).unwrap_or(SpanKind::Unspecified) {
        SpanKind::Server => "server",
        SpanKind::Client => "client",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
        SpanKind::Internal | SpanKind::Unspecified => "internal",
    }
}

fn span_type_from_kind(kind: i32, db_system: Option<&str>) -> &'static str {
    if db_system.is_some() {
        return "db";
    }
    match SpanKind::try_from(kind).unwrap_or(SpanKind::Unspecified) {
        SpanKind::Server => "web",
        SpanKind::Client => "http",
        _ => "custom",
    }
}

fn resource_attr(meta: &HashMap<String, String>, key: &str) -> Option<String> {
    meta.get(key).cloned()
}

/// Translates one OTLP span into an internal `pb::Span`, applying the attribute mapping and
/// fallback rules.
pub fn translate_span(
    otlp_span: &OtlpSpan,
    resource_tags: &HashMap<String, String>,
    instrumentation_lib: &str,
) -> pb::Span {
    let mut meta: HashMap<String, String> = resource_tags.clone();
    let mut metrics: HashMap<String, f64> = HashMap::new();

    let mut name = String::new();
    let mut service = String::new();
    let mut resource = String::new();
    let mut r#type = String::new();
    let mut peer_service: Option<String> = None;

    for kv in &otlp_span.attributes {
        let value = kv.value.as_ref();
        match kv.key.as_str() {
            "operation.name" => name = any_value_to_string(value),
            "service.name" => service = any_value_to_string(value),
            "resource.name" => resource = any_value_to_string(value),
            "span.type" => r#type = any_value_to_string(value),
            "analytics.event" => {
                metrics.insert(ANALYTICS_EVENT_KEY.to_string(), 1.0);
            }
            "sampling.priority" => {
                if let Some(p) = numeric_any_value(value) {
                    metrics.insert(SAMPLING_PRIORITY_KEY.to_string(), p);
                }
            }
            "peer.service" => peer_service = Some(any_value_to_string(value)),
            _ => match numeric_any_value(value) {
                Some(n) => {
                    metrics.insert(kv.key.clone(), n);
                }
                None => {
                    meta.insert(kv.key.clone(), any_value_to_string(value));
                }
            },
        }
    }

    if let Some(peer) = peer_service {
        service = peer;
    }

    if name.is_empty() {
        name = if instrumentation_lib.is_empty() {
            format!("opentelemetry.{}", span_kind_str(otlp_span.kind))
        } else {
            format!("{}.{}", instrumentation_lib, span_kind_str(otlp_span.kind))
        };
    }
    if service.is_empty() {
        service = NO_SERVICE_NAME.to_string();
    }
    if resource.is_empty() {
        resource = resolve_resource_fallback(&meta).unwrap_or_else(|| name.clone());
    }
    if r#type.is_empty() {
        let db_system = resource_attr(&meta, "db.system");
        r#type = span_type_from_kind(otlp_span.kind, db_system.as_deref()).to_string();
    }

    let error = if let Some(status) = &otlp_span.status {
        if StatusCode::try_from(status.code).unwrap_or(StatusCode::Unset) == StatusCode::Error {
            apply_error_mapping(&mut meta, otlp_span, status);
            1
        } else {
            0
        }
    } else {
        0
    };

    pb::Span {
        trace_id: trace_id_to_u64(&otlp_span.trace_id),
        span_id: span_id_to_u64(&otlp_span.span_id),
        parent_id: span_id_to_u64(&otlp_span.parent_span_id),
        service,
        name,
        resource,
        r#type,
        start: otlp_span.start_time_unix_nano as i64,
        duration: (otlp_span.end_time_unix_nano as i64 - otlp_span.start_time_unix_nano as i64).max(0),
        error,
        meta,
        metrics,
    }
}

fn numeric_any_value(value: Option<&AnyValue>) -> Option<f64> {
    match value.and_then(|v| v.value.as_ref()) {
        Some(Value::DoubleValue(d)) => Some(*d),
        Some(Value::IntValue(i)) => Some(*i as f64),
        _ => None,
    }
}

fn resolve_resource_fallback(meta: &HashMap<String, String>) -> Option<String> {
    if let Some(method) = resource_attr(meta, "http.method") {
        let route = resource_attr(meta, "http.route");
        return Some(match route {
            Some(route) => format!("{method} {route}"),
            None => method,
        });
    }
    if let Some(op) = resource_attr(meta, "messaging.operation") {
        let dest = resource_attr(meta, "messaging.destination");
        return Some(match dest {
            Some(dest) => format!("{op} {dest}"),
            None => op,
        });
    }
    if let Some(method) = resource_attr(meta, "rpc.method") {
        let service = resource_attr(meta, "rpc.service");
        return Some(match service {
            Some(service) => format!("{method} {service}"),
            None => method,
        });
    }
    None
}

fn apply_error_mapping(
    meta: &mut HashMap<String, String>,
    otlp_span: &OtlpSpan,
    status: &opentelemetry_proto::tonic::trace::v1::Status,
) {
    for event in &otlp_span.events {
        if event.name != "exception" {
            continue;
        }
        for attr in &event.attributes {
            let value = any_value_to_string(attr.value.as_ref());
            match attr.key.as_str() {
                "exception.message" => {
                    meta.insert("error.msg".to_string(), value);
                }
                "exception.type" => {
                    meta.insert("error.type".to_string(), value);
                }
                "exception.stacktrace" => {
                    meta.insert("error.stack".to_string(), value);
                }
                _ => {}
            }
        }
        if meta.contains_key("error.msg") {
            return;
        }
    }
    if !status.message.is_empty() {
        meta.entry("error.msg".to_string()).or_insert_with(|| status.message.clone());
        return;
    }
    if let Some(code) = meta.get("http.status_code").cloned() {
        let text = meta.get("http.status_text").cloned().unwrap_or_default();
        let msg = if text.is_empty() { code } else { format!("{code} {text}") };
        meta.entry("error.msg".to_string()).or_insert(msg);
    }
}
