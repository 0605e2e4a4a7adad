// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP handler logic for the `/v0.{1..7}/traces`, `/v0.{1..4}/services`, `/v0.6/stats` and
//! `/info` endpoints, plus the admission-control/escape-task protocol in front of them.

use crate::info::InfoBlob;
use crate::peer_cred::{ContainerIdCache, PeerPid};
use crate::rate_limiter::RateLimiter;
use crate::responses::{allows_msgpack, rates_by_service_body, wants_rates_response};
use bytes::Bytes;
use datadog_trace_obfuscation::obfuscate::Obfuscator;
use datadog_trace_protobuf::pb;
use datadog_trace_utils::decode::{decode_traces, Encoding, TraceVersion};
use datadog_trace_utils::decode::stats::decode_msgpack as decode_stats;
use datadog_trace_utils::tracer_payload::{
    build_tracer_payload, chunks_from_traces, group_flat_spans, TracerHeaderTags,
};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

const DATADOG_AGENT_VERSION: HeaderName = HeaderName::from_static("datadog-agent-version");
const DATADOG_AGENT_STATE: HeaderName = HeaderName::from_static("datadog-agent-state");
const DATADOG_RATES_PAYLOAD_VERSION: HeaderName =
    HeaderName::from_static("datadog-rates-payload-version");
const X_DATADOG_TRACE_COUNT: &str = "x-datadog-trace-count";
const ESCAPE_WARN_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Traces(TraceVersion),
    Services,
    Stats,
    Info,
}

fn route(method: &Method, path: &str) -> Option<EndpointKind> {
    if method != Method::POST && !(method == Method::GET && path == "/info") {
        return None;
    }
    Some(match path {
        "/spans" | "/v0.1/spans" => EndpointKind::Traces(TraceVersion::V01),
        "/v0.2/traces" => EndpointKind::Traces(TraceVersion::V02),
        "/v0.3/traces" => EndpointKind::Traces(TraceVersion::V03),
        "/v0.4/traces" => EndpointKind::Traces(TraceVersion::V04),
        "/v0.5/traces" => EndpointKind::Traces(TraceVersion::V05),
        "/v0.7/traces" => EndpointKind::Traces(TraceVersion::V07),
        "/services" | "/v0.1/services" | "/v0.2/services" | "/v0.3/services"
        | "/v0.4/services" => EndpointKind::Services,
        "/v0.6/stats" => EndpointKind::Stats,
        "/info" => EndpointKind::Info,
        _ => return None,
    })
}

/// Shared state handed to every connection's request handler.
pub struct ReceiverState {
    pub rate_limiter: Arc<RateLimiter>,
    /// The obfuscation engine is stateful and not safe for concurrent use (it flips
    /// `literal_escapes` between calls); a single instance is serialized behind this lock.
    pub obfuscator: AsyncMutex<Obfuscator>,
    pub out_tx: Sender<pb::TracerPayload>,
    pub container_id_cache: Arc<ContainerIdCache>,
    pub info_blob: Arc<InfoBlob>,
    pub max_request_bytes: usize,
    pub dropped_status_code: u16,
    pub agent_version: &'static str,
    pub escape_count: AtomicU64,
    pub escape_tasks: AsyncMutex<JoinSet<()>>,
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response is always well-formed")
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("json response is always well-formed")
}

impl ReceiverState {
    fn with_standard_headers(&self, mut resp: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        resp.headers_mut().insert(
            DATADOG_AGENT_VERSION,
            HeaderValue::from_static(self.agent_version),
        );
        resp.headers_mut().insert(
            DATADOG_AGENT_STATE,
            HeaderValue::from_str(&self.info_blob.state_hash).unwrap(),
        );
        resp
    }

    /// Publishes a payload on the outbound channel, falling back to a spawned
    /// "escape task" if the non-blocking send would otherwise block.
    async fn publish(self: &Arc<Self>, payload: pb::TracerPayload) {
        match self.out_tx.try_send(payload) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(payload)) => {
                let count = self.escape_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % ESCAPE_WARN_EVERY == 0 {
                    warn!(count, "outbound channel full, spawning escape task");
                }
                let state = self.clone();
                self.escape_tasks.lock().await.spawn(async move {
                    let _ = state.out_tx.send(payload).await;
                });
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                debug!("outbound channel closed, dropping payload");
            }
        }
    }
}

fn header_str<'a>(req: &'a Request<Incoming>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Top-level request dispatcher for the receiver's hyper service.
pub async fn handle(
    state: Arc<ReceiverState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if header_str(&req, "sec-fetch-site") == Some("cross-site") {
        return Ok(empty_response(StatusCode::FORBIDDEN));
    }

    let path = req.uri().path().to_string();
    let Some(kind) = route(req.method(), &path) else {
        return Ok(empty_response(StatusCode::NOT_FOUND));
    };
    let peer_pid = req.extensions().get::<PeerPid>().map(|p| p.0);

    let response = match kind {
        EndpointKind::Info => handle_info(&state),
        EndpointKind::Services => empty_response(StatusCode::OK),
        EndpointKind::Stats => handle_stats(&state, req).await,
        EndpointKind::Traces(version) => handle_traces(&state, req, version, peer_pid).await,
    };
    Ok(state.with_standard_headers(response))
}

fn handle_info(state: &Arc<ReceiverState>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, state.info_blob.body.clone())
}

fn content_type_is_msgpack(req: &Request<Incoming>) -> bool {
    header_str(req, "content-type")
        .map(|ct| ct.contains("application/msgpack"))
        .unwrap_or(false)
}

async fn read_body(
    state: &Arc<ReceiverState>,
    req: Request<Incoming>,
) -> Result<Bytes, Response<Full<Bytes>>> {
    let limited = Limited::new(req.into_body(), state.max_request_bytes);
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(_) => Err(empty_response(StatusCode::PAYLOAD_TOO_LARGE)),
    }
}

async fn handle_stats(state: &Arc<ReceiverState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match read_body(state, req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match decode_stats(&body) {
        Ok(_payload) => empty_response(StatusCode::OK),
        Err(e) => {
            debug!(error = %e, "failed to decode stats payload");
            empty_response(StatusCode::BAD_REQUEST)
        }
    }
}

async fn handle_traces(
    state: &Arc<ReceiverState>,
    req: Request<Incoming>,
    version: TraceVersion,
    peer_pid: Option<i32>,
) -> Response<Full<Bytes>> {
    let is_msgpack = content_type_is_msgpack(&req);
    if is_msgpack && !allows_msgpack(version) {
        return empty_response(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    // v0.5/v0.7 are msgpack-only regardless of what the client declared.
    let encoding = if is_msgpack || matches!(version, TraceVersion::V05 | TraceVersion::V07) {
        Encoding::MsgPack
    } else {
        Encoding::Json
    };

    let trace_count: i64 = header_str(&req, X_DATADOG_TRACE_COUNT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let container_id_header = header_str(&req, "datadog-container-id").map(str::to_string);
    let lang = header_str(&req, "datadog-meta-lang").unwrap_or("").to_string();
    let lang_version = header_str(&req, "datadog-meta-lang-version")
        .unwrap_or("")
        .to_string();
    let tracer_version = header_str(&req, "datadog-meta-tracer-version")
        .unwrap_or("")
        .to_string();
    let client_rates_version = header_str(&req, "datadog-rates-payload-version").map(str::to_string);

    if !state.rate_limiter.permits(trace_count) {
        let _ = read_body(state, req).await;
        let status = StatusCode::from_u16(state.dropped_status_code).unwrap_or(StatusCode::OK);
        return rates_response(state, version, client_rates_version.as_deref(), status);
    }

    let body = match read_body(state, req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let traces = match decode_traces(version, encoding, &body) {
        Ok(t) => t,
        Err(e) => {
            debug!(error = %e, "failed to decode traces payload");
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };

    let mut chunks = if version == TraceVersion::V01 {
        group_flat_spans(traces.into_iter().flatten().collect())
    } else {
        chunks_from_traces(traces)
    };

    let container_id = resolve_container_id(state, container_id_header, peer_pid).await;
    {
        let obfuscator = state.obfuscator.lock().await;
        for chunk in &mut chunks {
            for span in &mut chunk.spans {
                obfuscator.obfuscate_span(span);
            }
        }
    }

    let header_tags = TracerHeaderTags {
        lang: &lang,
        lang_version: &lang_version,
        tracer_version: &tracer_version,
        container_id: container_id.as_deref().unwrap_or(""),
    };
    let payload = build_tracer_payload(chunks, &header_tags);
    state.publish(payload).await;

    rates_response(state, version, client_rates_version.as_deref(), StatusCode::OK)
}

async fn resolve_container_id(
    state: &Arc<ReceiverState>,
    header: Option<String>,
    peer_pid: Option<i32>,
) -> Option<String> {
    if header.is_some() {
        return header;
    }
    // TCP clients have no SO_PEERCRED; only a unix-socket connection carries a peer pid.
    state.container_id_cache.resolve(peer_pid?)
}

fn rates_response(
    state: &Arc<ReceiverState>,
    version: TraceVersion,
    client_rates_version: Option<&str>,
    status: StatusCode,
) -> Response<Full<Bytes>> {
    if !wants_rates_response(version) {
        return empty_response(status);
    }
    let server_version = "1";
    if client_rates_version == Some(server_version) {
        let mut resp = json_response(status, b"{}".to_vec());
        resp.headers_mut().insert(
            DATADOG_RATES_PAYLOAD_VERSION,
            HeaderValue::from_static(server_version),
        );
        return resp;
    }
    let rates: HashMap<(String, String), f64> = HashMap::new();
    let body = rates_by_service_body(&rates, state.rate_limiter.target_rate());
    let mut resp = json_response(status, body);
    resp.headers_mut().insert(
        DATADOG_RATES_PAYLOAD_VERSION,
        HeaderValue::from_static(server_version),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_every_documented_trace_path() {
        assert_eq!(
            route(&Method::POST, "/v0.4/traces"),
            Some(EndpointKind::Traces(TraceVersion::V04))
        );
        assert_eq!(
            route(&Method::POST, "/v0.1/spans"),
            Some(EndpointKind::Traces(TraceVersion::V01))
        );
        assert_eq!(route(&Method::POST, "/v0.6/stats"), Some(EndpointKind::Stats));
        assert_eq!(route(&Method::GET, "/info"), Some(EndpointKind::Info));
        assert_eq!(route(&Method::POST, "/info"), None);
        assert_eq!(route(&Method::POST, "/not-a-route"), None);
    }
}
