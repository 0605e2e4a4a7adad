// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The OTLP/gRPC sibling server: translates `ExportTraceServiceRequest`s and publishes the
//! resulting payloads on the same outbound channel the HTTP receiver feeds.

use datadog_trace_protobuf::pb;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::net::SocketAddr;
use tokio::sync::mpsc::Sender;
use tonic::{Request, Response, Status};
use tracing::warn;

struct TraceExportService {
    out_tx: Sender<pb::TracerPayload>,
}

#[tonic::async_trait]
impl TraceService for TraceExportService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let payloads = trace_otlp::translate_export_request(request.get_ref());
        for payload in payloads {
            if let Err(e) = self.out_tx.try_send(payload) {
                warn!(error = %e, "OTLP outbound channel full, dropping payload");
            }
        }
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

/// Runs the OTLP gRPC server until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    out_tx: Sender<pb::TracerPayload>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let service = TraceExportService { out_tx };
    tonic::transport::Server::builder()
        .add_service(TraceServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;
    Ok(())
}
