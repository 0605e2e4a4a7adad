// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! v0.7: the wire body is already a full `TracerPayload`, MessagePack-encoded. No chunking or
//! grouping is required on this path.

use crate::decode::error::DecodeError;
use datadog_trace_protobuf::pb;

pub fn decode_tracer_payload(data: &[u8]) -> Result<pb::TracerPayload, DecodeError> {
    rmp_serde::from_slice(data).map_err(DecodeError::from)
}
