// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `/v0.6/stats`: decode the `ClientStatsPayload` envelope far enough to acknowledge it. The
//! bucket contents (`stats`) are kept as opaque JSON values; aggregating them is out of scope
//! here.

use crate::decode::error::DecodeError;
use datadog_trace_protobuf::pb;

pub fn decode_msgpack(data: &[u8]) -> Result<pb::ClientStatsPayload, DecodeError> {
    rmp_serde::from_slice(data).map_err(DecodeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_an_empty_stats_envelope() {
        let payload = pb::ClientStatsPayload {
            hostname: "host".to_string(),
            sequence: 3,
            ..Default::default()
        };
        let encoded = rmp_serde::to_vec_named(&payload).unwrap();
        let decoded = decode_msgpack(&encoded).unwrap();
        assert_eq!(decoded.hostname, "host");
        assert_eq!(decoded.sequence, 3);
        assert!(decoded.stats.is_empty());
    }

    #[test]
    fn rejects_malformed_stats_envelope() {
        assert!(decode_msgpack(&[0xff, 0xff]).is_err());
    }
}
