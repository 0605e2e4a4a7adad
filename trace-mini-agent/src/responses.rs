// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_trace_utils::decode::TraceVersion;
use std::collections::HashMap;

/// `false` for v0.1–v0.3: those tracers expect a plain `OK`, not JSON rates.
pub fn wants_rates_response(version: TraceVersion) -> bool {
    !matches!(
        version,
        TraceVersion::V01 | TraceVersion::V02 | TraceVersion::V03
    )
}

/// `true` only for v0.3+: versions below that never send msgpack.
pub fn allows_msgpack(version: TraceVersion) -> bool {
    !matches!(version, TraceVersion::V01 | TraceVersion::V02)
}

/// Builds the `service:<svc>,env:<env>` rates-by-service body, including the
/// `service:,env:` fallback key every tracer is guaranteed to understand.
pub fn rates_by_service_body(rates: &HashMap<(String, String), f64>, fallback_rate: f64) -> Vec<u8> {
    let mut body: HashMap<String, f64> = HashMap::with_capacity(rates.len() + 1);
    body.insert("service:,env:".to_string(), fallback_rate);
    for ((service, env), rate) in rates {
        body.insert(format!("service:{service},env:{env}"), *rate);
    }
    serde_json::to_vec(&body).expect("rates map is always serializable")
}

/// Status codes the receiver may respond with, named the way the wire
/// protocol's error taxonomy names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Forbidden,
    RequestTimeout,
    PayloadTooLarge,
    UnsupportedMediaType,
    TooManyRequests,
    BadRequest,
    InternalError,
}

impl ResponseStatus {
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseStatus::Ok => 200,
            ResponseStatus::Forbidden => 403,
            ResponseStatus::RequestTimeout => 408,
            ResponseStatus::PayloadTooLarge => 413,
            ResponseStatus::UnsupportedMediaType => 415,
            ResponseStatus::TooManyRequests => 429,
            ResponseStatus::BadRequest => 400,
            ResponseStatus::InternalError => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v01_through_v03_do_not_want_rates() {
        assert!(!wants_rates_response(TraceVersion::V01));
        assert!(!wants_rates_response(TraceVersion::V02));
        assert!(!wants_rates_response(TraceVersion::V03));
        assert!(wants_rates_response(TraceVersion::V04));
        assert!(wants_rates_response(TraceVersion::V07));
    }

    #[test]
    fn only_v01_and_v02_forbid_msgpack() {
        assert!(!allows_msgpack(TraceVersion::V01));
        assert!(!allows_msgpack(TraceVersion::V02));
        assert!(allows_msgpack(TraceVersion::V03));
    }

    #[test]
    fn rates_body_includes_fallback_key() {
        let mut rates = HashMap::new();
        rates.insert(("web".to_string(), "prod".to_string()), 0.5);
        let body = rates_by_service_body(&rates, 1.0);
        let parsed: HashMap<String, f64> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.get("service:,env:"), Some(&1.0));
        assert_eq!(parsed.get("service:web,env:prod"), Some(&0.5));
    }

    #[test]
    fn status_codes_match_the_wire_taxonomy() {
        assert_eq!(ResponseStatus::Ok.as_u16(), 200);
        assert_eq!(ResponseStatus::Forbidden.as_u16(), 403);
        assert_eq!(ResponseStatus::TooManyRequests.as_u16(), 429);
        assert_eq!(ResponseStatus::PayloadTooLarge.as_u16(), 413);
    }
}
