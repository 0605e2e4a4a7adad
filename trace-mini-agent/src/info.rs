// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Endpoints advertised on `/info`. `hidden` entries are registered on the
/// router but left out of the advertised list (proxy pass-throughs, etc).
pub struct InfoEndpoint {
    pub path: &'static str,
    pub hidden: bool,
}

#[derive(Serialize)]
struct InfoPayload<'a> {
    version: &'a str,
    endpoints: Vec<&'a str>,
    client_drop_p0s: bool,
    span_meta_structs: bool,
}

/// Computed once at construction: the JSON config snapshot served at `/info`
/// and its SHA-256 hash, echoed on every response as `Datadog-Agent-State`.
pub struct InfoBlob {
    pub body: Vec<u8>,
    pub state_hash: String,
}

impl InfoBlob {
    pub fn new(version: &str, endpoints: &[InfoEndpoint]) -> Self {
        let payload = InfoPayload {
            version,
            endpoints: endpoints
                .iter()
                .filter(|e| !e.hidden)
                .map(|e| e.path)
                .collect(),
            client_drop_p0s: true,
            span_meta_structs: false,
        };
        let body = serde_json::to_vec(&payload).expect("info payload is always serializable");
        let mut hasher = Sha256::new();
        hasher.update(&body);
        let state_hash = format!("{:x}", hasher.finalize());
        InfoBlob { body, state_hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_endpoints_are_excluded_from_the_body_but_not_the_hash_inputs() {
        let endpoints = vec![
            InfoEndpoint {
                path: "/v0.4/traces",
                hidden: false,
            },
            InfoEndpoint {
                path: "/proxy/debugger/v1/input",
                hidden: true,
            },
        ];
        let blob = InfoBlob::new("1.2.3", &endpoints);
        let text = String::from_utf8(blob.body).unwrap();
        assert!(text.contains("/v0.4/traces"));
        assert!(!text.contains("/proxy/debugger/v1/input"));
    }

    #[test]
    fn same_inputs_produce_a_stable_hash() {
        let endpoints = vec![InfoEndpoint {
            path: "/info",
            hidden: false,
        }];
        let a = InfoBlob::new("1.0.0", &endpoints);
        let b = InfoBlob::new("1.0.0", &endpoints);
        assert_eq!(a.state_hash, b.state_hash);
        assert_eq!(a.state_hash.len(), 64);
    }

    #[test]
    fn different_versions_produce_different_hashes() {
        let endpoints = vec![InfoEndpoint {
            path: "/info",
            hidden: false,
        }];
        let a = InfoBlob::new("1.0.0", &endpoints);
        let b = InfoBlob::new("1.0.1", &endpoints);
        assert_ne!(a.state_hash, b.state_hash);
    }
}
