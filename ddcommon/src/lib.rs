// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod connector;
pub mod container_id;
pub mod tag;
pub mod worker;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::ops::Deref;
use std::str::FromStr;

/// A remote or local destination for outbound payloads (traces, metrics, ...).
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(serialize_with = "serialize_uri", deserialize_with = "deserialize_uri")]
    pub url: http::Uri,
    pub api_key: Option<Cow<'static, str>>,
    pub timeout_ms: u64,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            url: http::Uri::default(),
            api_key: None,
            timeout_ms: Self::DEFAULT_TIMEOUT,
        }
    }
}

impl Endpoint {
    pub const DEFAULT_TIMEOUT: u64 = 3_000;

    /// Parses a url, accepting the bare `unix://<path>` form used for
    /// dogstatsd/uds sockets in addition to ordinary http(s) urls.
    pub fn from_slice(url: &str) -> Endpoint {
        let url = if let Some(path) = url.strip_prefix("unix://") {
            connector::uds::socket_path_to_uri(std::path::Path::new(path))
                .unwrap_or_else(|_| http::Uri::from_static("unix://invalid"))
        } else {
            http::Uri::from_str(url).unwrap_or_else(|_| http::Uri::from_static("http://invalid"))
        };
        Endpoint {
            url,
            ..Default::default()
        }
    }

    pub fn from_url(url: http::Uri) -> Endpoint {
        Endpoint {
            url,
            ..Default::default()
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize)]
struct SerializedUri<'a> {
    scheme: Option<Cow<'a, str>>,
    authority: Option<Cow<'a, str>>,
    path_and_query: Option<Cow<'a, str>>,
}

fn serialize_uri<S>(uri: &http::Uri, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let parts = uri.clone().into_parts();
    let uri = SerializedUri {
        scheme: parts.scheme.as_ref().map(|s| Cow::Borrowed(s.as_str())),
        authority: parts.authority.as_ref().map(|s| Cow::Borrowed(s.as_str())),
        path_and_query: parts
            .path_and_query
            .as_ref()
            .map(|s| Cow::Borrowed(s.as_str())),
    };
    uri.serialize(serializer)
}

fn deserialize_uri<'de, D>(deserializer: D) -> Result<http::Uri, D::Error>
where
    D: Deserializer<'de>,
{
    let uri = SerializedUri::deserialize(deserializer)?;
    let mut builder = http::Uri::builder();
    if let Some(v) = uri.authority {
        builder = builder.authority(v.deref().to_string());
    }
    if let Some(v) = uri.scheme {
        builder = builder.scheme(v.deref().to_string());
    }
    if let Some(v) = uri.path_and_query {
        builder = builder.path_and_query(v.deref().to_string());
    }
    builder.build().map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_parses_http_urls() {
        let e = Endpoint::from_slice("http://localhost:8126");
        assert_eq!(e.url.scheme_str(), Some("http"));
        assert_eq!(e.url.host(), Some("localhost"));
    }

    #[test]
    fn from_slice_parses_unix_socket_paths() {
        let e = Endpoint::from_slice("unix:///var/run/datadog/dsd.socket");
        assert_eq!(e.url.scheme_str(), Some("unix"));
    }

    #[test]
    fn default_timeout_is_three_seconds() {
        assert_eq!(Endpoint::default().timeout_ms, 3_000);
    }
}
