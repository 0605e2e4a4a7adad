// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Builds a `unix://<hex-encoded-path>` uri, hex-encoding the socket path
/// into the authority to dodge special characters there.
pub fn socket_path_to_uri(path: &Path) -> Result<http::Uri, http::Error> {
    let encoded = hex::encode(path.as_os_str().as_bytes());
    http::Uri::builder()
        .scheme("unix")
        .authority(encoded)
        .path_and_query("")
        .build()
}

pub fn socket_path_from_uri(uri: &http::Uri) -> anyhow::Result<PathBuf> {
    if uri.scheme_str() != Some("unix") {
        return Err(super::Error::InvalidUrl.into());
    }
    let path = hex::decode(
        uri.authority()
            .ok_or(super::Error::InvalidUrl)?
            .as_str(),
    )
    .map_err(|_| super::Error::InvalidUrl)?;
    Ok(PathBuf::from(OsString::from_vec(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_absolute_path() {
        let expected = Path::new("/path/to/a/socket.sock");
        let uri = socket_path_to_uri(expected).unwrap();
        assert_eq!(uri.scheme_str(), Some("unix"));
        let actual = socket_path_from_uri(&uri).unwrap();
        assert_eq!(actual.as_path(), expected);
    }

    #[test]
    fn round_trips_a_relative_path() {
        let expected = Path::new("relative/path/socket.sock");
        let uri = socket_path_to_uri(expected).unwrap();
        let actual = socket_path_from_uri(&uri).unwrap();
        assert_eq!(actual.as_path(), expected);
    }

    #[test]
    fn rejects_non_unix_scheme() {
        let uri = http::Uri::from_static("http://localhost:8125");
        assert!(socket_path_from_uri(&uri).is_err());
    }
}
