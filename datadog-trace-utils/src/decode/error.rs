// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Failure modes surfaced by every payload-version decoder in this module. The receiver maps
/// these onto HTTP status codes: `InvalidFormat`/`InvalidType`/`Utf8Error` to 415, everything
/// else to 400.
#[derive(Debug)]
pub enum DecodeError {
    InvalidFormat(String),
    InvalidType(String),
    InvalidConversion(String),
    Utf8Error(String),
    IOError,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidFormat(msg) => write!(f, "invalid format: {msg}"),
            DecodeError::InvalidType(msg) => write!(f, "invalid type: {msg}"),
            DecodeError::InvalidConversion(msg) => write!(f, "invalid conversion: {msg}"),
            DecodeError::Utf8Error(msg) => write!(f, "invalid utf8: {msg}"),
            DecodeError::IOError => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(_: std::io::Error) -> Self {
        DecodeError::IOError
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::InvalidFormat(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DecodeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DecodeError::InvalidFormat(e.to_string())
    }
}
