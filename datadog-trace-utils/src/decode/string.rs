// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::decode::error::DecodeError;
use rmp::decode;
use rmp::decode::DecodeStringError;

const NULL_MARKER: u8 = 0xc0;

/// Reads a msgpack string, advancing `buf` past it.
#[inline]
pub fn read_string_ref<'a>(buf: &mut &'a [u8]) -> Result<&'a str, DecodeError> {
    decode::read_str_from_slice(buf)
        .map(|(s, rest)| {
            *buf = rest;
            s
        })
        .map_err(|e| match e {
            DecodeStringError::InvalidMarkerRead(e) => DecodeError::InvalidFormat(e.to_string()),
            DecodeStringError::InvalidDataRead(e) => DecodeError::InvalidConversion(e.to_string()),
            DecodeStringError::TypeMismatch(marker) => {
                DecodeError::InvalidType(format!("expected a string, found marker {marker:?}"))
            }
            DecodeStringError::InvalidUtf8(_, e) => DecodeError::Utf8Error(e.to_string()),
            _ => DecodeError::IOError,
        })
}

/// Peeks for a null marker; consumes it and returns `true` if found, otherwise leaves `buf`
/// untouched so the caller can decode normally.
#[inline]
pub fn handle_null_marker(buf: &mut &[u8]) -> bool {
    if buf.first() == Some(&NULL_MARKER) {
        *buf = &buf[1..];
        true
    } else {
        false
    }
}

#[inline]
pub fn read_nullable_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, DecodeError> {
    if handle_null_marker(buf) {
        Ok("")
    } else {
        read_string_ref(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_str(s: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_str(&mut buf, s).unwrap();
        buf
    }

    #[test]
    fn reads_a_plain_string() {
        let data = encode_str("hello");
        let mut slice = data.as_slice();
        assert_eq!(read_string_ref(&mut slice).unwrap(), "hello");
        assert!(slice.is_empty());
    }

    #[test]
    fn nullable_string_defaults_to_empty() {
        let data = vec![0xc0];
        let mut slice = data.as_slice();
        assert_eq!(read_nullable_string(&mut slice).unwrap(), "");
    }

    #[test]
    fn rejects_non_string_marker() {
        let mut buf = Vec::new();
        rmp::encode::write_uint(&mut buf, 5).unwrap();
        let mut slice = buf.as_slice();
        assert!(read_string_ref(&mut slice).is_err());
    }
}
