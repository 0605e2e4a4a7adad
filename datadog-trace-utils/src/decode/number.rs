// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::decode::error::DecodeError;
use rmp::decode;
use rmp::Marker;

/// A msgpack-encoded number of unknown signedness/width, read off the wire and narrowed to the
/// type the caller actually needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

fn bounded_int_conversion<T, E: std::fmt::Display>(
    result: Result<T, E>,
) -> Result<T, DecodeError> {
    result.map_err(|e| DecodeError::InvalidConversion(e.to_string()))
}

impl TryFrom<Number> for u64 {
    type Error = DecodeError;
    fn try_from(n: Number) -> Result<Self, Self::Error> {
        match n {
            Number::Unsigned(v) => Ok(v),
            Number::Signed(v) => bounded_int_conversion(u64::try_from(v)),
            Number::Float(v) => Ok(v as u64),
        }
    }
}

impl TryFrom<Number> for i64 {
    type Error = DecodeError;
    fn try_from(n: Number) -> Result<Self, Self::Error> {
        match n {
            Number::Unsigned(v) => bounded_int_conversion(i64::try_from(v)),
            Number::Signed(v) => Ok(v),
            Number::Float(v) => Ok(v as i64),
        }
    }
}

impl TryFrom<Number> for i32 {
    type Error = DecodeError;
    fn try_from(n: Number) -> Result<Self, Self::Error> {
        let as_i64: i64 = n.try_into()?;
        bounded_int_conversion(i32::try_from(as_i64))
    }
}

impl TryFrom<Number> for f64 {
    type Error = DecodeError;
    fn try_from(n: Number) -> Result<Self, Self::Error> {
        match n {
            Number::Unsigned(v) => Ok(v as f64),
            Number::Signed(v) => Ok(v as f64),
            Number::Float(v) => Ok(v),
        }
    }
}

/// Reads any msgpack integer or float marker into a [`Number`]. A null marker is only accepted
/// when `allow_null` is set, in which case it decodes to `Number::Unsigned(0)`.
pub fn read_number(buf: &mut &[u8], allow_null: bool) -> Result<Number, DecodeError> {
    let marker =
        decode::read_marker(buf).map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;
    match marker {
        Marker::Null if allow_null => Ok(Number::Unsigned(0)),
        Marker::FixPos(v) => Ok(Number::Unsigned(v as u64)),
        Marker::FixNeg(v) => Ok(Number::Signed(v as i64)),
        Marker::U8 => Ok(Number::Unsigned(read_data_u8(buf)? as u64)),
        Marker::U16 => Ok(Number::Unsigned(read_data_u16(buf)? as u64)),
        Marker::U32 => Ok(Number::Unsigned(read_data_u32(buf)? as u64)),
        Marker::U64 => Ok(Number::Unsigned(read_data_u64(buf)?)),
        Marker::I8 => Ok(Number::Signed(read_data_i8(buf)? as i64)),
        Marker::I16 => Ok(Number::Signed(read_data_i16(buf)? as i64)),
        Marker::I32 => Ok(Number::Signed(read_data_i32(buf)? as i64)),
        Marker::I64 => Ok(Number::Signed(read_data_i64(buf)?)),
        Marker::F32 => Ok(Number::Float(read_data_f32(buf)? as f64)),
        Marker::F64 => Ok(Number::Float(read_data_f64(buf)?)),
        other => Err(DecodeError::InvalidType(format!(
            "expected a number, found marker {other:?}"
        ))),
    }
}

pub fn read_number_slice<T>(buf: &mut &[u8]) -> Result<T, DecodeError>
where
    T: TryFrom<Number, Error = DecodeError>,
{
    read_number(buf, false)?.try_into()
}

pub fn read_nullable_number_slice<T>(buf: &mut &[u8]) -> Result<T, DecodeError>
where
    T: TryFrom<Number, Error = DecodeError>,
{
    read_number(buf, true)?.try_into()
}

macro_rules! read_data {
    ($name:ident, $ty:ty, $reader:path) => {
        fn $name(buf: &mut &[u8]) -> Result<$ty, DecodeError> {
            $reader(buf).map_err(|e| DecodeError::InvalidConversion(e.to_string()))
        }
    };
}

read_data!(read_data_u8, u8, decode::read_data_u8);
read_data!(read_data_u16, u16, decode::read_data_u16);
read_data!(read_data_u32, u32, decode::read_data_u32);
read_data!(read_data_u64, u64, decode::read_data_u64);
read_data!(read_data_i8, i8, decode::read_data_i8);
read_data!(read_data_i16, i16, decode::read_data_i16);
read_data!(read_data_i32, i32, decode::read_data_i32);
read_data!(read_data_i64, i64, decode::read_data_i64);
read_data!(read_data_f32, f32, decode::read_data_f32);
read_data!(read_data_f64, f64, decode::read_data_f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_u64(v: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_uint(&mut buf, v).unwrap();
        buf
    }

    fn encode_i64(v: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_sint(&mut buf, v).unwrap();
        buf
    }

    fn encode_f64(v: f64) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_f64(&mut buf, v).unwrap();
        buf
    }

    #[test]
    fn reads_unsigned_into_u64() {
        let data = encode_u64(900_000);
        let mut slice = data.as_slice();
        let n: u64 = read_number_slice(&mut slice).unwrap();
        assert_eq!(n, 900_000);
    }

    #[test]
    fn reads_negative_into_i64() {
        let data = encode_i64(-42);
        let mut slice = data.as_slice();
        let n: i64 = read_number_slice(&mut slice).unwrap();
        assert_eq!(n, -42);
    }

    #[test]
    fn rejects_negative_into_u64() {
        let data = encode_i64(-1);
        let mut slice = data.as_slice();
        let result: Result<u64, DecodeError> = read_number_slice(&mut slice);
        assert!(result.is_err());
    }

    #[test]
    fn reads_float_into_f64() {
        let data = encode_f64(3.5);
        let mut slice = data.as_slice();
        let n: f64 = read_number_slice(&mut slice).unwrap();
        assert_eq!(n, 3.5);
    }

    #[test]
    fn nullable_number_defaults_to_zero() {
        let data = vec![0xc0]; // msgpack nil
        let mut slice = data.as_slice();
        let n: u64 = read_nullable_number_slice(&mut slice).unwrap();
        assert_eq!(n, 0);
    }
}
