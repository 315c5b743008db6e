//! Row encoding
//!
//! Each row is a column count followed by tagged values:
//! - `0` null
//! - `1` bool (1 byte)
//! - `2` int (i64 LE)
//! - `3` str (u32 LE length + UTF-8)
//! - `4` bytes (u32 LE length + raw)

use bytes::{Buf, BufMut};

use cadence_core::{CadenceError, CadenceResult, Value};

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_STR: u8 = 3;
pub const TAG_BYTES: u8 = 4;

/// Encoded size of a single value
pub fn encoded_value_len(value: &Value) -> usize {
    1 + match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 8,
        Value::Str(s) => 4 + s.len(),
        Value::Bytes(b) => 4 + b.len(),
    }
}

/// Encoded size of a row
pub fn encoded_row_len(row: &[Value]) -> usize {
    2 + row.iter().map(encoded_value_len).sum::<usize>()
}

fn put_len(buf: &mut impl BufMut, len: usize) -> CadenceResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CadenceError::InvalidWireFormat(format!("Value too long: {} bytes", len)))?;
    buf.put_u32_le(len);
    Ok(())
}

pub fn encode_value(buf: &mut impl BufMut, value: &Value) -> CadenceResult<()> {
    match value {
        Value::Null => buf.put_u8(TAG_NULL),
        Value::Bool(b) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(*b as u8);
        }
        Value::Int(v) => {
            buf.put_u8(TAG_INT);
            buf.put_i64_le(*v);
        }
        Value::Str(s) => {
            buf.put_u8(TAG_STR);
            put_len(buf, s.len())?;
            buf.put_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.put_u8(TAG_BYTES);
            put_len(buf, b.len())?;
            buf.put_slice(b);
        }
    }
    Ok(())
}

fn need(buf: &impl Buf, n: usize) -> CadenceResult<()> {
    if buf.remaining() < n {
        return Err(CadenceError::BufferTooShort {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

pub fn decode_value(buf: &mut impl Buf) -> CadenceResult<Value> {
    need(buf, 1)?;
    let tag = buf.get_u8();
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => {
            need(buf, 1)?;
            match buf.get_u8() {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(CadenceError::InvalidWireFormat(format!(
                    "Invalid bool byte {}",
                    other
                ))),
            }
        }
        TAG_INT => {
            need(buf, 8)?;
            Ok(Value::Int(buf.get_i64_le()))
        }
        TAG_STR => {
            let raw = take_len_prefixed(buf)?;
            String::from_utf8(raw)
                .map(Value::Str)
                .map_err(|_| CadenceError::InvalidWireFormat("String value is not UTF-8".into()))
        }
        TAG_BYTES => Ok(Value::Bytes(take_len_prefixed(buf)?)),
        other => Err(CadenceError::UnknownValueTag(other)),
    }
}

fn take_len_prefixed(buf: &mut impl Buf) -> CadenceResult<Vec<u8>> {
    need(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(raw)
}

pub fn encode_row(buf: &mut impl BufMut, row: &[Value]) -> CadenceResult<()> {
    let cols = u16::try_from(row.len())
        .map_err(|_| CadenceError::InvalidWireFormat(format!("Too many columns: {}", row.len())))?;
    buf.put_u16_le(cols);
    for value in row {
        encode_value(buf, value)?;
    }
    Ok(())
}

pub fn decode_row(buf: &mut impl Buf) -> CadenceResult<Vec<Value>> {
    need(buf, 2)?;
    let cols = buf.get_u16_le() as usize;
    let mut row = Vec::with_capacity(cols.min(buf.remaining()));
    for _ in 0..cols {
        row.push(decode_value(buf)?);
    }
    Ok(row)
}
