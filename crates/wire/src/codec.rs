//! Little-endian primitives shared by every payload encoder.
//!
//! Variable-length fields are LEB128 length prefixes followed by raw bytes.
//! Readers take `&mut &[u8]` cursors and fail with [`WireError::UnexpectedEof`]
//! instead of panicking on short input.

use bytes::{Buf, BufMut};

use crate::error::WireError;

pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

pub fn get_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = get_u8(buf)?;
        if shift == 63 && byte > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(WireError::VarintOverflow);
        }
    }
}

pub fn varint_len(value: u64) -> usize {
    // One byte per 7 bits, at least one byte.
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn put_varbytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(out, bytes.len() as u64);
    out.put_slice(bytes);
}

pub fn get_varbytes(buf: &mut &[u8]) -> Result<Vec<u8>, WireError> {
    let len = get_varint(buf)? as usize;
    get_vec(buf, len)
}

pub fn varbytes_len(bytes: &[u8]) -> usize {
    varint_len(bytes.len() as u64) + bytes.len()
}

pub fn put_varstring(out: &mut Vec<u8>, value: &str) {
    put_varbytes(out, value.as_bytes());
}

pub fn get_varstring(buf: &mut &[u8]) -> Result<String, WireError> {
    String::from_utf8(get_varbytes(buf)?).map_err(|_| WireError::InvalidUtf8)
}

pub fn varstring_len(value: &str) -> usize {
    varbytes_len(value.as_bytes())
}

pub fn put_opt_u32(out: &mut Vec<u8>, value: Option<u32>) {
    match value {
        Some(v) => {
            out.put_u8(1);
            out.put_u32_le(v);
        }
        None => out.put_u8(0),
    }
}

pub fn get_opt_u32(buf: &mut &[u8]) -> Result<Option<u32>, WireError> {
    match get_u8(buf)? {
        0 => Ok(None),
        _ => Ok(Some(get_u32(buf)?)),
    }
}

pub fn opt_u32_len(value: Option<u32>) -> usize {
    1 + if value.is_some() { 4 } else { 0 }
}

pub fn put_opt_varstring(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            out.put_u8(1);
            put_varstring(out, v);
        }
        None => out.put_u8(0),
    }
}

pub fn get_opt_varstring(buf: &mut &[u8]) -> Result<Option<String>, WireError> {
    match get_u8(buf)? {
        0 => Ok(None),
        _ => Ok(Some(get_varstring(buf)?)),
    }
}

pub fn opt_varstring_len(value: Option<&str>) -> usize {
    1 + value.map(varstring_len).unwrap_or(0)
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

pub fn get_bool(buf: &mut &[u8]) -> Result<bool, WireError> {
    Ok(get_u8(buf)? != 0)
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_u64_le())
}

pub fn get_i64(buf: &mut &[u8]) -> Result<i64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_i64_le())
}

pub fn get_f64(buf: &mut &[u8]) -> Result<f64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_f64_le())
}

pub fn get_vec(buf: &mut &[u8], len: usize) -> Result<Vec<u8>, WireError> {
    if buf.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn get_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], WireError> {
    if buf.remaining() < N {
        return Err(WireError::UnexpectedEof);
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Fails if a payload decoder left bytes behind, which would mean the two
/// sides disagree about a variant's layout.
pub fn expect_end(buf: &[u8]) -> Result<(), WireError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(WireError::TrailingBytes(buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut out = Vec::new();
            put_varint(&mut out, value);
            assert_eq!(out.len(), varint_len(value), "length for {value}");
            let mut cursor = out.as_slice();
            assert_eq!(get_varint(&mut cursor), Ok(value));
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn varint_rejects_overflow() {
        // Eleven continuation bytes encode more than 64 bits.
        let bytes = [0xffu8; 10];
        let mut cursor = &bytes[..];
        assert_eq!(get_varint(&mut cursor), Err(WireError::VarintOverflow));
    }

    #[test]
    fn varbytes_reports_truncation() {
        let mut out = Vec::new();
        put_varbytes(&mut out, b"hello");
        let mut cursor = &out[..out.len() - 1];
        assert_eq!(get_varbytes(&mut cursor), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn varstring_rejects_bad_utf8() {
        let mut out = Vec::new();
        put_varbytes(&mut out, &[0xff, 0xfe]);
        let mut cursor = out.as_slice();
        assert_eq!(get_varstring(&mut cursor), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        assert_eq!(expect_end(&[]), Ok(()));
        assert_eq!(expect_end(&[1, 2]), Err(WireError::TrailingBytes(2)));
    }
}
