//! Packed integer and key encodings shared by the on-disk formats.
//!
//! Unsigned integers are packed as variable-length little-endian
//! base-128: seven payload bits per byte plus a continuation bit. The
//! same encoding is used in table entries, base files, changeset headers
//! and replication message frames.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, ShaleError};

/// Append a packed unsigned integer to `buf`.
pub fn pack_uint(buf: &mut Vec<u8>, value: u64) {
    let mut val = value;
    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if val == 0 {
            break;
        }
    }
}

/// Decode a packed unsigned integer from the front of `bytes`, advancing
/// the slice past it.
pub fn unpack_uint(bytes: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut consumed = 0;

    for &byte in bytes.iter() {
        consumed += 1;
        if shift >= 64 {
            return Err(ShaleError::corrupt("packed integer overflows u64"));
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            *bytes = &bytes[consumed..];
            return Ok(result);
        }
        shift += 7;
    }

    Err(ShaleError::corrupt("truncated packed integer"))
}

/// Write a packed unsigned integer to a writer.
pub fn write_uint<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<()> {
    let mut buf = Vec::with_capacity(10);
    pack_uint(&mut buf, value);
    writer.write_all(&buf)?;
    Ok(())
}

/// Read a packed unsigned integer from a reader.
pub fn read_uint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;
        if shift >= 64 {
            return Err(ShaleError::corrupt("packed integer overflows u64"));
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Append a length-prefixed byte string to `buf`.
pub fn pack_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    pack_uint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Decode a length-prefixed byte string from the front of `bytes`,
/// advancing the slice past it.
pub fn unpack_bytes(bytes: &mut &[u8]) -> Result<Vec<u8>> {
    let len = unpack_uint(bytes)? as usize;
    if bytes.len() < len {
        return Err(ShaleError::corrupt("truncated packed byte string"));
    }
    let (head, tail) = bytes.split_at(len);
    let out = head.to_vec();
    *bytes = tail;
    Ok(out)
}

/// Escape a byte string so that the result contains no `00` byte except
/// as part of the pair `00 FF`.
///
/// The escaping is order- and prefix-preserving: for any prefix `p` of
/// `s`, `escape(p)` is a prefix of `escape(s)`. This keeps internal table
/// keys (which start with a `00` byte followed by anything other than
/// `FF`) disjoint from escaped user keys, and lets prefix scans over
/// escaped keys work on the raw bytes.
pub fn escape_preserving_sort(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == 0 {
            out.push(0);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverse [`escape_preserving_sort`].
pub fn unescape_preserving_sort(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b == 0 {
            match iter.next() {
                Some(0xff) => out.push(0),
                _ => return Err(ShaleError::corrupt("invalid escape sequence in key")),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}
