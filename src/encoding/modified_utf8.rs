//! # Modified UTF-8 Text Encoding
//!
//! Strings stored in virtual files and sent as method names use the
//! length-prefixed "modified UTF-8" format. The text is encoded one UTF-16
//! code unit at a time:
//!
//! | Code unit          | Bytes | Format                                   |
//! |--------------------|-------|------------------------------------------|
//! | `0x0000`           | 2     | `[0xC0, 0x80]` (overlong, never a NUL)   |
//! | `0x0001 - 0x007F`  | 1     | `[unit]`                                 |
//! | `0x0080 - 0x07FF`  | 2     | `[0xC0 | u>>6, 0x80 | u&0x3F]`            |
//! | `0x0800 - 0xFFFF`  | 3     | `[0xE0 | u>>12, 0x80 | (u>>6)&0x3F, ...]`|
//!
//! Characters outside the BMP are written as two surrogate units of three
//! bytes each. The encoded byte length is written first as a big-endian u16,
//! so at most 65535 encoded bytes fit in one string.
//!
//! ## Decoding
//!
//! A lead byte with the high bit clear is a single unit, a lead byte whose
//! top nibble is `0xE` starts a three byte unit, and every other lead byte
//! starts a two byte unit. Decoded units are reassembled with
//! `String::from_utf16`, so unpaired surrogates are rejected.
//!
//! ## Thread Safety
//!
//! All functions are pure and allocate only their output.

use eyre::{bail, ensure, Result};

use crate::config::MAX_UTF_LENGTH;

/// Number of bytes `text` occupies once encoded, excluding the prefix.
pub fn encoded_len(text: &str) -> usize {
    text.encode_utf16().map(unit_len).sum()
}

#[inline]
fn unit_len(unit: u16) -> usize {
    match unit {
        0 => 2,
        0x01..=0x7F => 1,
        0x80..=0x7FF => 2,
        _ => 3,
    }
}

/// Appends the u16 length prefix and the encoded text to `out`.
pub fn encode(text: &str, out: &mut Vec<u8>) -> Result<()> {
    let byte_len = encoded_len(text);
    ensure!(
        byte_len <= MAX_UTF_LENGTH,
        "string too long: {} encoded bytes exceeds {}",
        byte_len,
        MAX_UTF_LENGTH
    );

    out.reserve(byte_len + 2);
    out.extend_from_slice(&(byte_len as u16).to_be_bytes());
    for unit in text.encode_utf16() {
        match unit {
            0 => out.extend_from_slice(&[0xC0, 0x80]),
            0x01..=0x7F => out.push(unit as u8),
            0x80..=0x7FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Ok(())
}

/// Encodes `text` into a fresh buffer including the length prefix.
pub fn to_bytes(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode(text, &mut out)?;
    Ok(out)
}

/// Decodes encoded text WITHOUT the length prefix.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let first = bytes[i] as u16;
        if first & 0x80 == 0 {
            units.push(first);
            i += 1;
        } else if first >> 4 == 0xE {
            ensure!(i + 2 < bytes.len(), "truncated 3-byte sequence at offset {}", i);
            let second = bytes[i + 1] as u16;
            let third = bytes[i + 2] as u16;
            units.push(((first & 0x0F) << 12) | ((second & 0x3F) << 6) | (third & 0x3F));
            i += 3;
        } else {
            ensure!(i + 1 < bytes.len(), "truncated 2-byte sequence at offset {}", i);
            let second = bytes[i + 1] as u16;
            units.push(((first & 0x1F) << 6) | (second & 0x3F));
            i += 2;
        }
    }

    match String::from_utf16(&units) {
        Ok(text) => Ok(text),
        Err(e) => bail!("invalid modified UTF-8 text: {}", e),
    }
}

/// Decodes a prefixed string from the front of `bytes`, returning the text
/// and the number of bytes consumed.
pub fn decode_prefixed(bytes: &[u8]) -> Result<(String, usize)> {
    ensure!(bytes.len() >= 2, "buffer too small for string length prefix");
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    ensure!(
        bytes.len() >= 2 + len,
        "truncated string: need {} bytes, have {}",
        len,
        bytes.len() - 2
    );
    let text = decode(&bytes[2..2 + len])?;
    Ok((text, 2 + len))
}
