//! Wire-format parsing shared by the transport and product layers.
//!
//! All multi-byte fields on the downlink are big-endian. The helpers here bounds
//! check every read and report shortfalls as [`DownlinkError::Parse`] so callers
//! can propagate with `?` instead of indexing.

pub mod crc;
pub mod headers;
pub mod time;

use crate::{DownlinkError, Result};

fn take<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    data.get(offset..offset.saturating_add(len)).ok_or_else(|| DownlinkError::Parse {
        context: "Integer parsing".to_string(),
        details: format!(
            "Insufficient data for {} at offset {} (need {} bytes, have {})",
            what,
            offset,
            len,
            data.len().saturating_sub(offset)
        ),
    })
}

pub(crate) fn parse_u8(data: &[u8], offset: usize) -> Result<u8> {
    Ok(take(data, offset, 1, "u8")?[0])
}

pub(crate) fn parse_u16_be(data: &[u8], offset: usize) -> Result<u16> {
    let b = take(data, offset, 2, "u16")?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn parse_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    let b = take(data, offset, 4, "u32")?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn parse_i32_be(data: &[u8], offset: usize) -> Result<i32> {
    parse_u32_be(data, offset).map(|v| v as i32)
}

pub(crate) fn parse_u64_be(data: &[u8], offset: usize) -> Result<u64> {
    let b = take(data, offset, 8, "u64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(u64::from_be_bytes(raw))
}

pub(crate) fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let b = take(data, offset, 4, "u32")?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Fixed-width ASCII field with trailing spaces and NULs removed.
pub(crate) fn parse_ascii(data: &[u8], offset: usize, len: usize) -> Result<String> {
    let b = take(data, offset, len, "text")?;
    Ok(String::from_utf8_lossy(b).trim_end_matches([' ', '\0']).to_string())
}
