//! Utility functions for binary parsing, string conversion and timestamps.

use crate::error::{RegistryError, Result};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use encoding_rs::UTF_16LE;

/// Offset where hive bins start (after base block).
pub const HBIN_START_OFFSET: u32 = 0x1000;

/// 100-nanosecond intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Decodes a "compressed" (single byte per character) name.
///
/// Copies bytes up to the first embedded zero. Bytes above 0x7F are taken
/// as Latin-1, which is how Windows widens compressed names.
pub fn read_ascii_string(data: &[u8]) -> String {
    data.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Decodes UTF-16LE bytes up to the first zero code unit.
///
/// Well-formed input goes through `encoding_rs`. Input containing an
/// unpaired surrogate is walked unit by unit and the stray surrogate is
/// dropped, so the rest of the string survives intact. A trailing odd byte
/// is ignored.
pub fn read_utf16_string(data: &[u8]) -> String {
    let units = data.len() / 2;
    let end = (0..units)
        .find(|&i| data[i * 2] == 0 && data[i * 2 + 1] == 0)
        .unwrap_or(units);
    let bytes = &data[..end * 2];

    match UTF_16LE.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(decoded) => decoded.into_owned(),
        None => decode_utf16_lossy_drop(bytes),
    }
}

/// Slow path for [`read_utf16_string`]: unpaired surrogates are skipped.
fn decode_utf16_lossy_drop(bytes: &[u8]) -> String {
    char::decode_utf16(bytes.chunks_exact(2).map(LittleEndian::read_u16))
        .filter_map(|unit| unit.ok())
        .collect()
}

/// Reads a u16 from a byte slice at the given offset.
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    Ok(LittleEndian::read_u16(field(data, offset, 2)?))
}

/// Reads a u32 from a byte slice at the given offset.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    Ok(LittleEndian::read_u32(field(data, offset, 4)?))
}

/// Reads an i32 from a byte slice at the given offset.
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    Ok(LittleEndian::read_i32(field(data, offset, 4)?))
}

/// Reads a u64 from a byte slice at the given offset.
pub fn read_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    Ok(LittleEndian::read_u64(field(data, offset, 8)?))
}

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(RegistryError::TruncatedData {
            offset: offset as u32,
            expected: len,
            actual: data.len().saturating_sub(offset),
        })
}

/// Calculates the XOR checksum over the first 508 bytes of the base block.
pub fn calculate_checksum(data: &[u8]) -> u32 {
    data.get(..0x1FC)
        .map(|block| {
            block
                .chunks_exact(4)
                .fold(0u32, |acc, dword| acc ^ LittleEndian::read_u32(dword))
        })
        .unwrap_or(0)
}

/// Converts a Windows FILETIME (100 ns ticks since 1601-01-01 UTC) to a
/// calendar time.
///
/// Returns `None` for values before the Unix epoch's representable range
/// or past chrono's upper bound.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let ticks = filetime as i128 - FILETIME_UNIX_EPOCH as i128;
    let seconds = ticks.div_euclid(10_000_000);
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(i64::try_from(seconds).ok()?, nanos)
}

/// Converts a relative cell offset to an absolute image offset.
///
/// Cell offsets are relative to the first hbin (at 0x1000).
///
/// # Errors
///
/// Returns `RegistryError::InvalidOffset` if the addition would overflow.
#[inline]
pub fn cell_offset_to_absolute(cell_offset: u32) -> Result<u32> {
    cell_offset
        .checked_add(HBIN_START_OFFSET)
        .ok_or(RegistryError::InvalidOffset {
            offset: cell_offset,
            hive_size: 0,
        })
}
