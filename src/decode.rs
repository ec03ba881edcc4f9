//! Byte-level primitives shared by the TZfile parser: big-endian integer reads at
//! arbitrary offsets, and NUL-terminated string extraction from the abbreviation blob.

use byteorder::{ByteOrder, BE};

use crate::TzError;

/// Reads 4 bytes at `offset` as a big-endian two's-complement integer.
pub fn read_i32(buffer: &[u8], offset: usize) -> Result<i32, TzError> {
    let end = offset.checked_add(4).ok_or(TzError::Truncated)?;
    if end > buffer.len() {
        return Err(TzError::Truncated);
    }
    Ok(BE::read_i32(&buffer[offset..end]))
}

/// Reads 8 bytes at `offset` as a big-endian two's-complement integer.
pub fn read_i64(buffer: &[u8], offset: usize) -> Result<i64, TzError> {
    let end = offset.checked_add(8).ok_or(TzError::Truncated)?;
    if end > buffer.len() {
        return Err(TzError::Truncated);
    }
    Ok(BE::read_i64(&buffer[offset..end]))
}

/// Extracts the string starting at `offset` and ending at the first NUL byte.
///
/// Never fails: an out-of-range offset, an immediate NUL, or a missing terminator all
/// yield the longest (possibly empty) prefix available. Non-UTF8 bytes are replaced.
pub fn read_stringz(buffer: &[u8], offset: usize) -> String {
    if offset >= buffer.len() {
        return String::new();
    }
    let end = buffer[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| offset + p)
        .unwrap_or_else(|| buffer.len());
    String::from_utf8_lossy(&buffer[offset..end]).into_owned()
}
