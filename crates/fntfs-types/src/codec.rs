//! Little/big-endian integer and UTF-16 string codecs over byte slices.
//!
//! Every reader checks bounds and reports `CorruptFormat` for the
//! `"buffer"` structure; callers that know which structure they are decoding
//! re-wrap the error with more context where it matters.

use fntfs_error::{NtfsError, Result};

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let Some(end) = offset.checked_add(len) else {
        return Err(NtfsError::corrupt("buffer", "offset overflow"));
    };
    if end > data.len() {
        return Err(NtfsError::corrupt(
            "buffer",
            format!(
                "need {len} bytes at offset {offset}, have {}",
                data.len().saturating_sub(offset)
            ),
        ));
    }
    Ok(&data[offset..end])
}

#[inline]
fn ensure_slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    let available = data.len();
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= available)
        .ok_or_else(|| {
            NtfsError::corrupt(
                "buffer",
                format!("write of {len} bytes at offset {offset} exceeds {available}"),
            )
        })?;
    Ok(&mut data[offset..end])
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[inline]
pub fn read_le_u8(data: &[u8], offset: usize) -> Result<u8> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_fixed(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_fixed(data, offset).map(u32::from_le_bytes)
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_fixed(data, offset).map(u64::from_le_bytes)
}

#[inline]
pub fn read_be_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_fixed(data, offset).map(u16::from_be_bytes)
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_fixed(data, offset).map(u32::from_be_bytes)
}

#[inline]
pub fn read_be_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_fixed(data, offset).map(u64::from_be_bytes)
}

#[inline]
pub fn write_le_u8(data: &mut [u8], offset: usize, value: u8) -> Result<()> {
    ensure_slice_mut(data, offset, 1)?[0] = value;
    Ok(())
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<()> {
    ensure_slice_mut(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<()> {
    ensure_slice_mut(data, offset, 8)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_be_u32(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode `units` UTF-16LE code units starting at `offset`.
pub fn read_utf16le(data: &[u8], offset: usize, units: usize) -> Result<String> {
    let byte_len = units
        .checked_mul(2)
        .ok_or_else(|| NtfsError::corrupt("buffer", "utf-16 length overflow"))?;
    let bytes = ensure_slice(data, offset, byte_len)?;
    let code_units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&code_units)
        .map_err(|_| NtfsError::corrupt("buffer", format!("invalid utf-16 at offset {offset}")))
}

/// Encode `text` as UTF-16LE at `offset`, returning the number of bytes
/// written.
pub fn write_utf16le(data: &mut [u8], offset: usize, text: &str) -> Result<usize> {
    let mut cursor = offset;
    for unit in text.encode_utf16() {
        write_le_u16(data, cursor, unit)?;
        cursor += 2;
    }
    Ok(cursor - offset)
}

/// Number of UTF-16 code units `text` encodes to.
#[must_use]
pub fn utf16_units(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Round `value` up to the next multiple of 8.
#[inline]
#[must_use]
pub const fn align8(value: usize) -> usize {
    (value + 7) & !7
}
