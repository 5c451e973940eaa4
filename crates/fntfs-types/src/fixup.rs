//! Multi-sector update sequence array (fixup) protocol.
//!
//! A multi-sector structure (file record segment, index record, log page)
//! stores an update sequence number (USN) plus one saved word per 512-byte
//! stride. Before writing, the last word of every stride is saved into the
//! array and replaced by the USN; after reading, every stride must still end
//! with the USN (otherwise the write was torn) and the saved words are put
//! back.
//!
//! Header fields shared by every protected structure:
//! - `0x04`: offset of the array (`u16`)
//! - `0x06`: number of array entries (`u16`), `len / 512 + 1`

use fntfs_error::{NtfsError, Result};

use crate::codec::{read_le_u16, write_le_u16};

/// Stride protected by one update sequence array entry.
pub const MULTI_SECTOR_STRIDE: usize = 512;

const USA_OFFSET_FIELD: usize = 0x04;
const USA_COUNT_FIELD: usize = 0x06;

/// Number of array entries needed to protect `len` bytes.
#[must_use]
pub const fn usa_count_for(len: usize) -> usize {
    len / MULTI_SECTOR_STRIDE + 1
}

/// Next USN after `current`, skipping the reserved values 0 and 0xFFFF.
#[must_use]
pub const fn next_update_sequence_number(current: u16) -> u16 {
    match current.wrapping_add(1) {
        0 | 0xFFFF => 1,
        next => next,
    }
}

fn array_geometry(buf: &[u8], structure: &'static str) -> Result<(usize, usize)> {
    let usa_offset = usize::from(read_le_u16(buf, USA_OFFSET_FIELD)?);
    let usa_count = usize::from(read_le_u16(buf, USA_COUNT_FIELD)?);
    if usa_count < 2 {
        return Err(NtfsError::corrupt(
            structure,
            format!("update sequence array count {usa_count} too small"),
        ));
    }
    let strides = usa_count - 1;
    if strides * MULTI_SECTOR_STRIDE > buf.len() {
        return Err(NtfsError::corrupt(
            structure,
            format!(
                "update sequence array covers {strides} strides but buffer is {} bytes",
                buf.len()
            ),
        ));
    }
    if usa_offset % 2 != 0 || usa_offset + usa_count * 2 > MULTI_SECTOR_STRIDE - 2 {
        return Err(NtfsError::corrupt(
            structure,
            format!("update sequence array offset {usa_offset:#x} out of range"),
        ));
    }
    Ok((usa_offset, strides))
}

/// Apply protection to `buf` using the USN already stored in the array.
///
/// The array geometry is read from the header; the caller is responsible for
/// having bumped the USN (see [`next_update_sequence_number`]).
pub fn protect(buf: &mut [u8], structure: &'static str) -> Result<u16> {
    let (usa_offset, strides) = array_geometry(buf, structure)?;
    let usn = read_le_u16(buf, usa_offset)?;
    for stride in 1..=strides {
        let tail = stride * MULTI_SECTOR_STRIDE - 2;
        let original = read_le_u16(buf, tail)?;
        write_le_u16(buf, usa_offset + stride * 2, original)?;
        write_le_u16(buf, tail, usn)?;
    }
    Ok(usn)
}

/// Bump the stored USN and protect `buf` with it, returning the new USN.
pub fn bump_and_protect(buf: &mut [u8], structure: &'static str) -> Result<u16> {
    let (usa_offset, _) = array_geometry(buf, structure)?;
    let usn = next_update_sequence_number(read_le_u16(buf, usa_offset)?);
    write_le_u16(buf, usa_offset, usn)?;
    protect(buf, structure)
}

/// Verify and remove protection from `buf`, returning the USN.
///
/// A stride whose tail does not carry the USN means a torn or partial write;
/// it is reported as `CorruptFormat` and `buf` is left untouched.
pub fn unprotect(buf: &mut [u8], structure: &'static str) -> Result<u16> {
    let (usa_offset, strides) = array_geometry(buf, structure)?;
    let usn = read_le_u16(buf, usa_offset)?;
    for stride in 1..=strides {
        let tail = stride * MULTI_SECTOR_STRIDE - 2;
        let found = read_le_u16(buf, tail)?;
        if found != usn {
            tracing::warn!(
                target: "fntfs::fixup",
                structure,
                stride,
                expected = usn,
                found,
                "update sequence mismatch"
            );
            return Err(NtfsError::corrupt(
                structure,
                format!("update sequence mismatch in stride {stride}: expected {usn:#06x}, found {found:#06x}"),
            ));
        }
    }
    for stride in 1..=strides {
        let tail = stride * MULTI_SECTOR_STRIDE - 2;
        let saved = read_le_u16(buf, usa_offset + stride * 2)?;
        write_le_u16(buf, tail, saved)?;
    }
    Ok(usn)
}
