//! Restart pages ("RSTR") and the restart area they carry.
//!
//! The log keeps two restart pages at the start of its region. Each write
//! goes to the copy not written last, with a higher `sequence`, so a torn
//! restart write always leaves the previous copy intact.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, align8, bump_and_protect, read_le_u16, read_le_u32, read_le_u64, read_le_u8, unprotect,
    usa_count_for, write_le_u16, write_le_u32, write_le_u64, write_le_u8,
};
use serde::Serialize;

use crate::table::RestartVersion;

pub const RSTR_SIGNATURE: &[u8; 4] = b"RSTR";
const USA_OFFSET: u16 = 0x1E;
const RESTART_AREA_LEN: usize = 0x48;

/// Checkpoint state persisted in a restart page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartArea {
    pub version: RestartVersion,
    pub minor_version: u16,
    /// Generation counter; the copy with the higher value is current.
    pub sequence: u64,
    /// End of the log when this area was written.
    pub current_lsn: Lsn,
    /// Where analysis starts.
    pub checkpoint_lsn: Lsn,
    pub open_attribute_table_lsn: Lsn,
    pub dirty_page_table_lsn: Lsn,
    pub transaction_table_lsn: Lsn,
    pub next_transaction_hint: u32,
    pub log_page_size: u32,
    pub record_page_count: u32,
    /// No transaction was open when this area was written.
    pub clean: bool,
}

impl RestartArea {
    #[must_use]
    pub const fn new(version: RestartVersion, log_page_size: u32, record_page_count: u32) -> Self {
        Self {
            version,
            minor_version: 0,
            sequence: 0,
            current_lsn: Lsn::ZERO,
            checkpoint_lsn: Lsn::ZERO,
            open_attribute_table_lsn: Lsn::ZERO,
            dirty_page_table_lsn: Lsn::ZERO,
            transaction_table_lsn: Lsn::ZERO,
            next_transaction_hint: 0,
            log_page_size,
            record_page_count,
            clean: true,
        }
    }

    /// Offset of the restart area inside a page of `page_size` bytes.
    #[must_use]
    pub fn area_offset(page_size: usize) -> usize {
        align8(usize::from(USA_OFFSET) + 2 * usa_count_for(page_size))
    }

    /// Protected restart page image.
    pub fn encode_page(&self) -> Result<Vec<u8>> {
        let page_size = self.log_page_size as usize;
        let area = Self::area_offset(page_size);
        if area + RESTART_AREA_LEN > page_size {
            return Err(NtfsError::InvalidArgument(format!(
                "log page size {page_size} too small for a restart area"
            )));
        }
        let mut page = vec![0_u8; page_size];
        page[0..4].copy_from_slice(RSTR_SIGNATURE);
        write_le_u16(&mut page, 0x04, USA_OFFSET)?;
        write_le_u16(&mut page, 0x06, usa_count_for(page_size) as u16)?;
        write_le_u32(&mut page, 0x10, self.log_page_size)?;
        write_le_u32(&mut page, 0x14, self.log_page_size)?;
        write_le_u16(&mut page, 0x18, area as u16)?;
        write_le_u16(&mut page, 0x1A, self.minor_version)?;
        write_le_u16(&mut page, 0x1C, self.version.major())?;

        write_le_u16(&mut page, area, self.version.major())?;
        write_le_u16(&mut page, area + 0x02, self.minor_version)?;
        write_le_u64(&mut page, area + 0x08, self.sequence)?;
        write_le_u64(&mut page, area + 0x10, self.current_lsn.get())?;
        write_le_u64(&mut page, area + 0x18, self.checkpoint_lsn.get())?;
        write_le_u64(&mut page, area + 0x20, self.open_attribute_table_lsn.get())?;
        write_le_u64(&mut page, area + 0x28, self.dirty_page_table_lsn.get())?;
        write_le_u64(&mut page, area + 0x30, self.transaction_table_lsn.get())?;
        write_le_u32(&mut page, area + 0x38, self.next_transaction_hint)?;
        write_le_u32(&mut page, area + 0x3C, self.log_page_size)?;
        write_le_u32(&mut page, area + 0x40, self.record_page_count)?;
        write_le_u8(&mut page, area + 0x44, u8::from(self.clean))?;
        bump_and_protect(&mut page, "restart page")?;
        Ok(page)
    }

    /// Verify and decode a restart page.
    pub fn decode_page(raw: &[u8]) -> Result<Self> {
        if raw.get(0..4) != Some(RSTR_SIGNATURE.as_slice()) {
            return Err(NtfsError::corrupt("restart page", "missing RSTR signature"));
        }
        let mut page = raw.to_vec();
        unprotect(&mut page, "restart page")?;
        let area = usize::from(read_le_u16(&page, 0x18)?);
        if area < Self::area_offset(raw.len()) || area + RESTART_AREA_LEN > raw.len() {
            return Err(NtfsError::corrupt(
                "restart page",
                format!("restart area offset {area:#x}"),
            ));
        }
        let log_page_size = read_le_u32(&page, area + 0x3C)?;
        if log_page_size as usize != raw.len() {
            return Err(NtfsError::corrupt(
                "restart page",
                format!("log page size {log_page_size} in a {} byte page", raw.len()),
            ));
        }
        let version = RestartVersion::from_major(read_le_u16(&page, area)?)?;
        Ok(Self {
            version,
            minor_version: read_le_u16(&page, area + 0x02)?,
            sequence: read_le_u64(&page, area + 0x08)?,
            current_lsn: Lsn(read_le_u64(&page, area + 0x10)?),
            checkpoint_lsn: Lsn(read_le_u64(&page, area + 0x18)?),
            open_attribute_table_lsn: Lsn(read_le_u64(&page, area + 0x20)?),
            dirty_page_table_lsn: Lsn(read_le_u64(&page, area + 0x28)?),
            transaction_table_lsn: Lsn(read_le_u64(&page, area + 0x30)?),
            next_transaction_hint: read_le_u32(&page, area + 0x38)?,
            log_page_size,
            record_page_count: read_le_u32(&page, area + 0x40)?,
            clean: read_le_u8(&page, area + 0x44)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RestartArea {
        RestartArea {
            sequence: 9,
            current_lsn: Lsn(0x9_0040),
            checkpoint_lsn: Lsn(0x8_0038),
            open_attribute_table_lsn: Lsn(0x8_0038),
            clean: false,
            ..RestartArea::new(RestartVersion::V1, 4096, 62)
        }
    }

    #[test]
    fn test_restart_page_layout() {
        let page = sample().encode_page().unwrap();
        assert_eq!(&page[0..4], b"RSTR");
        assert_eq!(RestartArea::area_offset(4096), 0x30);
        assert_eq!(read_le_u16(&page, 0x30).unwrap(), 1, "case=major_at_area_start");
        assert_eq!(read_le_u64(&page, 0x38).unwrap(), 9, "case=sequence");
        assert_eq!(RestartArea::decode_page(&page).unwrap(), sample());
    }

    #[test]
    fn test_torn_restart_page_rejected() {
        let mut page = sample().encode_page().unwrap();
        page[1022] ^= 0x55;
        assert!(RestartArea::decode_page(&page).unwrap_err().is_corruption());

        let mut page = sample().encode_page().unwrap();
        page[0] = b'B';
        assert!(RestartArea::decode_page(&page).unwrap_err().is_corruption());
    }
}
