//! Record pages ("RCRD").

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, align8, bump_and_protect, read_le_u16, read_le_u64, unprotect, usa_count_for,
    write_le_u16, write_le_u64,
};

use crate::record::LogRecord;

pub const RCRD_SIGNATURE: &[u8; 4] = b"RCRD";
const USA_OFFSET: u16 = 0x20;

/// First record offset in a page of `page_size` bytes.
#[must_use]
pub fn records_offset(page_size: usize) -> usize {
    align8(usize::from(USA_OFFSET) + 2 * usa_count_for(page_size))
}

/// One record page being filled or read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    /// Position in the unbounded log stream.
    pub stream_page: u64,
    pub last_lsn: Lsn,
    /// Encoded records, back to back, starting at `records_offset`.
    data: Vec<u8>,
    page_size: usize,
}

impl RecordPage {
    #[must_use]
    pub fn new(stream_page: u64, page_size: usize) -> Self {
        Self {
            stream_page,
            last_lsn: Lsn::ZERO,
            data: Vec::new(),
            page_size,
        }
    }

    /// Offset the next record would land at.
    #[must_use]
    pub fn next_offset(&self) -> usize {
        records_offset(self.page_size) + self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.next_offset() + len <= self.page_size
    }

    /// Append an encoded record; the caller has checked [`Self::fits`].
    pub fn push(&mut self, lsn: Lsn, encoded: &[u8]) {
        self.data.extend_from_slice(encoded);
        self.last_lsn = lsn;
    }

    /// Protected page image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut page = vec![0_u8; self.page_size];
        page[0..4].copy_from_slice(RCRD_SIGNATURE);
        write_le_u16(&mut page, 0x04, USA_OFFSET)?;
        write_le_u16(&mut page, 0x06, usa_count_for(self.page_size) as u16)?;
        write_le_u64(&mut page, 0x08, self.stream_page)?;
        write_le_u64(&mut page, 0x10, self.last_lsn.get())?;
        write_le_u16(&mut page, 0x18, self.next_offset() as u16)?;
        let start = records_offset(self.page_size);
        page[start..start + self.data.len()].copy_from_slice(&self.data);
        bump_and_protect(&mut page, "log record page")?;
        Ok(page)
    }

    /// Decode a page expected to hold `stream_page`. `Ok(None)` means the
    /// page is not part of the current log (never written, stale from an
    /// earlier lap, or torn) and marks the end of the log.
    pub fn decode(raw: &[u8], stream_page: u64) -> Result<Option<(Self, Vec<LogRecord>)>> {
        if raw.get(0..4) != Some(RCRD_SIGNATURE.as_slice()) {
            return Ok(None);
        }
        let mut page = raw.to_vec();
        if let Err(err) = unprotect(&mut page, "log record page") {
            tracing::warn!(target: "fntfs::log", stream_page, error = %err, "torn log page ends the log");
            return Ok(None);
        }
        if read_le_u64(&page, 0x08)? != stream_page {
            return Ok(None);
        }
        let start = records_offset(raw.len());
        let end = usize::from(read_le_u16(&page, 0x18)?);
        if end < start || end > raw.len() {
            return Err(NtfsError::corrupt(
                "log record page",
                format!("stream page {stream_page}: next free offset {end:#x}"),
            ));
        }
        let mut records = Vec::new();
        let mut offset = start;
        while offset < end {
            let (record, used) = LogRecord::decode(&page[offset..end])?;
            let expected = stream_page * raw.len() as u64 + offset as u64;
            if record.lsn.get() != expected {
                return Err(NtfsError::corrupt(
                    "log record page",
                    format!("record at lsn {expected:#x} claims {}", record.lsn),
                ));
            }
            records.push(record);
            offset += used;
        }
        let decoded = Self {
            stream_page,
            last_lsn: Lsn(read_le_u64(&page, 0x10)?),
            data: page[start..end].to_vec(),
            page_size: raw.len(),
        };
        Ok(Some((decoded, records)))
    }
}
