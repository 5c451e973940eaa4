//! Transaction, dirty page, and open attribute table entries.
//!
//! Dirty page and open attribute entries change field order between
//! restart versions 0 and 1; transaction entries are shared.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, SegmentReference, read_le_u32, read_le_u64, read_le_u8, write_le_u32, write_le_u64,
    write_le_u8,
};
use serde::Serialize;

use crate::table::{RestartEntry, RestartVersion};

// ---------------------------------------------------------------------------
// Transaction entries
// ---------------------------------------------------------------------------

const TRANSACTION_ENTRY_LEN: usize = 0x28;

/// State recorded in a transaction entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionEntryState {
    Active,
    Prepared,
    Committed,
}

impl TransactionEntryState {
    fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Active),
            2 => Ok(Self::Prepared),
            3 => Ok(Self::Committed),
            other => Err(NtfsError::corrupt(
                "transaction table",
                format!("transaction state {other}"),
            )),
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Active => 1,
            Self::Prepared => 2,
            Self::Committed => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionEntry {
    pub state: TransactionEntryState,
    pub first_lsn: Lsn,
    pub previous_lsn: Lsn,
    pub undo_next_lsn: Lsn,
    pub undo_records: u32,
    pub undo_bytes: i32,
}

impl TransactionEntry {
    #[must_use]
    pub const fn active() -> Self {
        Self {
            state: TransactionEntryState::Active,
            first_lsn: Lsn::ZERO,
            previous_lsn: Lsn::ZERO,
            undo_next_lsn: Lsn::ZERO,
            undo_records: 0,
            undo_bytes: 0,
        }
    }
}

impl RestartEntry for TransactionEntry {
    const STRUCTURE: &'static str = "transaction table";

    fn entry_size(_version: RestartVersion, _capacity: usize) -> usize {
        TRANSACTION_ENTRY_LEN
    }

    fn decode(raw: &[u8], _version: RestartVersion) -> Result<Self> {
        Ok(Self {
            state: TransactionEntryState::from_code(read_le_u8(raw, 0x04)?)?,
            first_lsn: Lsn(read_le_u64(raw, 0x08)?),
            previous_lsn: Lsn(read_le_u64(raw, 0x10)?),
            undo_next_lsn: Lsn(read_le_u64(raw, 0x18)?),
            undo_records: read_le_u32(raw, 0x20)?,
            undo_bytes: read_le_u32(raw, 0x24)? as i32,
        })
    }

    fn encode(&self, out: &mut [u8], _version: RestartVersion) -> Result<()> {
        write_le_u8(out, 0x04, self.state.code())?;
        write_le_u64(out, 0x08, self.first_lsn.get())?;
        write_le_u64(out, 0x10, self.previous_lsn.get())?;
        write_le_u64(out, 0x18, self.undo_next_lsn.get())?;
        write_le_u32(out, 0x20, self.undo_records)?;
        write_le_u32(out, 0x24, self.undo_bytes as u32)
    }
}

// ---------------------------------------------------------------------------
// Dirty page entries
// ---------------------------------------------------------------------------

const DIRTY_PAGE_V0_LCNS: usize = 0x24;
const DIRTY_PAGE_V1_LCNS: usize = 0x20;

/// A page changed in memory but not yet written, with the clusters it
/// lives in so redo can find it without the attribute's runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirtyPageEntry {
    pub target_attribute: u32,
    pub length_of_transfer: u32,
    pub vcn: u64,
    pub oldest_lsn: Lsn,
    pub lcns: Vec<u64>,
}

impl DirtyPageEntry {
    const fn lcn_offset(version: RestartVersion) -> usize {
        match version {
            RestartVersion::V0 => DIRTY_PAGE_V0_LCNS,
            RestartVersion::V1 => DIRTY_PAGE_V1_LCNS,
        }
    }
}

impl RestartEntry for DirtyPageEntry {
    const STRUCTURE: &'static str = "dirty page table";

    fn entry_size(version: RestartVersion, capacity: usize) -> usize {
        Self::lcn_offset(version) + 8 * capacity
    }

    fn capacity_for(version: RestartVersion, entry_size: usize) -> usize {
        entry_size.saturating_sub(Self::lcn_offset(version)) / 8
    }

    fn decode(raw: &[u8], version: RestartVersion) -> Result<Self> {
        let (vcn_at, lsn_at) = match version {
            RestartVersion::V0 => (0x14, 0x1C),
            RestartVersion::V1 => (0x10, 0x18),
        };
        let count = read_le_u32(raw, 0x0C)? as usize;
        let lcn_base = Self::lcn_offset(version);
        if lcn_base + 8 * count > raw.len() {
            return Err(NtfsError::corrupt(
                Self::STRUCTURE,
                format!("{count} lcns overrun a {} byte entry", raw.len()),
            ));
        }
        let lcns = (0..count)
            .map(|i| read_le_u64(raw, lcn_base + 8 * i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            target_attribute: read_le_u32(raw, 0x04)?,
            length_of_transfer: read_le_u32(raw, 0x08)?,
            vcn: read_le_u64(raw, vcn_at)?,
            oldest_lsn: Lsn(read_le_u64(raw, lsn_at)?),
            lcns,
        })
    }

    fn encode(&self, out: &mut [u8], version: RestartVersion) -> Result<()> {
        let lcn_base = Self::lcn_offset(version);
        if lcn_base + 8 * self.lcns.len() > out.len() {
            return Err(NtfsError::InvalidArgument(format!(
                "{} lcns exceed the dirty page entry size {}",
                self.lcns.len(),
                out.len()
            )));
        }
        write_le_u32(out, 0x04, self.target_attribute)?;
        write_le_u32(out, 0x08, self.length_of_transfer)?;
        write_le_u32(out, 0x0C, self.lcns.len() as u32)?;
        let (vcn_at, lsn_at) = match version {
            RestartVersion::V0 => (0x14, 0x1C),
            RestartVersion::V1 => (0x10, 0x18),
        };
        write_le_u64(out, vcn_at, self.vcn)?;
        write_le_u64(out, lsn_at, self.oldest_lsn.get())?;
        for (i, lcn) in self.lcns.iter().enumerate() {
            write_le_u64(out, lcn_base + 8 * i, *lcn)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Open attribute entries
// ---------------------------------------------------------------------------

const OPEN_ATTRIBUTE_V0_LEN: usize = 0x2C;
const OPEN_ATTRIBUTE_V1_LEN: usize = 0x28;

/// An attribute log records may target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenAttributeEntry {
    pub file_reference: SegmentReference,
    pub lsn_of_open_record: Lsn,
    pub dirty_pages_seen: bool,
    pub attribute_type: u32,
    pub bytes_per_index_buffer: u32,
}

impl RestartEntry for OpenAttributeEntry {
    const STRUCTURE: &'static str = "open attribute table";

    fn entry_size(version: RestartVersion, _capacity: usize) -> usize {
        match version {
            RestartVersion::V0 => OPEN_ATTRIBUTE_V0_LEN,
            RestartVersion::V1 => OPEN_ATTRIBUTE_V1_LEN,
        }
    }

    fn decode(raw: &[u8], version: RestartVersion) -> Result<Self> {
        match version {
            RestartVersion::V0 => {
                if read_le_u8(raw, 0x19)? != 0 {
                    return Err(NtfsError::unsupported(
                        "named attribute in version 0 open attribute entry",
                    ));
                }
                Ok(Self {
                    file_reference: SegmentReference::from_u64(read_le_u64(raw, 0x08)?),
                    lsn_of_open_record: Lsn(read_le_u64(raw, 0x10)?),
                    dirty_pages_seen: read_le_u8(raw, 0x18)? != 0,
                    attribute_type: read_le_u32(raw, 0x1C)?,
                    bytes_per_index_buffer: read_le_u32(raw, 0x28)?,
                })
            }
            RestartVersion::V1 => {
                if read_le_u64(raw, 0x20)? != 0 {
                    return Err(NtfsError::unsupported(
                        "named attribute in version 1 open attribute entry",
                    ));
                }
                Ok(Self {
                    bytes_per_index_buffer: read_le_u32(raw, 0x04)?,
                    attribute_type: read_le_u32(raw, 0x08)?,
                    dirty_pages_seen: read_le_u8(raw, 0x0C)? != 0,
                    file_reference: SegmentReference::from_u64(read_le_u64(raw, 0x10)?),
                    lsn_of_open_record: Lsn(read_le_u64(raw, 0x18)?),
                })
            }
        }
    }

    fn encode(&self, out: &mut [u8], version: RestartVersion) -> Result<()> {
        match version {
            RestartVersion::V0 => {
                write_le_u64(out, 0x08, self.file_reference.to_u64())?;
                write_le_u64(out, 0x10, self.lsn_of_open_record.get())?;
                write_le_u8(out, 0x18, u8::from(self.dirty_pages_seen))?;
                write_le_u32(out, 0x1C, self.attribute_type)?;
                write_le_u32(out, 0x28, self.bytes_per_index_buffer)
            }
            RestartVersion::V1 => {
                write_le_u32(out, 0x04, self.bytes_per_index_buffer)?;
                write_le_u32(out, 0x08, self.attribute_type)?;
                write_le_u8(out, 0x0C, u8::from(self.dirty_pages_seen))?;
                write_le_u64(out, 0x10, self.file_reference.to_u64())?;
                write_le_u64(out, 0x18, self.lsn_of_open_record.get())
            }
        }
    }
}
