//! Index records ("INDX"): the pages of `$INDEX_ALLOCATION`.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, align8, bump_and_protect, read_le_u16, read_le_u64, unprotect, usa_count_for,
    write_le_u16, write_le_u64,
};

use crate::entry::IndexNode;

pub const INDX_SIGNATURE: &[u8; 4] = b"INDX";

const USA_OFFSET: u16 = 0x28;
const HEADER_OFFSET: usize = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecordPage {
    pub vbn: u64,
    pub lsn: Lsn,
    pub update_sequence_number: u16,
    pub node: IndexNode,
}

/// Offset of the first entry relative to the index header.
#[must_use]
pub fn entries_offset(bytes_per_index_record: usize) -> usize {
    align8(usize::from(USA_OFFSET) + 2 * usa_count_for(bytes_per_index_record)) - HEADER_OFFSET
}

/// Bytes available to entries (sentinel included) in one page.
#[must_use]
pub fn page_capacity(bytes_per_index_record: usize) -> usize {
    bytes_per_index_record - HEADER_OFFSET - entries_offset(bytes_per_index_record)
}

impl IndexRecordPage {
    #[must_use]
    pub const fn new(vbn: u64, node: IndexNode) -> Self {
        Self {
            vbn,
            lsn: Lsn::ZERO,
            update_sequence_number: 1,
            node,
        }
    }

    /// Unprotected image of `bytes_per_index_record` bytes.
    pub fn to_bytes(&self, bytes_per_index_record: usize) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; bytes_per_index_record];
        out[0..4].copy_from_slice(INDX_SIGNATURE);
        write_le_u16(&mut out, 0x04, USA_OFFSET)?;
        write_le_u16(&mut out, 0x06, usa_count_for(bytes_per_index_record) as u16)?;
        write_le_u64(&mut out, 0x08, self.lsn.get())?;
        write_le_u64(&mut out, 0x10, self.vbn)?;
        write_le_u16(&mut out, usize::from(USA_OFFSET), self.update_sequence_number)?;
        self.node.encode(
            &mut out,
            HEADER_OFFSET,
            entries_offset(bytes_per_index_record),
            bytes_per_index_record - HEADER_OFFSET,
            "index record",
        )?;
        Ok(out)
    }

    /// Decode an unprotected image, checking it belongs at `expected_vbn`.
    pub fn from_bytes(data: &[u8], expected_vbn: u64) -> Result<Self> {
        if data.get(0..4) != Some(INDX_SIGNATURE.as_slice()) {
            return Err(NtfsError::corrupt(
                "index record",
                format!("vbn {expected_vbn} lacks INDX signature"),
            ));
        }
        let vbn = read_le_u64(data, 0x10)?;
        if vbn != expected_vbn {
            return Err(NtfsError::corrupt(
                "index record",
                format!("page at vbn {expected_vbn} claims vbn {vbn}"),
            ));
        }
        let usa_offset = usize::from(read_le_u16(data, 0x04)?);
        let (node, allocated) = IndexNode::decode(data, HEADER_OFFSET, "index record")?;
        if HEADER_OFFSET + allocated as usize != data.len() {
            return Err(NtfsError::corrupt(
                "index record",
                format!(
                    "vbn {vbn}: header allocates {allocated} bytes in a {} byte page",
                    data.len()
                ),
            ));
        }
        Ok(Self {
            vbn,
            lsn: Lsn(read_le_u64(data, 0x08)?),
            update_sequence_number: read_le_u16(data, usa_offset)?,
            node,
        })
    }

    /// Verify fixup and decode a page read from disk.
    pub fn decode(raw: &[u8], expected_vbn: u64) -> Result<Self> {
        let mut buf = raw.to_vec();
        unprotect(&mut buf, "index record")?;
        Self::from_bytes(&buf, expected_vbn)
    }

    /// Protected image with a fresh update sequence number.
    pub fn encode(&self, bytes_per_index_record: usize) -> Result<Vec<u8>> {
        let mut buf = self.to_bytes(bytes_per_index_record)?;
        bump_and_protect(&mut buf, "index record")?;
        Ok(buf)
    }
}

/// Whether `raw` carries an INDX signature.
#[must_use]
pub fn has_indx_signature(raw: &[u8]) -> bool {
    raw.get(0..4) == Some(INDX_SIGNATURE.as_slice())
}
