//! `$INDEX_ROOT` value: collation parameters plus the resident top node.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{read_le_u32, read_le_u8, write_le_u32, write_le_u8};

use crate::collation::CollationRule;
use crate::entry::{INDEX_HEADER_LEN, IndexNode};

const ROOT_HEADER_LEN: usize = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoot {
    /// Attribute type the index is keyed on (0x30 for `$I30`).
    pub indexed_attribute_type: u32,
    pub collation: CollationRule,
    pub bytes_per_index_record: u32,
    /// Clusters per index record, or `-log2(bytes)` below one cluster.
    pub clusters_per_index_record: i8,
    pub node: IndexNode,
}

impl IndexRoot {
    #[must_use]
    pub const fn new(
        indexed_attribute_type: u32,
        collation: CollationRule,
        bytes_per_index_record: u32,
        clusters_per_index_record: i8,
    ) -> Self {
        Self {
            indexed_attribute_type,
            collation,
            bytes_per_index_record,
            clusters_per_index_record,
            node: IndexNode::new(),
        }
    }

    /// Whether the index has spilled into `$INDEX_ALLOCATION` pages.
    #[must_use]
    pub fn is_large(&self) -> bool {
        !self.node.is_leaf()
    }

    /// Encoded value length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ROOT_HEADER_LEN + INDEX_HEADER_LEN + self.node.entries_len()
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ROOT_HEADER_LEN + INDEX_HEADER_LEN {
            return Err(NtfsError::corrupt(
                "index root",
                format!("value of {} bytes too short", data.len()),
            ));
        }
        let collation = CollationRule::from_code(read_le_u32(data, 0x04)?)?;
        let (node, _) = IndexNode::decode(data, ROOT_HEADER_LEN, "index root")?;
        Ok(Self {
            indexed_attribute_type: read_le_u32(data, 0x00)?,
            collation,
            bytes_per_index_record: read_le_u32(data, 0x08)?,
            clusters_per_index_record: read_le_u8(data, 0x0C)? as i8,
            node,
        })
    }

    /// Encode with the header's allocated size equal to its size in use.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; self.encoded_len()];
        write_le_u32(&mut out, 0x00, self.indexed_attribute_type)?;
        write_le_u32(&mut out, 0x04, self.collation.code())?;
        write_le_u32(&mut out, 0x08, self.bytes_per_index_record)?;
        write_le_u8(&mut out, 0x0C, self.clusters_per_index_record as u8)?;
        let allocated = INDEX_HEADER_LEN + self.node.entries_len();
        self.node
            .encode(&mut out, ROOT_HEADER_LEN, INDEX_HEADER_LEN, allocated, "index root")?;
        Ok(out)
    }
}
