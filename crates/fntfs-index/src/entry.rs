//! Index entries and the entry sequence of one node.

use fntfs_error::{NtfsError, Result};
use fntfs_record::FileNameAttribute;
use fntfs_types::{
    SegmentReference, align8, read_le_u16, read_le_u32, read_le_u64, read_le_u8, write_le_u16,
    write_le_u32, write_le_u64, write_le_u8,
};

const ENTRY_HEADER_LEN: usize = 0x10;
const FLAG_SUBNODE: u16 = 0x01;
const FLAG_LAST: u16 = 0x02;

/// Index header: where a node's entries start and how much space they use.
pub const INDEX_HEADER_LEN: usize = 0x10;
const HEADER_FLAG_LARGE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_reference: SegmentReference,
    pub key: Vec<u8>,
    /// VBN of the child node holding keys that sort before this one.
    pub subnode: Option<u64>,
}

impl IndexEntry {
    #[must_use]
    pub const fn new(file_reference: SegmentReference, key: Vec<u8>) -> Self {
        Self {
            file_reference,
            key,
            subnode: None,
        }
    }

    /// Entry for a `$I30` directory index.
    pub fn for_file_name(file_reference: SegmentReference, name: &FileNameAttribute) -> Result<Self> {
        Ok(Self::new(file_reference, name.serialize()?))
    }

    /// Decode the key as a `$FILE_NAME`.
    pub fn file_name(&self) -> Result<FileNameAttribute> {
        FileNameAttribute::parse(&self.key)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        align8(ENTRY_HEADER_LEN + self.key.len()) + if self.subnode.is_some() { 8 } else { 0 }
    }
}

/// Entries of one node (root or INDX page) in collation order, plus the
/// child of the closing sentinel entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexNode {
    pub entries: Vec<IndexEntry>,
    /// Child holding keys greater than every entry.
    pub end_subnode: Option<u64>,
}

impl IndexNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            end_subnode: None,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.end_subnode.is_none()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.end_subnode.is_none()
    }

    /// Child pointer in slot `slot` (`entries.len()` is the sentinel).
    #[must_use]
    pub fn child(&self, slot: usize) -> Option<u64> {
        self.entries
            .get(slot)
            .map_or(self.end_subnode, |entry| entry.subnode)
    }

    pub fn set_child(&mut self, slot: usize, vbn: Option<u64>) {
        match self.entries.get_mut(slot) {
            Some(entry) => entry.subnode = vbn,
            None => self.end_subnode = vbn,
        }
    }

    fn sentinel_len(&self) -> usize {
        ENTRY_HEADER_LEN + if self.end_subnode.is_some() { 8 } else { 0 }
    }

    /// Bytes the entries occupy, sentinel included.
    #[must_use]
    pub fn entries_len(&self) -> usize {
        self.entries.iter().map(IndexEntry::encoded_len).sum::<usize>() + self.sentinel_len()
    }

    /// Decode an index header at `header_offset` and the entries it
    /// describes. Returns the node and the header's allocated size.
    pub fn decode(data: &[u8], header_offset: usize, structure: &'static str) -> Result<(Self, u32)> {
        let entries_offset = read_le_u32(data, header_offset)? as usize;
        let bytes_in_use = read_le_u32(data, header_offset + 0x04)? as usize;
        let bytes_allocated = read_le_u32(data, header_offset + 0x08)?;
        let large = read_le_u8(data, header_offset + 0x0C)? & HEADER_FLAG_LARGE != 0;
        if entries_offset < INDEX_HEADER_LEN
            || bytes_in_use < entries_offset
            || bytes_in_use > bytes_allocated as usize
            || header_offset + bytes_allocated as usize > data.len()
        {
            return Err(NtfsError::corrupt(
                structure,
                format!(
                    "index header: entries {entries_offset:#x}, in use {bytes_in_use}, allocated {bytes_allocated}, buffer {}",
                    data.len()
                ),
            ));
        }
        let region = &data[header_offset..header_offset + bytes_in_use];
        let mut node = Self::new();
        let mut pos = entries_offset;
        loop {
            let length = usize::from(read_le_u16(region, pos + 0x08).map_err(|_| {
                NtfsError::corrupt(structure, format!("entry at {pos:#x} past entries region"))
            })?);
            let key_length = usize::from(read_le_u16(region, pos + 0x0A)?);
            let flags = read_le_u16(region, pos + 0x0C)?;
            let has_subnode = flags & FLAG_SUBNODE != 0;
            let minimum = ENTRY_HEADER_LEN + key_length + if has_subnode { 8 } else { 0 };
            if length % 8 != 0 || length < minimum || pos + length > region.len() {
                return Err(NtfsError::corrupt(
                    structure,
                    format!("entry at {pos:#x} has length {length}, key {key_length}"),
                ));
            }
            if has_subnode && !large {
                return Err(NtfsError::corrupt(
                    structure,
                    format!("entry at {pos:#x} has a subnode in a small index node"),
                ));
            }
            let subnode = if has_subnode {
                Some(read_le_u64(region, pos + length - 8)?)
            } else {
                None
            };
            if flags & FLAG_LAST != 0 {
                node.end_subnode = subnode;
                pos += length;
                break;
            }
            node.entries.push(IndexEntry {
                file_reference: SegmentReference::from_u64(read_le_u64(region, pos)?),
                key: region[pos + ENTRY_HEADER_LEN..pos + ENTRY_HEADER_LEN + key_length].to_vec(),
                subnode,
            });
            pos += length;
        }
        if pos != bytes_in_use {
            return Err(NtfsError::corrupt(
                structure,
                format!("entries end at {pos:#x} but header declares {bytes_in_use:#x} in use"),
            ));
        }
        Ok((node, bytes_allocated))
    }

    /// Write the index header at `header_offset` followed by the entries.
    /// `bytes_allocated` counts from the header start.
    pub fn encode(
        &self,
        out: &mut [u8],
        header_offset: usize,
        entries_offset: usize,
        bytes_allocated: usize,
        structure: &'static str,
    ) -> Result<()> {
        let bytes_in_use = entries_offset + self.entries_len();
        if bytes_in_use > bytes_allocated || header_offset + bytes_allocated > out.len() {
            return Err(NtfsError::out_of_space(format!(
                "{structure}: entries need {bytes_in_use} bytes, {bytes_allocated} allocated"
            )));
        }
        let large = self.end_subnode.is_some() || self.entries.iter().any(|e| e.subnode.is_some());
        write_le_u32(out, header_offset, entries_offset as u32)?;
        write_le_u32(out, header_offset + 0x04, bytes_in_use as u32)?;
        write_le_u32(out, header_offset + 0x08, bytes_allocated as u32)?;
        write_le_u8(out, header_offset + 0x0C, if large { HEADER_FLAG_LARGE } else { 0 })?;

        let mut pos = header_offset + entries_offset;
        for entry in &self.entries {
            let length = entry.encoded_len();
            let flags = if entry.subnode.is_some() { FLAG_SUBNODE } else { 0 };
            write_le_u64(out, pos, entry.file_reference.to_u64())?;
            write_le_u16(out, pos + 0x08, length as u16)?;
            write_le_u16(out, pos + 0x0A, entry.key.len() as u16)?;
            write_le_u16(out, pos + 0x0C, flags)?;
            out[pos + ENTRY_HEADER_LEN..pos + ENTRY_HEADER_LEN + entry.key.len()]
                .copy_from_slice(&entry.key);
            if let Some(vbn) = entry.subnode {
                write_le_u64(out, pos + length - 8, vbn)?;
            }
            pos += length;
        }
        let sentinel = self.sentinel_len();
        let flags = FLAG_LAST | if self.end_subnode.is_some() { FLAG_SUBNODE } else { 0 };
        write_le_u64(out, pos, 0)?;
        write_le_u16(out, pos + 0x08, sentinel as u16)?;
        write_le_u16(out, pos + 0x0A, 0)?;
        write_le_u16(out, pos + 0x0C, flags)?;
        if let Some(vbn) = self.end_subnode {
            write_le_u64(out, pos + sentinel - 8, vbn)?;
        }
        Ok(())
    }
}
