//! Restart tables: fixed-size entry arrays with an in-place free list.
//!
//! An entry is addressed by its byte offset from the start of the table,
//! which is also how log records and other tables refer to it (a
//! transaction id is the offset of its transaction entry).

use fntfs_error::{NtfsError, Result};
use fntfs_types::{read_le_u16, read_le_u32, write_le_u16, write_le_u32};
use serde::Serialize;

/// Table header length.
pub const TABLE_HEADER_LEN: usize = 0x18;
/// `allocated_or_next_free` value of an entry in use.
pub const ENTRY_ALLOCATED: u32 = 0xFFFF_FFFF;

/// Restart area major version; selects entry layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RestartVersion {
    V0,
    V1,
}

impl RestartVersion {
    pub fn from_major(major: u16) -> Result<Self> {
        match major {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            other => Err(NtfsError::unsupported(format!(
                "restart area major version {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn major(self) -> u16 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }
}

/// An entry type stored in a [`RestartTable`].
pub trait RestartEntry: Sized {
    /// Name used in errors.
    const STRUCTURE: &'static str;

    /// Encoded size of one entry. `capacity` is the table-level
    /// parameter (max LCNs for dirty pages; ignored otherwise).
    fn entry_size(version: RestartVersion, capacity: usize) -> usize;

    /// Largest `capacity` an entry size can hold.
    fn capacity_for(version: RestartVersion, entry_size: usize) -> usize {
        let _ = (version, entry_size);
        0
    }

    /// Decode an allocated entry; `raw` is exactly one entry.
    fn decode(raw: &[u8], version: RestartVersion) -> Result<Self>;

    /// Encode into `out` (one zeroed entry); the allocation marker is
    /// written by the table.
    fn encode(&self, out: &mut [u8], version: RestartVersion) -> Result<()>;
}

/// Slot array of `E` addressed by byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartTable<E> {
    version: RestartVersion,
    capacity: usize,
    slots: Vec<Option<E>>,
}

impl<E: RestartEntry> RestartTable<E> {
    #[must_use]
    pub const fn new(version: RestartVersion, capacity: usize) -> Self {
        Self {
            version,
            capacity,
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub const fn version(&self) -> RestartVersion {
        self.version
    }

    #[must_use]
    pub fn entry_size(&self) -> usize {
        E::entry_size(self.version, self.capacity)
    }

    /// Largest per-entry parameter (LCN count for dirty pages).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raise the per-entry parameter to at least `capacity`.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.capacity = self.capacity.max(capacity);
    }

    fn offset_of(&self, slot: usize) -> u32 {
        (TABLE_HEADER_LEN + slot * self.entry_size()) as u32
    }

    fn slot_of(&self, index: u32) -> Result<usize> {
        let index = index as usize;
        let size = self.entry_size();
        if index < TABLE_HEADER_LEN || (index - TABLE_HEADER_LEN) % size != 0 {
            return Err(NtfsError::corrupt(
                E::STRUCTURE,
                format!("index {index:#x} is not an entry boundary"),
            ));
        }
        Ok((index - TABLE_HEADER_LEN) / size)
    }

    /// Store `entry` in the lowest free slot and return its index.
    pub fn allocate(&mut self, entry: E) -> u32 {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.offset_of(slot)
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&E> {
        let slot = self.slot_of(index).ok()?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut E> {
        let slot = self.slot_of(index).ok()?;
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Free the entry at `index`, returning it.
    pub fn remove(&mut self, index: u32) -> Option<E> {
        let slot = self.slot_of(index).ok()?;
        let entry = self.slots.get_mut(slot)?.take();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        entry
    }

    /// Allocated entries with their indices, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &E)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (self.offset_of(slot), e)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Encode header and entries; free slots are chained through their
    /// first word, the last one holding 0.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = self.entry_size();
        let count = self.slots.len();
        let mut out = vec![0_u8; TABLE_HEADER_LEN + count * size];
        let entry_size = u16::try_from(size)
            .map_err(|_| NtfsError::unsupported(format!("{} entry of {size} bytes", E::STRUCTURE)))?;
        let entries = u16::try_from(count)
            .map_err(|_| NtfsError::out_of_space(format!("{} has {count} entries", E::STRUCTURE)))?;
        write_le_u16(&mut out, 0x00, entry_size)?;
        write_le_u16(&mut out, 0x02, entries)?;
        write_le_u16(&mut out, 0x04, entries)?;

        let free: Vec<usize> = (0..count).filter(|slot| self.slots[*slot].is_none()).collect();
        let first_free = free.first().map_or(0, |slot| self.offset_of(*slot));
        let last_free = free.last().map_or(0, |slot| self.offset_of(*slot));
        write_le_u32(&mut out, 0x0C, self.offset_of(count))?;
        write_le_u32(&mut out, 0x10, first_free)?;
        write_le_u32(&mut out, 0x14, last_free)?;
        for pair in free.windows(2) {
            let next = self.offset_of(pair[1]);
            write_le_u32(&mut out, self.offset_of(pair[0]) as usize, next)?;
        }

        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(entry) = entry {
                let start = self.offset_of(slot) as usize;
                let raw = &mut out[start..start + size];
                write_le_u32(raw, 0, ENTRY_ALLOCATED)?;
                entry.encode(raw, self.version)?;
            }
        }
        Ok(out)
    }

    /// Decode a table dump.
    pub fn decode(data: &[u8], version: RestartVersion) -> Result<Self> {
        let size = usize::from(read_le_u16(data, 0x00).map_err(|_| {
            NtfsError::corrupt(E::STRUCTURE, "truncated table header")
        })?);
        let count = usize::from(read_le_u16(data, 0x02)?);
        if size < E::entry_size(version, 0) {
            return Err(NtfsError::corrupt(
                E::STRUCTURE,
                format!("entry size {size} below minimum"),
            ));
        }
        let capacity = E::capacity_for(version, size);
        if E::entry_size(version, capacity) != size {
            return Err(NtfsError::corrupt(
                E::STRUCTURE,
                format!("entry size {size} does not match a layout"),
            ));
        }
        let mut table = Self::new(version, capacity);
        for slot in 0..count {
            let start = TABLE_HEADER_LEN + slot * size;
            let raw = data.get(start..start + size).ok_or_else(|| {
                NtfsError::corrupt(
                    E::STRUCTURE,
                    format!("entry {slot} of {count} overruns {} byte table", data.len()),
                )
            })?;
            let entry = if read_le_u32(raw, 0)? == ENTRY_ALLOCATED {
                Some(E::decode(raw, version)?)
            } else {
                None
            };
            table.slots.push(entry);
        }
        while matches!(table.slots.last(), Some(None)) {
            table.slots.pop();
        }
        Ok(table)
    }
}
