//! Page storage seam between the B+tree and whatever holds
//! `$INDEX_ALLOCATION`.

use fntfs_error::{NtfsError, Result};
use hashbrown::HashMap;

use crate::entry::IndexNode;
use crate::page::{IndexRecordPage, page_capacity};

/// Index pages addressed by VBN.
///
/// Implementations own encoding: a page handed to `write_page` must come
/// back from `read_page` with identical entries.
pub trait IndexPageStore {
    /// Bytes available to a page's entries, sentinel included.
    fn page_capacity(&self) -> usize;

    fn read_page(&self, vbn: u64) -> Result<IndexNode>;

    fn write_page(&mut self, vbn: u64, node: &IndexNode) -> Result<()>;

    /// Reserve an unused VBN.
    fn allocate_page(&mut self) -> Result<u64>;

    fn free_page(&mut self, vbn: u64) -> Result<()>;
}

/// In-memory store keeping protected INDX images, used by tests and tools.
///
/// Every write encodes a full page (fixup included) and every read decodes
/// it again, so the tree is exercised against the real page format.
#[derive(Debug, Clone)]
pub struct MemoryPageStore {
    bytes_per_index_record: usize,
    /// VBN step between consecutive pages.
    vbn_stride: u64,
    pages: HashMap<u64, Vec<u8>>,
    free: Vec<u64>,
    next_vbn: u64,
    page_limit: Option<usize>,
}

impl MemoryPageStore {
    #[must_use]
    pub fn new(bytes_per_index_record: usize, vbn_stride: u64) -> Self {
        Self {
            bytes_per_index_record,
            vbn_stride: vbn_stride.max(1),
            pages: HashMap::new(),
            free: Vec::new(),
            next_vbn: 0,
            page_limit: None,
        }
    }

    /// Refuse allocations beyond `limit` live pages.
    #[must_use]
    pub const fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn live_pages(&self) -> usize {
        self.pages.len()
    }

    /// Raw protected image of a page, for corruption tests.
    pub fn raw_page_mut(&mut self, vbn: u64) -> Option<&mut Vec<u8>> {
        self.pages.get_mut(&vbn)
    }
}

impl IndexPageStore for MemoryPageStore {
    fn page_capacity(&self) -> usize {
        page_capacity(self.bytes_per_index_record)
    }

    fn read_page(&self, vbn: u64) -> Result<IndexNode> {
        let raw = self
            .pages
            .get(&vbn)
            .ok_or_else(|| NtfsError::corrupt("index record", format!("vbn {vbn} not allocated")))?;
        Ok(IndexRecordPage::decode(raw, vbn)?.node)
    }

    fn write_page(&mut self, vbn: u64, node: &IndexNode) -> Result<()> {
        let mut page = IndexRecordPage::new(vbn, node.clone());
        if let Some(previous) = self.pages.get(&vbn) {
            page.update_sequence_number = IndexRecordPage::decode(previous, vbn)
                .map_or(1, |old| old.update_sequence_number);
        }
        let raw = page.encode(self.bytes_per_index_record)?;
        self.pages.insert(vbn, raw);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u64> {
        if self
            .page_limit
            .is_some_and(|limit| self.pages.len() >= limit)
        {
            return Err(NtfsError::out_of_space("index page limit reached"));
        }
        let vbn = self.free.pop().unwrap_or_else(|| {
            let vbn = self.next_vbn;
            self.next_vbn += self.vbn_stride;
            vbn
        });
        // Reserve the slot so the limit sees it before the first write.
        self.pages
            .insert(vbn, IndexRecordPage::new(vbn, IndexNode::new()).encode(self.bytes_per_index_record)?);
        Ok(vbn)
    }

    fn free_page(&mut self, vbn: u64) -> Result<()> {
        if self.pages.remove(&vbn).is_none() {
            return Err(NtfsError::internal(format!("freeing unallocated vbn {vbn}")));
        }
        self.free.push(vbn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::IndexEntry;
    use fntfs_types::SegmentReference;

    #[test]
    fn test_memory_store_allocate_write_free() {
        let mut store = MemoryPageStore::new(4096, 1).with_page_limit(2);
        let a = store.allocate_page().unwrap();
        let b = store.allocate_page().unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(matches!(store.allocate_page(), Err(NtfsError::OutOfSpace(_))));

        let node = IndexNode {
            entries: vec![IndexEntry::new(SegmentReference::new(30, 2), vec![1; 16])],
            end_subnode: None,
        };
        store.write_page(b, &node).unwrap();
        assert_eq!(store.read_page(b).unwrap(), node);

        store.free_page(a).unwrap();
        assert!(store.read_page(a).is_err());
        assert_eq!(store.allocate_page().unwrap(), a, "case=freed_vbn_reused");
    }

    #[test]
    fn test_memory_store_surfaces_corrupt_page() {
        let mut store = MemoryPageStore::new(1024, 1);
        let vbn = store.allocate_page().unwrap();
        store.write_page(vbn, &IndexNode::new()).unwrap();
        store.raw_page_mut(vbn).unwrap()[510] ^= 0xFF;
        assert!(store.read_page(vbn).unwrap_err().is_corruption());
    }
}
