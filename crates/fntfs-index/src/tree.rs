//! B+tree operations over an index root and its pages.
//!
//! Layout rules:
//! - an entry's subnode holds keys that sort before the entry;
//! - the sentinel's subnode (`end_subnode`) holds keys after every entry;
//! - a node either has a child in every slot or in none.
//!
//! Splits keep the upper half in the existing page and move the lower half
//! to a new page, so the parent's pointer to the split page stays valid and
//! only the promoted median has to be added. When the resident root
//! overflows, all of its entries move into a fresh page and the root keeps a
//! single sentinel pointing there.

use std::cmp::Ordering;

use fntfs_error::{NtfsError, Result};
use fntfs_types::UpcaseTable;
use tracing::{debug, trace};

use crate::entry::{IndexEntry, IndexNode};
use crate::instrumentation::{
    IndexOpType, record_operation, record_page_free, record_root_collapse, record_root_promotion,
    record_split, set_depth_gauge,
};
use crate::root::IndexRoot;
use crate::store::IndexPageStore;

/// Smallest root region: an empty sentinel with a subnode.
const MIN_ROOT_CAPACITY: usize = 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Root,
    Page(u64),
}

/// Mutable view of one index: its root plus the page store behind it.
pub struct IndexTree<'a, S: IndexPageStore + ?Sized> {
    root: &'a mut IndexRoot,
    store: &'a mut S,
    upcase: &'a UpcaseTable,
    root_capacity: usize,
}

impl<'a, S: IndexPageStore + ?Sized> IndexTree<'a, S> {
    /// `root_capacity` is the most entry bytes (sentinel included) the
    /// resident root may hold before it is pushed down into a page.
    pub fn new(
        root: &'a mut IndexRoot,
        store: &'a mut S,
        upcase: &'a UpcaseTable,
        root_capacity: usize,
    ) -> Result<Self> {
        if root_capacity < MIN_ROOT_CAPACITY {
            return Err(NtfsError::InvalidArgument(format!(
                "index root capacity {root_capacity} below {MIN_ROOT_CAPACITY}"
            )));
        }
        Ok(Self {
            root,
            store,
            upcase,
            root_capacity,
        })
    }

    #[must_use]
    pub fn root(&self) -> &IndexRoot {
        self.root
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.node.is_empty()
    }

    fn load(&self, node: NodeRef) -> Result<IndexNode> {
        match node {
            NodeRef::Root => Ok(self.root.node.clone()),
            NodeRef::Page(vbn) => self.store.read_page(vbn),
        }
    }

    fn save(&mut self, node: NodeRef, data: IndexNode) -> Result<()> {
        match node {
            NodeRef::Root => {
                self.root.node = data;
                Ok(())
            }
            NodeRef::Page(vbn) => self.store.write_page(vbn, &data),
        }
    }

    fn compare(&self, left: &[u8], right: &[u8]) -> Result<Ordering> {
        self.root.collation.compare(self.upcase, left, right)
    }

    /// Binary search with a fallible comparator; `cmp(entry_key)` orders
    /// the target against an entry.
    fn search_by<F>(node: &IndexNode, cmp: &mut F) -> Result<std::result::Result<usize, usize>>
    where
        F: FnMut(&[u8]) -> Result<Ordering>,
    {
        let (mut low, mut high) = (0, node.entries.len());
        while low < high {
            let mid = low + (high - low) / 2;
            match cmp(&node.entries[mid].key)? {
                Ordering::Equal => return Ok(Ok(mid)),
                Ordering::Greater => low = mid + 1,
                Ordering::Less => high = mid,
            }
        }
        Ok(Err(low))
    }

    fn search(&self, node: &IndexNode, key: &[u8]) -> Result<std::result::Result<usize, usize>> {
        Self::search_by(node, &mut |entry_key| self.compare(key, entry_key))
    }

    // -----------------------------------------------------------------------
    // Lookup and traversal
    // -----------------------------------------------------------------------

    /// Find the entry whose key collates equal to `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<IndexEntry> {
        self.find_by(|entry_key| self.compare(key, entry_key))?
            .ok_or_else(|| NtfsError::NotFound("index key".to_owned()))
    }

    /// Find an entry equal to `key` ignoring case.
    pub fn lookup_ignore_case(&self, key: &[u8]) -> Result<Option<IndexEntry>> {
        let collation = self.root.collation;
        let upcase = self.upcase;
        self.find_by(|entry_key| collation.compare_ignore_case(upcase, key, entry_key))
    }

    /// Descend with a caller-supplied ordering that must be consistent with
    /// the index collation (it may be coarser).
    pub fn find_by<F>(&self, mut cmp: F) -> Result<Option<IndexEntry>>
    where
        F: FnMut(&[u8]) -> Result<Ordering>,
    {
        record_operation(IndexOpType::Seek);
        let mut node = self.load(NodeRef::Root)?;
        let mut depth = 1;
        loop {
            match Self::search_by(&node, &mut cmp)? {
                Ok(index) => {
                    set_depth_gauge(depth);
                    let mut found = node.entries.swap_remove(index);
                    found.subnode = None;
                    return Ok(Some(found));
                }
                Err(slot) => match node.child(slot) {
                    Some(child) => {
                        node = self.store.read_page(child)?;
                        depth += 1;
                    }
                    None => {
                        set_depth_gauge(depth);
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Every entry in collation order, subnode pointers cleared.
    pub fn traverse(&self) -> Result<Vec<IndexEntry>> {
        let mut out = Vec::new();
        self.visit(&self.root.node, &mut |entry| {
            out.push(IndexEntry {
                subnode: None,
                ..entry.clone()
            });
        })?;
        Ok(out)
    }

    fn visit<F: FnMut(&IndexEntry)>(&self, node: &IndexNode, f: &mut F) -> Result<()> {
        for entry in &node.entries {
            if let Some(child) = entry.subnode {
                let child_node = self.store.read_page(child)?;
                self.visit(&child_node, f)?;
            }
            f(entry);
        }
        if let Some(child) = node.end_subnode {
            let child_node = self.store.read_page(child)?;
            self.visit(&child_node, f)?;
        }
        Ok(())
    }

    /// Check ordering, child uniformity, and that no page is empty.
    /// Returns the number of entries.
    pub fn verify(&self) -> Result<usize> {
        self.verify_node(&self.root.node, None, None, true)
    }

    fn verify_node(
        &self,
        node: &IndexNode,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
    ) -> Result<usize> {
        if !is_root && node.is_empty() {
            return Err(NtfsError::corrupt("index", "empty non-root page"));
        }
        let has_children = node.end_subnode.is_some();
        let mut count = node.entries.len();
        let mut previous = lower;
        for entry in &node.entries {
            if entry.subnode.is_some() != has_children {
                return Err(NtfsError::corrupt("index", "node mixes leaf and interior entries"));
            }
            if let Some(prev) = previous {
                if self.compare(prev, &entry.key)? != Ordering::Less {
                    return Err(NtfsError::corrupt("index", "entries out of collation order"));
                }
            }
            if let Some(child) = entry.subnode {
                count += self.verify_node(
                    &self.store.read_page(child)?,
                    previous,
                    Some(entry.key.as_slice()),
                    false,
                )?;
            }
            previous = Some(entry.key.as_slice());
        }
        if let (Some(prev), Some(up)) = (previous, upper) {
            if self.compare(prev, up)? != Ordering::Less {
                return Err(NtfsError::corrupt("index", "entry above parent bound"));
            }
        }
        if let Some(child) = node.end_subnode {
            count += self.verify_node(&self.store.read_page(child)?, previous, upper, false)?;
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Insert `entry` in collation order; a collating-equal key is
    /// `AlreadyExists`.
    pub fn insert(&mut self, entry: IndexEntry) -> Result<()> {
        record_operation(IndexOpType::Insert);
        self.insert_entry(entry)
    }

    fn insert_entry(&mut self, mut entry: IndexEntry) -> Result<()> {
        entry.subnode = None;
        let mut path: Vec<(NodeRef, usize)> = Vec::new();
        let mut current = NodeRef::Root;
        let mut node = self.load(current)?;
        loop {
            match self.search(&node, &entry.key)? {
                Ok(_) => {
                    return Err(NtfsError::AlreadyExists(format!(
                        "index entry for {}",
                        entry.file_reference
                    )));
                }
                Err(slot) => match node.child(slot) {
                    Some(child) => {
                        path.push((current, slot));
                        current = NodeRef::Page(child);
                        node = self.store.read_page(child)?;
                    }
                    None => {
                        node.entries.insert(slot, entry);
                        break;
                    }
                },
            }
        }
        set_depth_gauge(path.len() + 1);
        self.settle_overflow(path, current, node)
    }

    /// Write `node` back at `current`, splitting and promoting upward while
    /// anything overflows.
    fn settle_overflow(
        &mut self,
        mut path: Vec<(NodeRef, usize)>,
        mut current: NodeRef,
        mut node: IndexNode,
    ) -> Result<()> {
        loop {
            match current {
                NodeRef::Page(vbn) => {
                    if node.entries_len() <= self.store.page_capacity() {
                        return self.store.write_page(vbn, &node);
                    }
                    let (left, mut median) = split_node(&mut node)?;
                    let left_vbn = self.store.allocate_page()?;
                    self.store.write_page(left_vbn, &left)?;
                    self.store.write_page(vbn, &node)?;
                    record_split();
                    debug!(
                        target: "fntfs::index",
                        vbn,
                        left_vbn,
                        left_entries = left.entries.len(),
                        right_entries = node.entries.len(),
                        "split index page"
                    );
                    median.subnode = Some(left_vbn);
                    let (parent, slot) = path
                        .pop()
                        .ok_or_else(|| NtfsError::internal("split page has no parent"))?;
                    let mut parent_node = self.load(parent)?;
                    parent_node.entries.insert(slot, median);
                    current = parent;
                    node = parent_node;
                }
                NodeRef::Root => {
                    if node.entries_len() <= self.root_capacity {
                        self.root.node = node;
                        return Ok(());
                    }
                    let vbn = self.store.allocate_page()?;
                    record_root_promotion();
                    debug!(
                        target: "fntfs::index",
                        vbn,
                        entries = node.entries.len(),
                        "index root overflow, moving entries into a page"
                    );
                    self.root.node = IndexNode {
                        entries: Vec::new(),
                        end_subnode: Some(vbn),
                    };
                    path.push((NodeRef::Root, 0));
                    current = NodeRef::Page(vbn);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove the entry collating equal to `key` and return it.
    pub fn delete(&mut self, key: &[u8]) -> Result<IndexEntry> {
        record_operation(IndexOpType::Delete);
        let mut path: Vec<(NodeRef, usize)> = Vec::new();
        let mut current = NodeRef::Root;
        let mut node = self.load(current)?;
        let slot = loop {
            match self.search(&node, key)? {
                Ok(index) => break index,
                Err(slot) => match node.child(slot) {
                    Some(child) => {
                        path.push((current, slot));
                        current = NodeRef::Page(child);
                        node = self.store.read_page(child)?;
                    }
                    None => return Err(NtfsError::NotFound("index key".to_owned())),
                },
            }
        };
        set_depth_gauge(path.len() + 1);

        let mut removed = node.entries[slot].clone();
        let mut pending = Vec::new();
        match removed.subnode {
            None => {
                node.entries.remove(slot);
                self.save(current, node)?;
                self.release_empty(path, current, &mut pending)?;
            }
            Some(child) => {
                // Replace with the in-order predecessor: the last entry of
                // the rightmost leaf under `child`.
                path.push((current, slot));
                let mut leaf_ref = NodeRef::Page(child);
                let mut leaf = self.store.read_page(child)?;
                while let Some(next) = leaf.end_subnode {
                    path.push((leaf_ref, leaf.entries.len()));
                    leaf_ref = NodeRef::Page(next);
                    leaf = self.store.read_page(next)?;
                }
                let mut predecessor = leaf.entries.pop().ok_or_else(|| {
                    NtfsError::corrupt("index", "empty leaf under an interior entry")
                })?;
                self.save(leaf_ref, leaf)?;
                predecessor.subnode = Some(child);
                node.entries[slot] = predecessor;
                self.save(current, node)?;
                self.release_empty(path, leaf_ref, &mut pending)?;
            }
        }

        for orphan in pending {
            trace!(target: "fntfs::index", reference = %orphan.file_reference, "reinserting orphaned entry");
            self.insert_entry(orphan)?;
        }
        removed.subnode = None;
        Ok(removed)
    }

    /// Free pages left empty (or with only a sentinel child) from `current`
    /// upward, then fold the root back into resident form when possible.
    /// Entries whose subtree disappeared are queued on `pending` for
    /// reinsertion.
    fn release_empty(
        &mut self,
        mut path: Vec<(NodeRef, usize)>,
        mut current: NodeRef,
        pending: &mut Vec<IndexEntry>,
    ) -> Result<()> {
        while let NodeRef::Page(vbn) = current {
            let node = self.store.read_page(vbn)?;
            if !node.entries.is_empty() {
                break;
            }
            let (parent, slot) = path
                .pop()
                .ok_or_else(|| NtfsError::internal("index page has no parent"))?;
            self.store.free_page(vbn)?;
            record_page_free();
            trace!(target: "fntfs::index", vbn, "freed index page");
            let mut parent_node = self.load(parent)?;
            if let Some(child) = node.end_subnode {
                // Only a sentinel child left: splice it into the parent.
                parent_node.set_child(slot, Some(child));
                self.save(parent, parent_node)?;
                current = parent;
                continue;
            }
            if slot < parent_node.entries.len() {
                let mut orphan = parent_node.entries.remove(slot);
                orphan.subnode = None;
                pending.push(orphan);
            } else if let Some(mut last) = parent_node.entries.pop() {
                parent_node.end_subnode = last.subnode.take();
                pending.push(last);
            } else {
                parent_node.end_subnode = None;
            }
            self.save(parent, parent_node)?;
            current = parent;
        }
        if current == NodeRef::Root {
            self.collapse_root()?;
        }
        Ok(())
    }

    /// Pull a sole child back into the root while it fits.
    fn collapse_root(&mut self) -> Result<()> {
        while self.root.node.entries.is_empty() {
            let Some(child) = self.root.node.end_subnode else {
                break;
            };
            let node = self.store.read_page(child)?;
            if node.entries_len() > self.root_capacity {
                break;
            }
            self.store.free_page(child)?;
            record_page_free();
            record_root_collapse();
            debug!(target: "fntfs::index", vbn = child, entries = node.entries.len(), "collapsed index page into root");
            self.root.node = node;
        }
        Ok(())
    }
}

/// Split `node` around a byte-weighted median. `node` keeps the upper half;
/// the lower half and the median are returned.
fn split_node(node: &mut IndexNode) -> Result<(IndexNode, IndexEntry)> {
    let count = node.entries.len();
    if count < 3 {
        return Err(NtfsError::out_of_space(format!(
            "index page cannot be split with {count} entries"
        )));
    }
    let total: usize = node.entries.iter().map(IndexEntry::encoded_len).sum();
    let mut running = 0;
    let mut median = count / 2;
    for (index, entry) in node.entries.iter().enumerate() {
        running += entry.encoded_len();
        if running * 2 >= total {
            median = index;
            break;
        }
    }
    let median = median.clamp(1, count - 2);
    let mut upper = node.entries.split_off(median);
    let lower = std::mem::take(&mut node.entries);
    let promoted = upper.remove(0);
    node.entries = upper;
    let left = IndexNode {
        entries: lower,
        end_subnode: promoted.subnode,
    };
    Ok((left, promoted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::CollationRule;
    use crate::store::MemoryPageStore;
    use fntfs_record::{FileAttributes, FileNameAttribute};
    use fntfs_types::{NtTime, SegmentReference};

    fn name_entry(name: &str, segment: u64) -> IndexEntry {
        let file_name = FileNameAttribute::new(
            SegmentReference::new(5, 5),
            name,
            FileAttributes::ARCHIVE,
            NtTime(0),
        );
        IndexEntry::for_file_name(SegmentReference::new(segment, 1), &file_name).unwrap()
    }

    fn key(name: &str) -> Vec<u8> {
        name_entry(name, 0).key
    }

    fn names(tree: &IndexTree<'_, MemoryPageStore>) -> Vec<String> {
        tree.traverse()
            .unwrap()
            .iter()
            .map(|entry| entry.file_name().unwrap().name)
            .collect()
    }

    #[test]
    fn test_small_index_insert_lookup_delete() {
        let mut root = IndexRoot::new(0x30, CollationRule::Filename, 1024, -10);
        let mut store = MemoryPageStore::new(1024, 2);
        let mut tree = IndexTree::new(&mut root, &mut store, UpcaseTable::shared(), 4096).unwrap();
        for (i, name) in ["delta", "Alpha", "charlie", "bravo"].iter().enumerate() {
            tree.insert(name_entry(name, 16 + i as u64)).unwrap();
        }
        assert_eq!(names(&tree), ["Alpha", "bravo", "charlie", "delta"]);
        assert_eq!(tree.lookup(&key("charlie")).unwrap().file_reference.segment_number(), 18);
        assert!(matches!(tree.lookup(&key("echo")), Err(NtfsError::NotFound(_))));
        assert!(tree.lookup_ignore_case(&key("ALPHA")).unwrap().is_some());
        assert!(matches!(
            tree.insert(name_entry("bravo", 99)),
            Err(NtfsError::AlreadyExists(_))
        ));
        tree.delete(&key("bravo")).unwrap();
        assert_eq!(names(&tree), ["Alpha", "charlie", "delta"]);
        assert!(!tree.root().is_large());
    }

    #[test]
    fn test_root_promotion_split_and_collapse() {
        let mut root = IndexRoot::new(0x30, CollationRule::Filename, 1024, -10);
        let mut store = MemoryPageStore::new(1024, 2);
        {
            let mut tree =
                IndexTree::new(&mut root, &mut store, UpcaseTable::shared(), 400).unwrap();
            for i in 0..200 {
                tree.insert(name_entry(&format!("file{i:04}"), 16 + i)).unwrap();
            }
            assert!(tree.root().is_large(), "case=root_promoted");
            assert_eq!(tree.verify().unwrap(), 200);
            let listed = names(&tree);
            let mut sorted = listed.clone();
            sorted.sort();
            assert_eq!(listed, sorted);
            assert_eq!(listed.len(), 200);

            for i in (0..200).rev() {
                tree.delete(&key(&format!("file{i:04}"))).unwrap();
                if i % 37 == 0 {
                    assert_eq!(tree.verify().unwrap(), i as usize);
                }
            }
            assert!(tree.is_empty());
            assert!(!tree.root().is_large(), "case=root_collapsed");
        }
        assert_eq!(store.live_pages(), 0, "case=all_pages_freed");
    }

    #[test]
    fn test_split_keeps_upper_half_in_place() {
        let mut node = IndexNode {
            entries: (0..6_u64)
                .map(|i| IndexEntry::new(SegmentReference::new(i, 1), vec![i as u8; 8]))
                .collect(),
            end_subnode: None,
        };
        let (left, median) = split_node(&mut node).unwrap();
        assert_eq!(left.entries.len(), 2);
        assert_eq!(median.key, vec![2; 8]);
        assert_eq!(node.entries.len(), 3);
        assert_eq!(node.entries[0].key, vec![3; 8]);
    }

    #[test]
    fn test_tiny_root_capacity_rejected() {
        let mut root = IndexRoot::new(0x30, CollationRule::Filename, 1024, -10);
        let mut store = MemoryPageStore::new(1024, 2);
        assert!(IndexTree::new(&mut root, &mut store, UpcaseTable::shared(), 8).is_err());
    }
}
