//! Directory indexes backed by metadata pages.
//!
//! A directory's `$I30` index lives in three attributes of its file
//! record: the resident `$INDEX_ROOT`, the non-resident
//! `$INDEX_ALLOCATION` holding INDX pages, and a resident `$BITMAP` with one
//! bit per page slot. [`DirectoryIndex`] moves those in and out of a
//! [`FileRecord`]; [`TxnPageStore`] gives the B+tree page access through a
//! running transaction, so every page write is logged.

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_index::{
    CollationRule, IndexEntry, IndexNode, IndexPageStore, IndexRecordPage, IndexRoot, IndexTree,
    page_capacity,
};
use fntfs_pager::{ImageKind, PageTarget};
use fntfs_record::{
    AttributeRecord, AttributeType, DataRunSequence, FileAttributes, FileNameAttribute, FileRecord,
    FileRecordSegment,
};
use fntfs_types::{NtTime, SegmentReference, UpcaseTable, VolumeGeometry};
use tracing::trace;

use crate::meta::{MetaView, MetadataTxn, attribute_target, set_non_resident};

/// Name of the file name index.
pub(crate) const I30: &str = "$I30";

/// Smallest root the tree accepts.
const MIN_ROOT_CAPACITY: usize = 0x18;
/// Attribute header, `$I30` name, root header and node header.
const ROOT_ATTRIBUTE_OVERHEAD: usize = 0x40;
/// Room kept free for `$INDEX_ALLOCATION` and `$BITMAP` until they exist.
const ALLOCATION_RESERVE: usize = 0x80;

/// VBN granularity: clusters, or 512-byte blocks below one cluster.
const fn vbn_unit(geometry: VolumeGeometry) -> u64 {
    if geometry.bytes_per_index_record as u64 >= geometry.cluster_size() {
        geometry.cluster_size()
    } else {
        512
    }
}

/// Empty `$I30` root for a new directory.
pub(crate) fn empty_root(geometry: VolumeGeometry) -> IndexRoot {
    IndexRoot::new(
        AttributeType::FileName.code(),
        CollationRule::Filename,
        geometry.bytes_per_index_record,
        geometry.encode_record_size(geometry.bytes_per_index_record),
    )
}

/// Index key matching `name` under file name collation.
pub(crate) fn name_key(name: &str) -> Result<Vec<u8>> {
    FileNameAttribute::new(SegmentReference::NULL, name, FileAttributes::empty(), NtTime(0))
        .serialize()
}

// ---------------------------------------------------------------------------
// Attributes of the index
// ---------------------------------------------------------------------------

/// `$INDEX_ALLOCATION` extent plus its slot bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IndexAllocation {
    pub runs: DataRunSequence,
    /// Bytes of `$INDEX_ALLOCATION`, a whole number of clusters.
    pub length: u64,
    pub bitmap: Vec<u8>,
}

impl IndexAllocation {
    const fn slots(&self, geometry: VolumeGeometry) -> u64 {
        self.length / geometry.bytes_per_index_record as u64
    }

    fn slot_in_use(&self, slot: u64) -> bool {
        self.bitmap
            .get((slot / 8) as usize)
            .is_some_and(|byte| byte & (1 << (slot % 8)) != 0)
    }

    fn set_slot(&mut self, slot: u64, used: bool) {
        let byte = (slot / 8) as usize;
        if self.bitmap.len() <= byte {
            self.bitmap.resize(byte + 1, 0);
        }
        if used {
            self.bitmap[byte] |= 1 << (slot % 8);
        } else {
            self.bitmap[byte] &= !(1 << (slot % 8));
        }
    }

    fn slot_of(vbn: u64, geometry: VolumeGeometry) -> u64 {
        vbn * vbn_unit(geometry) / u64::from(geometry.bytes_per_index_record)
    }

    fn target(&self, vbn: u64, geometry: VolumeGeometry, attribute: u16) -> Result<PageTarget> {
        let record = u64::from(geometry.bytes_per_index_record);
        let offset = vbn * vbn_unit(geometry);
        if offset + record > self.length {
            return Err(NtfsError::corrupt(
                "index allocation",
                format!("vbn {vbn} beyond {} allocated bytes", self.length),
            ));
        }
        attribute_target(&self.runs, geometry.bytes_per_cluster(), attribute, offset, record as usize)
    }

    fn read_node<D: SectorDevice + ?Sized>(&self, view: &MetaView<'_, D>, vbn: u64) -> Result<IndexNode> {
        let geometry = view.geometry();
        if !self.slot_in_use(Self::slot_of(vbn, geometry)) {
            return Err(NtfsError::corrupt(
                "index allocation",
                format!("vbn {vbn} is referenced but marked free"),
            ));
        }
        let raw = view.read(&self.target(vbn, geometry, 0)?)?;
        Ok(IndexRecordPage::decode(&raw, vbn)?.node)
    }
}

/// The `$I30` index of one directory record.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryIndex {
    pub root: IndexRoot,
    pub allocation: IndexAllocation,
}

impl DirectoryIndex {
    pub(crate) fn load(record: &FileRecord) -> Result<Self> {
        if !record.is_directory() {
            return Err(NtfsError::NotDirectory);
        }
        let root_attribute = record
            .find_attribute(AttributeType::IndexRoot, I30)
            .ok_or_else(|| {
                NtfsError::corrupt(
                    "directory",
                    format!("{} has no $I30 index root", record.reference()),
                )
            })?;
        let root = IndexRoot::parse(root_attribute.resident_data()?)?;
        let allocation = match record.find_attribute(AttributeType::IndexAllocation, I30) {
            Some(attribute) => IndexAllocation {
                runs: record.joined_runs(AttributeType::IndexAllocation, I30)?,
                length: attribute.data_length(),
                bitmap: record
                    .find_attribute(AttributeType::Bitmap, I30)
                    .map(|bitmap| bitmap.resident_data().map(<[u8]>::to_vec))
                    .transpose()?
                    .unwrap_or_default(),
            },
            None => IndexAllocation::default(),
        };
        Ok(Self { root, allocation })
    }

    /// Write the root, allocation and bitmap back into `record`.
    pub(crate) fn store(&self, record: &mut FileRecord, cluster_size: u64) -> Result<()> {
        let root = self.root.serialize()?;
        match record.find_attribute_mut(AttributeType::IndexRoot, I30) {
            Some(attribute) => attribute.set_resident_data(root)?,
            None => {
                record.add_attribute(AttributeRecord::resident(AttributeType::IndexRoot, I30, root));
            }
        }
        if self.allocation.length == 0 {
            return Ok(());
        }
        set_non_resident(
            record,
            AttributeType::IndexAllocation,
            I30,
            &self.allocation.runs,
            self.allocation.length,
            cluster_size,
        )?;
        let mut bitmap = self.allocation.bitmap.clone();
        bitmap.resize(bitmap.len().div_ceil(8).max(1) * 8, 0);
        match record.find_attribute_mut(AttributeType::Bitmap, I30) {
            Some(attribute) => attribute.set_resident_data(bitmap)?,
            None => {
                record.add_attribute(AttributeRecord::resident(AttributeType::Bitmap, I30, bitmap));
            }
        }
        Ok(())
    }
}

/// Entry bytes the resident root may hold inside `record`.
pub(crate) fn root_capacity(record: &FileRecord, has_allocation: bool) -> usize {
    let bytes = record.bytes_per_segment() as usize;
    let header = FileRecordSegment::new(0, 0, record.bytes_per_segment(), record.minor_version())
        .first_attribute_offset();
    let others: usize = record
        .attributes()
        .iter()
        .filter(|attr| !(attr.attribute_type == AttributeType::IndexRoot && attr.name == I30))
        .map(|attr| attr.serialized_length() as usize)
        .sum();
    let reserve = if has_allocation { 0 } else { ALLOCATION_RESERVE };
    bytes
        .saturating_sub(header + 8 + others + ROOT_ATTRIBUTE_OVERHEAD + reserve)
        .max(MIN_ROOT_CAPACITY)
}

// ---------------------------------------------------------------------------
// Page stores
// ---------------------------------------------------------------------------

/// Index pages read and written through a metadata transaction.
pub(crate) struct TxnPageStore<'t, 'v, D: SectorDevice + ?Sized> {
    meta: &'t mut MetadataTxn<'v, D>,
    allocation: &'t mut IndexAllocation,
    owner: SegmentReference,
}

impl<D: SectorDevice + ?Sized> TxnPageStore<'_, '_, D> {
    fn extend(&mut self) -> Result<u64> {
        let geometry = self.meta.geometry();
        let cluster = geometry.cluster_size();
        let clusters = u64::from(geometry.bytes_per_index_record).div_ceil(cluster);
        let first_slot = self.allocation.slots(geometry);
        let runs = self.meta.allocate_clusters(clusters)?;
        for run in runs.runs() {
            self.allocation.runs.push(*run);
        }
        self.allocation.length += clusters * cluster;
        trace!(
            target: "fntfs::index",
            directory = %self.owner,
            bytes = self.allocation.length,
            "extended index allocation"
        );
        Ok(first_slot)
    }
}

impl<D: SectorDevice + ?Sized> IndexPageStore for TxnPageStore<'_, '_, D> {
    fn page_capacity(&self) -> usize {
        page_capacity(self.meta.geometry().bytes_per_index_record as usize)
    }

    fn read_page(&self, vbn: u64) -> Result<IndexNode> {
        self.allocation.read_node(&self.meta.view(), vbn)
    }

    fn write_page(&mut self, vbn: u64, node: &IndexNode) -> Result<()> {
        let geometry = self.meta.geometry();
        let record = geometry.bytes_per_index_record;
        let attribute = self
            .meta
            .attribute(self.owner, AttributeType::IndexAllocation, record)?;
        let target = self.allocation.target(vbn, geometry, attribute)?;
        let previous = self.meta.view().read(&target)?;
        let mut page = IndexRecordPage::new(vbn, node.clone());
        page.update_sequence_number =
            IndexRecordPage::decode(&previous, vbn).map_or(1, |old| old.update_sequence_number);
        let image = page.encode(record as usize)?;
        self.meta.stage(&target, &image, ImageKind::Buffer)
    }

    fn allocate_page(&mut self) -> Result<u64> {
        let geometry = self.meta.geometry();
        let free = (0..self.allocation.slots(geometry)).find(|slot| !self.allocation.slot_in_use(*slot));
        let slot = match free {
            Some(slot) => slot,
            None => self.extend()?,
        };
        self.allocation.set_slot(slot, true);
        Ok(slot * u64::from(geometry.bytes_per_index_record) / vbn_unit(geometry))
    }

    fn free_page(&mut self, vbn: u64) -> Result<()> {
        let slot = IndexAllocation::slot_of(vbn, self.meta.geometry());
        if !self.allocation.slot_in_use(slot) {
            return Err(NtfsError::internal(format!("freeing unallocated index vbn {vbn}")));
        }
        self.allocation.set_slot(slot, false);
        Ok(())
    }
}

/// Read-only page access for lookups outside a transaction.
struct ViewPageStore<'b, 'a, D: SectorDevice + ?Sized> {
    view: &'b MetaView<'a, D>,
    allocation: &'b IndexAllocation,
}

impl<D: SectorDevice + ?Sized> IndexPageStore for ViewPageStore<'_, '_, D> {
    fn page_capacity(&self) -> usize {
        page_capacity(self.view.geometry().bytes_per_index_record as usize)
    }

    fn read_page(&self, vbn: u64) -> Result<IndexNode> {
        self.allocation.read_node(self.view, vbn)
    }

    fn write_page(&mut self, vbn: u64, _node: &IndexNode) -> Result<()> {
        Err(NtfsError::internal(format!("write to index vbn {vbn} through a read view")))
    }

    fn allocate_page(&mut self) -> Result<u64> {
        Err(NtfsError::internal("index page allocation through a read view"))
    }

    fn free_page(&mut self, vbn: u64) -> Result<()> {
        Err(NtfsError::internal(format!("free of index vbn {vbn} through a read view")))
    }
}

// ---------------------------------------------------------------------------
// Directory operations
// ---------------------------------------------------------------------------

fn with_read_tree<D, T>(
    view: &MetaView<'_, D>,
    directory: &FileRecord,
    f: impl FnOnce(&IndexTree<'_, ViewPageStore<'_, '_, D>>) -> Result<T>,
) -> Result<T>
where
    D: SectorDevice + ?Sized,
{
    let DirectoryIndex {
        mut root,
        allocation,
    } = DirectoryIndex::load(directory)?;
    let mut store = ViewPageStore {
        view,
        allocation: &allocation,
    };
    let tree = IndexTree::new(&mut root, &mut store, UpcaseTable::shared(), MIN_ROOT_CAPACITY)?;
    f(&tree)
}

/// Entry for `name`, compared ignoring case.
pub(crate) fn find_name<D: SectorDevice + ?Sized>(
    view: &MetaView<'_, D>,
    directory: &FileRecord,
    name: &str,
) -> Result<Option<IndexEntry>> {
    let key = name_key(name)?;
    with_read_tree(view, directory, |tree| tree.lookup_ignore_case(&key))
}

/// Every entry in collation order.
pub(crate) fn list_entries<D: SectorDevice + ?Sized>(
    view: &MetaView<'_, D>,
    directory: &FileRecord,
) -> Result<Vec<IndexEntry>> {
    with_read_tree(view, directory, |tree| tree.traverse())
}

/// Structural check of the whole index; returns the entry count.
pub(crate) fn verify_index<D: SectorDevice + ?Sized>(
    view: &MetaView<'_, D>,
    directory: &FileRecord,
) -> Result<usize> {
    with_read_tree(view, directory, |tree| tree.verify())
}

/// Run `f` against a writable tree, then store the index back into
/// `directory` and stage the record.
fn with_write_tree<D, T>(
    meta: &mut MetadataTxn<'_, D>,
    directory: &mut FileRecord,
    f: impl FnOnce(&mut IndexTree<'_, TxnPageStore<'_, '_, D>>) -> Result<T>,
) -> Result<T>
where
    D: SectorDevice + ?Sized,
{
    let mut index = DirectoryIndex::load(directory)?;
    let capacity = root_capacity(directory, index.allocation.length > 0);
    let owner = directory.reference();
    let value = {
        let mut store = TxnPageStore {
            meta: &mut *meta,
            allocation: &mut index.allocation,
            owner,
        };
        let mut tree = IndexTree::new(&mut index.root, &mut store, UpcaseTable::shared(), capacity)?;
        f(&mut tree)?
    };
    index.store(directory, meta.geometry().cluster_size())?;
    meta.write_record(directory)?;
    Ok(value)
}

pub(crate) fn insert_entry<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    directory: &mut FileRecord,
    entry: IndexEntry,
) -> Result<()> {
    with_write_tree(meta, directory, |tree| tree.insert(entry))
}

/// Remove the entry whose name collates equal to `name`.
pub(crate) fn remove_entry<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    directory: &mut FileRecord,
    name: &str,
) -> Result<IndexEntry> {
    let key = name_key(name)?;
    with_write_tree(meta, directory, |tree| tree.delete(&key))
}
