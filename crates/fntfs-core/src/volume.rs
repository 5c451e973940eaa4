//! The mounted volume and its file operations.
//!
//! [`Volume`] owns the device, the pager with its log, and the in-memory
//! space map. Every mutating call runs as one metadata transaction under the
//! device's exclusive lock: it commits as a whole or leaves the committed
//! state untouched. Read calls see committed state only.

use std::sync::Arc;

use fntfs_device::{ExclusiveGuard, SectorDevice};
use fntfs_error::{NtfsError, Result};
use fntfs_index::{IndexEntry, index_metrics_snapshot};
use fntfs_log::{LogFile, analyze};
use fntfs_pager::{MetadataPager, replay};
use fntfs_record::{
    AttributeRecord, AttributeType, DataRun, DataRunSequence, FileAttributes, FileNameAttribute,
    FileRecord, FileRecordSegment, SegmentFlags, StandardInformation,
};
use fntfs_types::{Lsn, NtTime, SegmentReference, SystemSegment, VolumeGeometry, read_utf16le, utf16_units};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::boot::BootSector;
use crate::config::{FormatOptions, MountOptions};
use crate::format::{log_region, write_volume};
use crate::index_store::{self, DirectoryIndex, I30, IndexAllocation, empty_root};
use crate::log_adapter::LogAdapter;
use crate::meta::{BitmapKind, MetaView, MetadataTxn, Pager, SpaceMap, attribute_target};
use crate::stats::VolumeStatistics;
use crate::stream;

/// Longest file name, in UTF-16 units.
const MAX_NAME_UNITS: usize = 255;
/// Bound on parent hops when walking towards the root.
const MAX_DEPTH: usize = 4096;

/// What mount-time recovery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecoverySummary {
    pub transactions_redone: usize,
    pub transactions_discarded: usize,
    pub records_applied: usize,
    pub pages_touched: usize,
}

/// One `list_directory` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub reference: SegmentReference,
    pub name: FileNameAttribute,
}

pub struct Volume<D: SectorDevice + ?Sized> {
    device: Arc<D>,
    boot: BootSector,
    pager: Pager<D>,
    space: SpaceMap,
    minor_version: u8,
    mft_growth_segments: u64,
    /// Set when a commit failed part way; only a fresh mount (and its
    /// recovery) can tell what reached the device.
    needs_remount: bool,
    recovery: RecoverySummary,
}

impl<D: SectorDevice + ?Sized> std::fmt::Debug for Volume<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("boot", &self.boot)
            .field("mft_segments", &self.space.mft_segments)
            .field("total_clusters", &self.space.total_clusters)
            .field("minor_version", &self.minor_version)
            .field("needs_remount", &self.needs_remount)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(NtfsError::InvalidArgument(format!("invalid file name {name:?}")));
    }
    if utf16_units(name) > MAX_NAME_UNITS {
        return Err(NtfsError::InvalidArgument(format!(
            "file name longer than {MAX_NAME_UNITS} characters"
        )));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(NtfsError::InvalidArgument(format!(
            "file name {name:?} contains a separator or NUL"
        )));
    }
    Ok(())
}

fn ensure_user_file(reference: SegmentReference) -> Result<()> {
    if reference.segment_number() < SystemSegment::FIRST_USER_SEGMENT {
        return Err(NtfsError::InvalidArgument(format!(
            "{reference} is a system file"
        )));
    }
    Ok(())
}

/// Attributes only the volume itself may change.
fn is_protected(attribute: &AttributeRecord) -> bool {
    match attribute.attribute_type {
        AttributeType::FileName | AttributeType::AttributeList => true,
        AttributeType::Data => attribute.name.is_empty(),
        AttributeType::IndexRoot | AttributeType::IndexAllocation | AttributeType::Bitmap => {
            attribute.name == I30
        }
        _ => false,
    }
}

/// Attributes a plain record update must leave exactly as they are.
fn is_fixed(attribute: &AttributeRecord) -> bool {
    is_protected(attribute) || !attribute.is_resident()
}

// ---------------------------------------------------------------------------
// Mount helpers
// ---------------------------------------------------------------------------

fn read_boot_sector<D: SectorDevice + ?Sized>(device: &D) -> Result<BootSector> {
    let raw = device.read_bytes(0, device.bytes_per_sector() as usize)?;
    let boot = BootSector::parse(&raw)?;
    if boot.geometry.bytes_per_sector != device.bytes_per_sector() {
        return Err(NtfsError::corrupt(
            "boot sector",
            format!(
                "{}-byte sectors on a {}-byte sector device",
                boot.geometry.bytes_per_sector,
                device.bytes_per_sector()
            ),
        ));
    }
    if boot.total_sectors > device.total_sectors() {
        return Err(NtfsError::corrupt(
            "boot sector",
            format!(
                "{} sectors on a device of {}",
                boot.total_sectors,
                device.total_sectors()
            ),
        ));
    }
    Ok(boot)
}

/// Read a system file record straight from the device, bypassing the pager.
fn read_system_record<D: SectorDevice + ?Sized>(
    device: &D,
    geometry: VolumeGeometry,
    mft_runs: &DataRunSequence,
    system: SystemSegment,
) -> Result<FileRecord> {
    let number = system.segment_number();
    let frs = geometry.bytes_per_file_record_segment;
    let target = attribute_target(
        mft_runs,
        geometry.bytes_per_cluster(),
        0,
        number * u64::from(frs),
        frs as usize,
    )?;
    let raw = target.read(device, geometry.bytes_per_cluster())?;
    let segment = FileRecordSegment::decode(&raw, number)?;
    if !segment.is_in_use() || segment.reference() != system.reference() {
        return Err(NtfsError::corrupt(
            system.name(),
            format!("segment {number} does not hold {}", system.name()),
        ));
    }
    FileRecord::parse(&[segment])
}

fn load_space_map<D: SectorDevice + ?Sized>(
    device: &D,
    geometry: VolumeGeometry,
    mft: &FileRecord,
    total_clusters: u64,
) -> Result<SpaceMap> {
    let cluster = geometry.cluster_size();
    let frs = u64::from(geometry.bytes_per_file_record_segment);
    let mft_runs = mft.joined_runs(AttributeType::Data, "")?;
    let mft_segments = mft.data_length() / frs;
    let mft_bitmap_runs = mft.joined_runs(AttributeType::Bitmap, "")?;
    let bitmap = read_system_record(device, geometry, &mft_runs, SystemSegment::Bitmap)?;
    let cluster_bitmap_runs = bitmap.joined_runs(AttributeType::Data, "")?;
    if mft_segments < SystemSegment::FIRST_USER_SEGMENT
        || mft_runs.cluster_count() * cluster < mft_segments * frs
    {
        return Err(NtfsError::corrupt(
            "$MFT",
            format!(
                "{mft_segments} segments over {} clusters",
                mft_runs.cluster_count()
            ),
        ));
    }
    if mft_bitmap_runs.cluster_count() * cluster * 8 < mft_segments {
        return Err(NtfsError::corrupt(
            "$MFT",
            format!("bitmap too small for {mft_segments} segments"),
        ));
    }
    if cluster_bitmap_runs.cluster_count() * cluster * 8 < total_clusters {
        return Err(NtfsError::corrupt(
            "$Bitmap",
            format!("bitmap too small for {total_clusters} clusters"),
        ));
    }
    Ok(SpaceMap {
        mft_runs,
        mft_segments,
        mft_bitmap_runs,
        cluster_bitmap_runs,
        total_clusters,
        segment_hint: SystemSegment::FIRST_USER_SEGMENT,
        cluster_hint: 0,
    })
}

impl<D: SectorDevice + ?Sized> Volume<D> {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Write an empty volume onto `device` and mount it.
    pub fn format(device: Arc<D>, options: &FormatOptions) -> Result<Self> {
        {
            let _guard = ExclusiveGuard::acquire(&*device)?;
            write_volume(&device, options)?;
        }
        let mount = MountOptions {
            mft_growth_segments: options.mft_growth_segments,
            ..MountOptions::default()
        };
        Self::open(device, &mount)
    }

    /// Mount an existing volume, running log recovery first.
    pub fn open(device: Arc<D>, options: &MountOptions) -> Result<Self> {
        options.validate()?;
        let guard = ExclusiveGuard::acquire(&*device)?;
        let boot = read_boot_sector(&*device)?;
        let geometry = boot.geometry;
        let cluster = geometry.cluster_size();
        let bootstrap = DataRunSequence::from_runs(vec![DataRun::new(
            u64::from(geometry.bytes_per_file_record_segment).div_ceil(cluster),
            boot.mft_lcn,
        )])?;

        // The log never moves, so it can be located before recovery.
        let mft = read_system_record(&*device, geometry, &bootstrap, SystemSegment::Mft)?;
        let mft_runs = mft.joined_runs(AttributeType::Data, "")?;
        let log_record = read_system_record(&*device, geometry, &mft_runs, SystemSegment::LogFile)?;
        let region = log_region(&log_record.joined_runs(AttributeType::Data, "")?, cluster)?;
        let (mut log, scan) = LogFile::open(Arc::clone(&device), region)?;

        let plan = analyze(&scan, options.recovery)?;
        let mut recovery = RecoverySummary {
            transactions_discarded: plan.transactions_discarded,
            ..RecoverySummary::default()
        };
        if !scan.records.is_empty() {
            let replayed = replay(&*device, geometry.bytes_per_cluster(), &plan.redo)?;
            log.finish_recovery(&plan)?;
            recovery.transactions_redone = plan.transactions_redone;
            recovery.records_applied = replayed.records_applied;
            recovery.pages_touched = replayed.pages_touched;
        }

        let mft = read_system_record(&*device, geometry, &bootstrap, SystemSegment::Mft)?;
        let space = load_space_map(&*device, geometry, &mft, boot.total_clusters())?;
        let minor_version = mft.minor_version();
        drop(guard);

        let pager = MetadataPager::new(
            Arc::clone(&device),
            LogAdapter::new(log, options.checkpoint_threshold_pages),
            geometry.bytes_per_cluster(),
            options.cache_pages,
        );
        let volume = Self {
            device,
            boot,
            pager,
            space,
            minor_version,
            mft_growth_segments: options.mft_growth_segments,
            needs_remount: false,
            recovery,
        };
        if !volume.get_file_record(volume.root())?.is_directory() {
            return Err(NtfsError::corrupt("root directory", "segment 5 is not a directory"));
        }
        info!(
            target: "fntfs::volume",
            mft_segments = volume.space.mft_segments,
            total_clusters = volume.space.total_clusters,
            transactions_redone = recovery.transactions_redone,
            "volume mounted"
        );
        Ok(volume)
    }

    /// Checkpoint the log so the next mount has nothing to redo.
    pub fn close(mut self) -> Result<()> {
        if self.needs_remount {
            return Ok(());
        }
        self.checkpoint()?;
        info!(target: "fntfs::volume", "volume closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn root(&self) -> SegmentReference {
        SystemSegment::RootDirectory.reference()
    }

    #[must_use]
    pub const fn geometry(&self) -> VolumeGeometry {
        self.boot.geometry
    }

    #[must_use]
    pub const fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[must_use]
    pub const fn recovery(&self) -> RecoverySummary {
        self.recovery
    }

    pub fn label(&self) -> Result<String> {
        let record = self.get_file_record(SystemSegment::Volume.reference())?;
        match record.find_attribute(AttributeType::VolumeName, "") {
            Some(attribute) => {
                let data = attribute.resident_data()?;
                read_utf16le(data, 0, data.len() / 2)
            }
            None => Ok(String::new()),
        }
    }

    fn view(&self) -> MetaView<'_, D> {
        MetaView::committed(&self.pager, &self.space, self.boot.geometry)
    }

    /// Run `body` as one transaction under the device lock.
    fn transact<T>(
        &mut self,
        operation: &'static str,
        body: impl FnOnce(&mut MetadataTxn<'_, D>) -> Result<T>,
    ) -> Result<T> {
        if self.needs_remount {
            return Err(NtfsError::internal(
                "an earlier commit failed; remount the volume to recover",
            ));
        }
        let device = Arc::clone(&self.device);
        let _guard = ExclusiveGuard::acquire(&*device)?;
        let saved = self.space.clone();
        let mut meta = MetadataTxn::begin(
            &mut self.pager,
            &mut self.space,
            self.boot.geometry,
            self.minor_version,
            self.mft_growth_segments,
        )?;
        let result = match body(&mut meta) {
            Ok(value) => match meta.commit() {
                Ok(lsn) => {
                    debug!(target: "fntfs::volume", operation, lsn = ?lsn, "committed");
                    Ok(value)
                }
                Err(err) => {
                    error!(target: "fntfs::volume", operation, error = %err, "commit failed");
                    self.needs_remount = true;
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback) = meta.rollback() {
                    warn!(target: "fntfs::volume", operation, error = %rollback, "rollback failed");
                }
                debug!(target: "fntfs::volume", operation, error = %err, "rolled back");
                Err(err)
            }
        };
        if result.is_err() {
            self.space = saved;
            self.pager.clear_cache();
        }
        result
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The record `reference` names; a reference whose sequence number no
    /// longer matches the segment is `NotFound`.
    pub fn get_file_record(&self, reference: SegmentReference) -> Result<FileRecord> {
        self.view().read_record(reference)
    }

    /// Resolve a `/`-separated path from the root, ignoring case.
    pub fn get_file_record_by_path(&self, path: &str) -> Result<FileRecord> {
        let view = self.view();
        let mut current = view.read_record(self.root())?;
        for component in path.split('/').filter(|part| !part.is_empty()) {
            if !current.is_directory() {
                return Err(NtfsError::NotDirectory);
            }
            current = match component {
                "." => continue,
                ".." => {
                    let parent = current
                        .file_name()?
                        .map_or_else(|| self.root(), |name| name.parent);
                    view.read_record(parent)?
                }
                name => {
                    let entry = index_store::find_name(&view, &current, name)?.ok_or_else(|| {
                        NtfsError::NotFound(format!("{path}: no entry named {name:?}"))
                    })?;
                    view.read_record(entry.file_reference)?
                }
            };
        }
        Ok(current)
    }

    /// Entries of a directory in collation order.
    pub fn list_directory(&self, reference: SegmentReference) -> Result<Vec<DirectoryEntry>> {
        let view = self.view();
        let directory = view.read_record(reference)?;
        index_store::list_entries(&view, &directory)?
            .into_iter()
            .map(|entry| {
                Ok(DirectoryEntry {
                    reference: entry.file_reference,
                    name: entry.file_name()?,
                })
            })
            .collect()
    }

    /// Check a directory index's ordering and balance; returns its entry
    /// count.
    pub fn verify_directory(&self, reference: SegmentReference) -> Result<usize> {
        let view = self.view();
        let directory = view.read_record(reference)?;
        index_store::verify_index(&view, &directory)
    }

    // -----------------------------------------------------------------------
    // Namespace changes
    // -----------------------------------------------------------------------

    /// Create an empty file or directory named `name` in `parent`.
    pub fn create_file(
        &mut self,
        parent: SegmentReference,
        name: &str,
        is_directory: bool,
    ) -> Result<FileRecord> {
        validate_name(name)?;
        let record = self.transact("create_file", |meta| {
            let mut directory = meta.view().read_record(parent)?;
            if !directory.is_directory() {
                return Err(NtfsError::NotDirectory);
            }
            if let Some(existing) = index_store::find_name(&meta.view(), &directory, name)? {
                return Err(NtfsError::AlreadyExists(format!(
                    "{name:?} in {parent} already names {}",
                    existing.file_reference
                )));
            }
            let geometry = meta.geometry();
            let reference = meta.allocate_segment_reference()?;
            let now = NtTime::now();
            let mut record =
                FileRecord::new(reference, geometry.bytes_per_file_record_segment, meta.minor_version());
            record.set_hard_link_count(1);
            let file_name = if is_directory {
                record.set_flags(SegmentFlags::IN_USE | SegmentFlags::DIRECTORY);
                record.set_standard_information(&StandardInformation::new(now, FileAttributes::empty()))?;
                FileNameAttribute::new(parent, name, FileAttributes::DIRECTORY, now)
            } else {
                record.set_standard_information(&StandardInformation::new(now, FileAttributes::ARCHIVE))?;
                FileNameAttribute::new(parent, name, FileAttributes::ARCHIVE, now)
            };
            record.add_attribute(AttributeRecord::resident(
                AttributeType::FileName,
                "",
                file_name.serialize()?,
            ));
            if is_directory {
                let index = DirectoryIndex {
                    root: empty_root(geometry),
                    allocation: IndexAllocation::default(),
                };
                index.store(&mut record, geometry.cluster_size())?;
            } else {
                record.add_attribute(AttributeRecord::resident(AttributeType::Data, "", Vec::new()));
            }
            meta.write_record(&record)?;
            index_store::insert_entry(
                meta,
                &mut directory,
                IndexEntry::for_file_name(reference, &file_name)?,
            )?;
            meta.view().read_record(reference)
        })?;
        debug!(
            target: "fntfs::volume",
            parent = %parent,
            name,
            reference = %record.reference(),
            is_directory,
            "created file"
        );
        Ok(record)
    }

    /// Remove every name of `record` and free its segments and clusters.
    /// Directories must be empty.
    pub fn delete_file(&mut self, record: &FileRecord) -> Result<()> {
        let reference = record.reference();
        ensure_user_file(reference)?;
        let freed_index_pages = self.transact("delete_file", |meta| {
            let mut current = meta.view().read_record(reference)?;
            if current.is_directory() && !DirectoryIndex::load(&current)?.root.node.is_empty() {
                return Err(NtfsError::NotEmpty);
            }
            for name in current.file_names()? {
                let mut parent = meta.view().read_record(name.parent)?;
                let removed = index_store::remove_entry(meta, &mut parent, &name.name)?;
                if removed.file_reference != reference {
                    return Err(NtfsError::corrupt(
                        "directory",
                        format!(
                            "entry {:?} in {} names {}, not {reference}",
                            name.name, name.parent, removed.file_reference
                        ),
                    ));
                }
            }
            let freed_index_pages = current
                .find_attribute(AttributeType::IndexAllocation, I30)
                .is_some();
            // Every name is gone, so the freed base segment records no links.
            current.set_hard_link_count(0);
            meta.write_record(&current)?;
            meta.free_runs(&stream::owned_runs(&current)?)?;
            for extension in current.extension_references() {
                meta.free_segment(extension)?;
            }
            meta.free_segment(reference)?;
            Ok(freed_index_pages)
        })?;
        // Old page images of the index must not be redone onto clusters a
        // later file reuses.
        if freed_index_pages {
            self.checkpoint()?;
        }
        debug!(target: "fntfs::volume", reference = %reference, "deleted file");
        Ok(())
    }

    /// Move `record` into `new_parent` under `new_name`. A directory cannot
    /// move below itself.
    pub fn move_file(
        &mut self,
        record: &FileRecord,
        new_parent: SegmentReference,
        new_name: &str,
    ) -> Result<FileRecord> {
        validate_name(new_name)?;
        let reference = record.reference();
        ensure_user_file(reference)?;
        let root = self.root();
        let moved = self.transact("move_file", |meta| {
            let mut current = meta.view().read_record(reference)?;
            let names = current.file_names()?;
            let old = names.first().cloned().ok_or_else(|| {
                NtfsError::corrupt("file record", format!("{reference} has no file name"))
            })?;
            let target = meta.view().read_record(new_parent)?;
            if !target.is_directory() {
                return Err(NtfsError::NotDirectory);
            }
            if current.is_directory() {
                let mut ancestor = new_parent;
                let mut hops = 0;
                while ancestor != root {
                    if ancestor == reference {
                        return Err(NtfsError::InvalidArgument(format!(
                            "cannot move {reference} below itself"
                        )));
                    }
                    hops += 1;
                    if hops > MAX_DEPTH {
                        return Err(NtfsError::corrupt("directory", "parent chain does not reach the root"));
                    }
                    ancestor = meta
                        .view()
                        .read_record(ancestor)?
                        .file_name()?
                        .map_or(root, |name| name.parent);
                }
            }
            if let Some(existing) = index_store::find_name(&meta.view(), &target, new_name)? {
                if existing.file_reference != reference {
                    return Err(NtfsError::AlreadyExists(format!(
                        "{new_name:?} in {new_parent} already names {}",
                        existing.file_reference
                    )));
                }
            }
            for name in &names {
                let mut parent = meta.view().read_record(name.parent)?;
                index_store::remove_entry(meta, &mut parent, &name.name)?;
            }
            let now = NtTime::now();
            let file_name = FileNameAttribute {
                parent: new_parent,
                name: new_name.to_owned(),
                mft_changed: now,
                ..old
            };
            current.remove_attribute(AttributeType::FileName, "");
            current.add_attribute(AttributeRecord::resident(
                AttributeType::FileName,
                "",
                file_name.serialize()?,
            ));
            let mut info = current.standard_information()?;
            info.mft_changed = now;
            current.set_standard_information(&info)?;
            meta.write_record(&current)?;
            // Removing the old name may have rewritten the same directory.
            let mut target = meta.view().read_record(new_parent)?;
            index_store::insert_entry(
                meta,
                &mut target,
                IndexEntry::for_file_name(reference, &file_name)?,
            )?;
            meta.view().read_record(reference)
        })?;
        debug!(
            target: "fntfs::volume",
            reference = %reference,
            new_parent = %new_parent,
            new_name,
            "moved file"
        );
        Ok(moved)
    }

    /// Persist caller changes to `record`. Names, the data stream and the
    /// directory index change only through their own operations, and
    /// non-resident values only through the stream operations, since their
    /// runs decide which clusters the file owns.
    pub fn update_file_record(&mut self, record: &FileRecord) -> Result<FileRecord> {
        let reference = record.reference();
        ensure_user_file(reference)?;
        self.transact("update_file_record", |meta| {
            let current = meta.view().read_record(reference)?;
            let kept: Vec<&AttributeRecord> =
                current.attributes().iter().filter(|attr| is_fixed(attr)).collect();
            let requested: Vec<&AttributeRecord> =
                record.attributes().iter().filter(|attr| is_fixed(attr)).collect();
            if kept != requested
                || current.is_directory() != record.is_directory()
                || current.hard_link_count() != record.hard_link_count()
            {
                return Err(NtfsError::InvalidArgument(format!(
                    "{reference}: names, links, data and index change through their own operations"
                )));
            }
            meta.write_record(record)?;
            meta.view().read_record(reference)
        })
    }

    // -----------------------------------------------------------------------
    // Data streams
    // -----------------------------------------------------------------------

    /// Up to `len` bytes of the unnamed data stream at `offset`.
    pub fn read_data(&self, record: &FileRecord, offset: u64, len: usize) -> Result<Vec<u8>> {
        let view = self.view();
        let current = view.read_record(record.reference())?;
        stream::read_data(&view, &*self.device, &current, offset, len)
    }

    /// Write `bytes` at `offset`, growing the stream as needed.
    pub fn write_data(&mut self, record: &FileRecord, offset: u64, bytes: &[u8]) -> Result<FileRecord> {
        let reference = record.reference();
        self.transact("write_data", |meta| {
            let mut current = meta.view().read_record(reference)?;
            stream::write_data(meta, &mut current, offset, bytes)?;
            meta.write_record(&current)?;
            meta.view().read_record(reference)
        })
    }

    /// Truncate or zero-extend the unnamed data stream.
    pub fn set_data_length(&mut self, record: &FileRecord, length: u64) -> Result<FileRecord> {
        let reference = record.reference();
        self.transact("set_data_length", |meta| {
            let mut current = meta.view().read_record(reference)?;
            stream::set_data_length(meta, &mut current, length)?;
            meta.write_record(&current)?;
            meta.view().read_record(reference)
        })
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Write a checkpoint: restart tables and a new restart area.
    pub fn checkpoint(&mut self) -> Result<Lsn> {
        let device = Arc::clone(&self.device);
        let _guard = ExclusiveGuard::acquire(&*device)?;
        self.pager.log_mut().inner_mut().checkpoint()
    }

    pub fn statistics(&self) -> Result<VolumeStatistics> {
        let view = self.view();
        let used_clusters = view.count_set(BitmapKind::Clusters)?;
        let used_segments = view.count_set(BitmapKind::Segments)?;
        Ok(VolumeStatistics {
            bytes_per_cluster: self.boot.geometry.bytes_per_cluster(),
            total_clusters: self.space.total_clusters,
            free_clusters: self.space.total_clusters.saturating_sub(used_clusters),
            mft_segments: self.space.mft_segments,
            used_segments,
            free_segments: self.space.mft_segments.saturating_sub(used_segments),
            recovery: self.recovery,
            log: self.pager.log().inner().statistics(),
            pager: self.pager.statistics(),
            index: index_metrics_snapshot(),
        })
    }
}
