//! Metadata access shared by every volume operation.
//!
//! [`MetaView`] reads file record segments and bitmap pages, either as
//! committed or as seen from inside a running transaction. [`MetadataTxn`]
//! owns that transaction: it stages segment images, flips bitmap bits,
//! hands out segments and clusters, and grows the MFT when it runs dry.
//! Every change goes through the pager, so it is logged before it reaches
//! the device.

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_pager::{CLUSTER_BLOCK_SIZE, ImageKind, MetadataPager, PageTarget, PagerTransaction};
use fntfs_record::{
    AttributeRecord, AttributeType, AttributeValue, DataRun, DataRunSequence, FileRecord,
    FileRecordSegment, NonResidentValue, SegmentAllocator, has_file_signature,
    parse_attribute_list,
};
use fntfs_types::{Lsn, SPARSE_LCN, SegmentReference, SystemSegment, VolumeGeometry};
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::log_adapter::LogAdapter;

pub(crate) type Pager<D> = MetadataPager<D, LogAdapter<D>>;

// ---------------------------------------------------------------------------
// Space map
// ---------------------------------------------------------------------------

/// Where the MFT and both bitmaps live, plus allocation hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpaceMap {
    pub mft_runs: DataRunSequence,
    pub mft_segments: u64,
    pub mft_bitmap_runs: DataRunSequence,
    pub cluster_bitmap_runs: DataRunSequence,
    pub total_clusters: u64,
    pub segment_hint: u64,
    pub cluster_hint: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitmapKind {
    /// `$MFT:$BITMAP`, one bit per file record segment.
    Segments,
    /// `$Bitmap`, one bit per cluster.
    Clusters,
}

impl BitmapKind {
    const fn owner(self) -> (SegmentReference, AttributeType) {
        match self {
            Self::Segments => (SystemSegment::Mft.reference(), AttributeType::Bitmap),
            Self::Clusters => (SystemSegment::Bitmap.reference(), AttributeType::Data),
        }
    }
}

impl SpaceMap {
    const fn bitmap_runs(&self, kind: BitmapKind) -> &DataRunSequence {
        match kind {
            BitmapKind::Segments => &self.mft_bitmap_runs,
            BitmapKind::Clusters => &self.cluster_bitmap_runs,
        }
    }

    const fn bitmap_bits(&self, kind: BitmapKind) -> u64 {
        match kind {
            BitmapKind::Segments => self.mft_segments,
            BitmapKind::Clusters => self.total_clusters,
        }
    }
}

/// Bytes of a bitmap attribute covering `bits`, rounded up to 8 bytes.
pub(crate) const fn bitmap_bytes(bits: u64) -> u64 {
    bits.div_ceil(64) * 8
}

/// Page target for `length` bytes at `offset` of a non-resident metadata
/// attribute described by `runs`.
pub(crate) fn attribute_target(
    runs: &DataRunSequence,
    bytes_per_cluster: u32,
    attribute: u16,
    offset: u64,
    length: usize,
) -> Result<PageTarget> {
    let cluster = u64::from(bytes_per_cluster);
    let vcn = offset / cluster;
    let within = offset % cluster;
    let clusters = (within + length as u64).div_ceil(cluster);
    let mut lcns: SmallVec<[u64; 4]> = SmallVec::new();
    for extent in runs.translate_to_lcn(vcn, clusters) {
        if extent.lcn == SPARSE_LCN {
            return Err(NtfsError::corrupt(
                "metadata attribute",
                format!("vcn {vcn} falls in a sparse hole"),
            ));
        }
        lcns.extend((0..extent.clusters).map(|step| extent.lcn as u64 + step));
    }
    if lcns.len() as u64 != clusters {
        return Err(NtfsError::corrupt(
            "metadata attribute",
            format!(
                "{length} bytes at offset {offset} run past the {} mapped clusters",
                runs.cluster_count()
            ),
        ));
    }
    Ok(PageTarget::new(
        attribute,
        vcn,
        lcns,
        (within / CLUSTER_BLOCK_SIZE) as u16,
        length,
    ))
}

/// Replace (or add) a single-extent non-resident attribute.
pub(crate) fn set_non_resident(
    record: &mut FileRecord,
    attribute_type: AttributeType,
    name: &str,
    runs: &DataRunSequence,
    data_length: u64,
    cluster_size: u64,
) -> Result<()> {
    let extents = record
        .attributes()
        .iter()
        .filter(|attr| attr.attribute_type == attribute_type && attr.name == name)
        .count();
    if extents > 1 {
        return Err(NtfsError::unsupported(format!(
            "rewriting {attribute_type:?} attribute split over {extents} extents"
        )));
    }
    let value = NonResidentValue::from_runs(runs.clone(), data_length, cluster_size);
    match record.find_attribute_mut(attribute_type, name) {
        Some(attribute) => attribute.set_value(AttributeValue::NonResident(value)),
        None => {
            record.add_attribute(AttributeRecord::non_resident(attribute_type, name, value));
        }
    }
    Ok(())
}

const fn next_sequence(previous: u16) -> u16 {
    match previous.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read access to metadata, committed or through a transaction.
pub(crate) struct MetaView<'a, D: SectorDevice + ?Sized> {
    pager: &'a Pager<D>,
    txn: Option<&'a PagerTransaction>,
    space: &'a SpaceMap,
    geometry: VolumeGeometry,
}

impl<'a, D: SectorDevice + ?Sized> MetaView<'a, D> {
    pub(crate) const fn committed(
        pager: &'a Pager<D>,
        space: &'a SpaceMap,
        geometry: VolumeGeometry,
    ) -> Self {
        Self {
            pager,
            txn: None,
            space,
            geometry,
        }
    }

    pub(crate) const fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    pub(crate) const fn space(&self) -> &SpaceMap {
        self.space
    }

    pub(crate) fn read(&self, target: &PageTarget) -> Result<Vec<u8>> {
        match self.txn {
            Some(txn) => self.pager.read_page(txn, target),
            None => self.pager.read_page_committed(target),
        }
    }

    pub(crate) fn segment_target(&self, segment: u64, attribute: u16) -> Result<PageTarget> {
        if segment >= self.space.mft_segments {
            return Err(NtfsError::NotFound(format!(
                "segment {segment} lies beyond the {}-segment MFT",
                self.space.mft_segments
            )));
        }
        let bytes = self.geometry.bytes_per_file_record_segment;
        attribute_target(
            &self.space.mft_runs,
            self.geometry.bytes_per_cluster(),
            attribute,
            segment * u64::from(bytes),
            bytes as usize,
        )
    }

    /// Decode slot `segment`; `None` when it never held a segment.
    fn read_slot(&self, segment: u64) -> Result<Option<FileRecordSegment>> {
        let raw = self.read(&self.segment_target(segment, 0)?)?;
        if !has_file_signature(&raw) {
            return Ok(None);
        }
        FileRecordSegment::decode(&raw, segment).map(Some)
    }

    pub(crate) fn read_segment(&self, segment: u64) -> Result<Option<FileRecordSegment>> {
        self.read_slot(segment).inspect_err(|err| {
            if err.is_corruption() {
                warn!(target: "fntfs::volume", segment, error = %err, "file record segment failed validation");
            }
        })
    }

    /// The in-use segment `reference` names, checking its sequence number.
    fn live_segment(&self, reference: SegmentReference) -> Result<FileRecordSegment> {
        let number = reference.segment_number();
        let segment = self
            .read_segment(number)?
            .filter(FileRecordSegment::is_in_use)
            .ok_or_else(|| NtfsError::NotFound(format!("segment {number} is not in use")))?;
        if segment.sequence_number != reference.sequence_number() {
            warn!(
                target: "fntfs::volume",
                reference = %reference,
                current = segment.sequence_number,
                "stale segment reference"
            );
            return Err(NtfsError::NotFound(format!(
                "stale reference {reference}: segment now carries sequence {}",
                segment.sequence_number
            )));
        }
        Ok(segment)
    }

    /// Assemble the file record whose base segment is `reference`.
    pub(crate) fn read_record(&self, reference: SegmentReference) -> Result<FileRecord> {
        let base = self.live_segment(reference)?;
        if !base.is_base() {
            return Err(NtfsError::NotFound(format!(
                "{reference} is an extension of {}",
                base.base_segment
            )));
        }
        let mut extensions: Vec<SegmentReference> = Vec::new();
        if let Some(list) = base.find_attribute(AttributeType::AttributeList, "") {
            for entry in parse_attribute_list(list.resident_data()?)? {
                if entry.segment != reference && !extensions.contains(&entry.segment) {
                    extensions.push(entry.segment);
                }
            }
        }
        let mut segments = Vec::with_capacity(1 + extensions.len());
        segments.push(base);
        for extension in extensions {
            segments.push(self.live_segment(extension).map_err(|err| match err {
                NtfsError::NotFound(detail) => NtfsError::corrupt(
                    "file record",
                    format!("{reference} lists extension {extension}: {detail}"),
                ),
                other => other,
            })?);
        }
        FileRecord::parse(&segments)
    }

    fn bitmap_page(&self, kind: BitmapKind, page: u64) -> Result<Vec<u8>> {
        let cluster = self.geometry.cluster_size();
        self.read(&attribute_target(
            self.space.bitmap_runs(kind),
            self.geometry.bytes_per_cluster(),
            0,
            page * cluster,
            cluster as usize,
        )?)
    }

    const fn bits_per_page(&self) -> u64 {
        self.geometry.cluster_size() * 8
    }

    pub(crate) fn bit_is_set(&self, kind: BitmapKind, bit: u64) -> Result<bool> {
        let per_page = self.bits_per_page();
        let page = self.bitmap_page(kind, bit / per_page)?;
        let within = (bit % per_page) as usize;
        Ok(page[within / 8] & (1 << (within % 8)) != 0)
    }

    /// First clear bit in `start..end`.
    fn scan_clear(&self, kind: BitmapKind, start: u64, end: u64) -> Result<Option<u64>> {
        let per_page = self.bits_per_page();
        let mut bit = start;
        while bit < end {
            let page_index = bit / per_page;
            let page = self.bitmap_page(kind, page_index)?;
            let page_end = ((page_index + 1) * per_page).min(end);
            while bit < page_end {
                let within = (bit % per_page) as usize;
                let byte = page[within / 8];
                if byte == 0xFF && within % 8 == 0 && bit + 8 <= page_end {
                    bit += 8;
                    continue;
                }
                if byte & (1 << (within % 8)) == 0 {
                    return Ok(Some(bit));
                }
                bit += 1;
            }
        }
        Ok(None)
    }

    /// First clear bit at or after `from`, wrapping around to `floor`.
    pub(crate) fn find_clear(&self, kind: BitmapKind, from: u64, floor: u64) -> Result<Option<u64>> {
        let limit = self.space.bitmap_bits(kind);
        let from = if from >= limit || from < floor { floor } else { from };
        if let Some(bit) = self.scan_clear(kind, from, limit)? {
            return Ok(Some(bit));
        }
        self.scan_clear(kind, floor, from)
    }

    /// Number of consecutive clear bits starting at `start`, at most `max`.
    fn clear_run_length(&self, kind: BitmapKind, start: u64, max: u64) -> Result<u64> {
        let per_page = self.bits_per_page();
        let end = self.space.bitmap_bits(kind).min(start.saturating_add(max));
        let mut bit = start;
        while bit < end {
            let page_index = bit / per_page;
            let page = self.bitmap_page(kind, page_index)?;
            let page_end = ((page_index + 1) * per_page).min(end);
            while bit < page_end {
                let within = (bit % per_page) as usize;
                if page[within / 8] & (1 << (within % 8)) != 0 {
                    return Ok(bit - start);
                }
                bit += 1;
            }
        }
        Ok(bit - start)
    }

    /// Set bits among the first `bitmap_bits` of the bitmap.
    pub(crate) fn count_set(&self, kind: BitmapKind) -> Result<u64> {
        let per_page = self.bits_per_page();
        let limit = self.space.bitmap_bits(kind);
        let mut total = 0_u64;
        let mut page_index = 0_u64;
        while page_index * per_page < limit {
            let page = self.bitmap_page(kind, page_index)?;
            let bits = (limit - page_index * per_page).min(per_page) as usize;
            let full = bits / 8;
            total += page[..full].iter().map(|byte| u64::from(byte.count_ones())).sum::<u64>();
            let tail = bits % 8;
            if tail > 0 {
                let mask = (1_u8 << tail) - 1;
                total += u64::from((page[full] & mask).count_ones());
            }
            page_index += 1;
        }
        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// One running metadata transaction.
pub(crate) struct MetadataTxn<'v, D: SectorDevice + ?Sized> {
    pager: &'v mut Pager<D>,
    txn: PagerTransaction,
    space: &'v mut SpaceMap,
    geometry: VolumeGeometry,
    minor_version: u8,
    mft_growth_segments: u64,
    /// Open attribute indexes resolved during this transaction.
    attributes: HashMap<(SegmentReference, u32), u16>,
}

/// Allocator for system records that must stay in one segment.
pub(crate) struct NoExtensions;

impl SegmentAllocator for NoExtensions {
    fn allocate_segment(&mut self) -> Result<SegmentReference> {
        Err(NtfsError::out_of_space(
            "system file record outgrew its base segment",
        ))
    }
}

impl<'v, D: SectorDevice + ?Sized> MetadataTxn<'v, D> {
    pub(crate) fn begin(
        pager: &'v mut Pager<D>,
        space: &'v mut SpaceMap,
        geometry: VolumeGeometry,
        minor_version: u8,
        mft_growth_segments: u64,
    ) -> Result<Self> {
        let txn = pager.begin()?;
        Ok(Self {
            pager,
            txn,
            space,
            geometry,
            minor_version,
            mft_growth_segments,
            attributes: HashMap::new(),
        })
    }

    pub(crate) fn view(&self) -> MetaView<'_, D> {
        MetaView {
            pager: &*self.pager,
            txn: Some(&self.txn),
            space: &*self.space,
            geometry: self.geometry,
        }
    }

    pub(crate) const fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    pub(crate) const fn minor_version(&self) -> u8 {
        self.minor_version
    }

    pub(crate) fn device(&self) -> &D {
        self.pager.device()
    }

    /// Drop cached committed images overlapping a range written directly.
    pub(crate) fn invalidate(&self, start: u64, len: u64) {
        self.pager.invalidate(start, len);
    }

    pub(crate) fn commit(self) -> Result<Option<Lsn>> {
        let Self { pager, txn, .. } = self;
        pager.commit(txn)
    }

    pub(crate) fn rollback(self) -> Result<()> {
        let Self { pager, txn, .. } = self;
        pager.rollback(txn)
    }

    /// Open attribute index for `(owner, attribute_type)`.
    pub(crate) fn attribute(
        &mut self,
        owner: SegmentReference,
        attribute_type: AttributeType,
        bytes_per_index_buffer: u32,
    ) -> Result<u16> {
        let key = (owner, attribute_type.code());
        if let Some(index) = self.attributes.get(&key) {
            return Ok(*index);
        }
        let index = self.pager.log_mut().open_attribute(
            owner,
            attribute_type.code(),
            bytes_per_index_buffer,
        )?;
        self.attributes.insert(key, index);
        Ok(index)
    }

    /// Stage a full page image.
    pub(crate) fn stage(&mut self, target: &PageTarget, image: &[u8], kind: ImageKind) -> Result<()> {
        self.pager.stage_image(&mut self.txn, target, image, kind)
    }

    // -----------------------------------------------------------------------
    // Segments and records
    // -----------------------------------------------------------------------

    pub(crate) fn write_segment(&mut self, segment: &FileRecordSegment) -> Result<()> {
        let attribute = self.attribute(SystemSegment::Mft.reference(), AttributeType::Data, 0)?;
        let target = self.view().segment_target(segment.segment_number, attribute)?;
        let image = segment.encode()?;
        self.stage(&target, &image, ImageKind::FileRecordSegment)
    }

    /// Lay `record` out over its segments and stage every one of them.
    /// Extension segments it no longer needs are released.
    pub(crate) fn write_record(&mut self, record: &FileRecord) -> Result<()> {
        self.store_record(record, true)
    }

    fn store_record(&mut self, record: &FileRecord, allow_extensions: bool) -> Result<()> {
        let bytes = self.geometry.bytes_per_file_record_segment;
        let minor = self.minor_version;
        let layout = if allow_extensions {
            record.update_segments(bytes, minor, self)?
        } else {
            record.update_segments(bytes, minor, &mut NoExtensions)?
        };
        for segment in &layout.segments {
            self.write_segment(segment)?;
        }
        for released in layout.released {
            self.free_segment(released)?;
        }
        Ok(())
    }

    /// Reserve a free segment, growing the MFT when none is left.
    pub(crate) fn allocate_segment_reference(&mut self) -> Result<SegmentReference> {
        let floor = SystemSegment::FIRST_USER_SEGMENT;
        let from = self.space.segment_hint.max(floor);
        let number = match self.view().find_clear(BitmapKind::Segments, from, floor)? {
            Some(number) => number,
            None => {
                let previous = self.space.mft_segments;
                self.grow_mft()?;
                self.view()
                    .find_clear(BitmapKind::Segments, previous, floor)?
                    .ok_or_else(|| NtfsError::internal("grown MFT has no free segment"))?
            }
        };
        self.set_bits(BitmapKind::Segments, number, 1)?;
        self.space.segment_hint = number + 1;
        let sequence = match self.view().read_slot(number) {
            Ok(Some(previous)) => next_sequence(previous.sequence_number),
            Ok(None) => 1,
            Err(err) if err.is_corruption() => 1,
            Err(err) => return Err(err),
        };
        debug!(target: "fntfs::volume", segment = number, sequence, "allocated segment");
        Ok(SegmentReference::new(number, sequence))
    }

    /// Mark a segment free on disk and in the MFT bitmap.
    pub(crate) fn free_segment(&mut self, reference: SegmentReference) -> Result<()> {
        let number = reference.segment_number();
        let attribute = self.attribute(SystemSegment::Mft.reference(), AttributeType::Data, 0)?;
        let target = self.view().segment_target(number, attribute)?;
        self.pager.deallocate_segment(&mut self.txn, &target)?;
        self.clear_bits(BitmapKind::Segments, number, 1)?;
        self.space.segment_hint = self.space.segment_hint.min(number);
        debug!(target: "fntfs::volume", segment = %reference, "freed segment");
        Ok(())
    }

    /// Add segments to the MFT, taking clusters from the volume bitmap.
    fn grow_mft(&mut self) -> Result<()> {
        let frs = u64::from(self.geometry.bytes_per_file_record_segment);
        let cluster = self.geometry.cluster_size();
        let bpc = self.geometry.bytes_per_cluster();
        let old_segments = self.space.mft_segments;
        let new_segments = old_segments + self.mft_growth_segments.max(old_segments / 8);

        let needed = (new_segments * frs).div_ceil(cluster);
        let have = self.space.mft_runs.cluster_count();
        if needed > have {
            let added = self.allocate_clusters(needed - have)?;
            for run in added.runs() {
                self.space.mft_runs.push(*run);
            }
        }

        let bitmap_len = bitmap_bytes(new_segments);
        let bitmap_clusters = bitmap_len.div_ceil(cluster);
        let have_bitmap = self.space.mft_bitmap_runs.cluster_count();
        if bitmap_clusters > have_bitmap {
            let added = self.allocate_clusters(bitmap_clusters - have_bitmap)?;
            for run in added.runs() {
                self.space.mft_bitmap_runs.push(*run);
            }
            let attribute = self.attribute(SystemSegment::Mft.reference(), AttributeType::Bitmap, 0)?;
            let zero = vec![0_u8; cluster as usize];
            for vcn in have_bitmap..bitmap_clusters {
                let target = attribute_target(
                    &self.space.mft_bitmap_runs,
                    bpc,
                    attribute,
                    vcn * cluster,
                    cluster as usize,
                )?;
                self.stage(&target, &zero, ImageKind::Buffer)?;
            }
        }
        self.space.mft_segments = new_segments;

        let mut record = self.view().read_record(SystemSegment::Mft.reference())?;
        set_non_resident(&mut record, AttributeType::Data, "", &self.space.mft_runs, new_segments * frs, cluster)?;
        set_non_resident(
            &mut record,
            AttributeType::Bitmap,
            "",
            &self.space.mft_bitmap_runs,
            bitmap_len,
            cluster,
        )?;
        self.store_record(&record, false)?;
        info!(
            target: "fntfs::volume",
            from = old_segments,
            to = new_segments,
            clusters = self.space.mft_runs.cluster_count(),
            "grew MFT"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bitmaps and clusters
    // -----------------------------------------------------------------------

    fn change_bits(&mut self, kind: BitmapKind, first: u64, count: u64, set: bool) -> Result<()> {
        let cluster = self.geometry.cluster_size();
        let bpc = self.geometry.bytes_per_cluster();
        let per_page = cluster * 8;
        let (owner, attribute_type) = kind.owner();
        let attribute = self.attribute(owner, attribute_type, 0)?;
        let end = first + count;
        let mut bit = first;
        while bit < end {
            let page = bit / per_page;
            let within = bit % per_page;
            let take = (per_page - within).min(end - bit);
            let target = attribute_target(
                self.space.bitmap_runs(kind),
                bpc,
                attribute,
                page * cluster,
                cluster as usize,
            )?;
            if set {
                self.pager.set_bits(&mut self.txn, &target, within as u32, take as u32)?;
            } else {
                self.pager.clear_bits(&mut self.txn, &target, within as u32, take as u32)?;
            }
            bit += take;
        }
        Ok(())
    }

    pub(crate) fn set_bits(&mut self, kind: BitmapKind, first: u64, count: u64) -> Result<()> {
        self.change_bits(kind, first, count, true)
    }

    pub(crate) fn clear_bits(&mut self, kind: BitmapKind, first: u64, count: u64) -> Result<()> {
        self.change_bits(kind, first, count, false)
    }

    /// Reserve `count` clusters, as few runs as the bitmap allows.
    pub(crate) fn allocate_clusters(&mut self, count: u64) -> Result<DataRunSequence> {
        let mut runs = DataRunSequence::new();
        let mut remaining = count;
        while remaining > 0 {
            let start = self
                .view()
                .find_clear(BitmapKind::Clusters, self.space.cluster_hint, 0)?
                .ok_or_else(|| {
                    NtfsError::out_of_space(format!(
                        "{remaining} of {count} clusters could not be allocated"
                    ))
                })?;
            let length = self.view().clear_run_length(BitmapKind::Clusters, start, remaining)?;
            self.set_bits(BitmapKind::Clusters, start, length)?;
            runs.push(DataRun::new(length, start));
            self.space.cluster_hint = start + length;
            remaining -= length;
        }
        debug!(target: "fntfs::volume", count, runs = runs.runs().len(), "allocated clusters");
        Ok(runs)
    }

    /// Return the allocated clusters of `runs` to the volume bitmap.
    pub(crate) fn free_runs(&mut self, runs: &[DataRun]) -> Result<()> {
        for run in runs {
            if let Some(lcn) = run.lcn {
                self.clear_bits(BitmapKind::Clusters, lcn, run.length)?;
                self.space.cluster_hint = self.space.cluster_hint.min(lcn);
            }
        }
        Ok(())
    }
}

impl<D: SectorDevice + ?Sized> SegmentAllocator for MetadataTxn<'_, D> {
    fn allocate_segment(&mut self) -> Result<SegmentReference> {
        self.allocate_segment_reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_target_spans_runs() {
        let runs = DataRunSequence::from_runs(vec![DataRun::new(2, 100), DataRun::new(2, 50)]).unwrap();
        let target = attribute_target(&runs, 4096, 3, 4096 + 3072, 2048).unwrap();
        assert_eq!(target.vcn, 1);
        assert_eq!(target.lcns.as_slice(), &[101, 50], "case=crosses_run_boundary");
        assert_eq!(target.cluster_block_offset, 6);
        assert_eq!(target.attribute, 3);

        let inside = attribute_target(&runs, 4096, 0, 1024, 1024).unwrap();
        assert_eq!(inside.lcns.as_slice(), &[100]);
        assert_eq!(inside.cluster_block_offset, 2, "case=record_inside_cluster");
    }

    #[test]
    fn test_attribute_target_rejects_holes_and_overruns() {
        let runs = DataRunSequence::from_runs(vec![DataRun::new(1, 7), DataRun::sparse(1)]).unwrap();
        assert!(attribute_target(&runs, 4096, 0, 4096, 4096).unwrap_err().is_corruption(), "case=hole");
        assert!(attribute_target(&runs, 4096, 0, 8192, 4096).unwrap_err().is_corruption(), "case=past_end");
    }

    #[test]
    fn test_bitmap_bytes_and_sequence_wrap() {
        assert_eq!(bitmap_bytes(1), 8);
        assert_eq!(bitmap_bytes(64), 8);
        assert_eq!(bitmap_bytes(65), 16);
        assert_eq!(next_sequence(7), 8);
        assert_eq!(next_sequence(u16::MAX), 1, "case=zero_skipped");
    }
}
