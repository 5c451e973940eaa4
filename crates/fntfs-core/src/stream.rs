//! The unnamed `$DATA` stream of regular files.
//!
//! Stream bytes go straight to their clusters; only the record describing
//! them (sizes and run list) is logged. Clusters are zeroed as they are
//! allocated and the tail of the last cluster is zeroed on truncation, so
//! bytes past the end of the stream always read back as zero.

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_record::{AttributeRecord, AttributeType, DataRun, DataRunSequence, FileRecord, FileRecordSegment};
use fntfs_types::{NtTime, SPARSE_LCN};

use crate::meta::{MetaView, MetadataTxn, set_non_resident};

/// Resident attribute header of an unnamed attribute.
const RESIDENT_HEADER_LEN: usize = 0x18;
/// Largest single zero-fill write.
const ZERO_CHUNK: u64 = 1 << 20;

/// Largest resident `$DATA` value `record` can hold in its base segment.
fn resident_room(record: &FileRecord) -> usize {
    let bytes = record.bytes_per_segment() as usize;
    let header = FileRecordSegment::new(0, 0, record.bytes_per_segment(), record.minor_version())
        .first_attribute_offset();
    let others: usize = record
        .attributes()
        .iter()
        .filter(|attr| !(attr.attribute_type == AttributeType::Data && attr.name.is_empty()))
        .map(|attr| attr.serialized_length() as usize)
        .sum();
    bytes.saturating_sub(header + others + RESIDENT_HEADER_LEN + 8) / 8 * 8
}

fn set_resident(record: &mut FileRecord, contents: Vec<u8>) -> Result<()> {
    match record.find_attribute_mut(AttributeType::Data, "") {
        Some(attribute) => attribute.set_resident_data(contents),
        None => {
            record.add_attribute(AttributeRecord::resident(AttributeType::Data, "", contents));
            Ok(())
        }
    }
}

/// Bump the modification times in `$STANDARD_INFORMATION`.
fn touch(record: &mut FileRecord) -> Result<()> {
    let mut info = record.standard_information()?;
    let now = NtTime::now();
    info.modified = now;
    info.mft_changed = now;
    record.set_standard_information(&info)
}

/// Resident contents of the stream, `Some(empty)` when there is no
/// `$DATA` yet, `None` when it is non-resident.
fn resident_contents(record: &FileRecord) -> Result<Option<Vec<u8>>> {
    match record.data_attribute() {
        None => Ok(Some(Vec::new())),
        Some(attribute) if attribute.is_resident() => Ok(Some(attribute.resident_data()?.to_vec())),
        Some(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Cluster I/O
// ---------------------------------------------------------------------------

fn zero_runs<D: SectorDevice + ?Sized>(meta: &MetadataTxn<'_, D>, runs: &[DataRun]) -> Result<()> {
    let cluster = meta.geometry().cluster_size();
    for run in runs {
        let Some(lcn) = run.lcn else {
            continue;
        };
        let mut offset = lcn * cluster;
        let end = (lcn + run.length) * cluster;
        while offset < end {
            let len = (end - offset).min(ZERO_CHUNK);
            meta.device().write_bytes(offset, &vec![0_u8; len as usize])?;
            meta.invalidate(offset, len);
            offset += len;
        }
    }
    Ok(())
}

/// Extend `runs` to `clusters` clusters with freshly zeroed clusters.
fn grow_runs<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    runs: &mut DataRunSequence,
    clusters: u64,
) -> Result<()> {
    let have = runs.cluster_count();
    if clusters <= have {
        return Ok(());
    }
    let added = meta.allocate_clusters(clusters - have)?;
    zero_runs(meta, added.runs())?;
    for run in added.runs() {
        runs.push(*run);
    }
    Ok(())
}

/// Write `bytes` at stream `offset`, read-modify-writing partial clusters.
fn write_stream<D: SectorDevice + ?Sized>(
    meta: &MetadataTxn<'_, D>,
    runs: &DataRunSequence,
    offset: u64,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let cluster = meta.geometry().cluster_size();
    let device = meta.device();
    let end = offset + bytes.len() as u64;
    let first_vcn = offset / cluster;
    let count = (end - 1) / cluster - first_vcn + 1;
    let mut vcn = first_vcn;
    for extent in runs.translate_to_lcn(first_vcn, count) {
        if extent.lcn == SPARSE_LCN {
            return Err(NtfsError::unsupported("writing into a sparse range"));
        }
        let extent_start = vcn * cluster;
        let extent_end = extent_start + extent.clusters * cluster;
        let from = offset.max(extent_start);
        let to = end.min(extent_end);
        let window_start = from / cluster * cluster;
        let window_end = to.div_ceil(cluster) * cluster;
        let window_clusters = (window_end - window_start) / cluster;
        let device_start = extent.lcn as u64 * cluster + (window_start - extent_start);

        let mut image = vec![0_u8; (window_end - window_start) as usize];
        let head_partial = from != window_start;
        let tail_partial = to != window_end;
        if head_partial || (tail_partial && window_clusters == 1) {
            let head = device.read_bytes(device_start, cluster as usize)?;
            image[..cluster as usize].copy_from_slice(&head);
        }
        if tail_partial && window_clusters > 1 {
            let tail_offset = window_end - window_start - cluster;
            let tail = device.read_bytes(device_start + tail_offset, cluster as usize)?;
            image[tail_offset as usize..].copy_from_slice(&tail);
        }
        image[(from - window_start) as usize..(to - window_start) as usize]
            .copy_from_slice(&bytes[(from - offset) as usize..(to - offset) as usize]);
        device.write_bytes(device_start, &image)?;
        meta.invalidate(device_start, image.len() as u64);
        vcn += extent.clusters;
    }
    if vcn < first_vcn + count {
        return Err(NtfsError::corrupt(
            "data stream",
            format!("run list ends at vcn {vcn}, write needs {}", first_vcn + count),
        ));
    }
    Ok(())
}

/// Allocate zeroed clusters for `length` bytes and copy `contents` in.
fn make_non_resident<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    contents: &[u8],
    length: u64,
) -> Result<DataRunSequence> {
    let mut runs = DataRunSequence::new();
    grow_runs(meta, &mut runs, length.div_ceil(meta.geometry().cluster_size()))?;
    write_stream(meta, &runs, 0, contents)?;
    Ok(runs)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Read up to `len` bytes at `offset`, clipped to the stream length.
pub(crate) fn read_data<D: SectorDevice + ?Sized>(
    view: &MetaView<'_, D>,
    device: &D,
    record: &FileRecord,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    if record.is_directory() {
        return Err(NtfsError::IsDirectory);
    }
    let Some(attribute) = record.data_attribute() else {
        return Ok(Vec::new());
    };
    let length = record.data_length();
    if offset >= length || len == 0 {
        return Ok(Vec::new());
    }
    let end = length.min(offset.saturating_add(len as u64));
    if attribute.is_resident() {
        let data = attribute.resident_data()?;
        let range = offset as usize..(end as usize).min(data.len());
        return Ok(data.get(range).map(<[u8]>::to_vec).unwrap_or_default());
    }
    let valid = attribute
        .non_resident_value()
        .map_or(length, |value| value.valid_data_length.min(length));
    let runs = record.joined_runs(AttributeType::Data, "")?;
    let cluster = view.geometry().cluster_size();
    let first_vcn = offset / cluster;
    let count = (end - 1) / cluster - first_vcn + 1;
    let mut window = Vec::with_capacity((count * cluster) as usize);
    for extent in runs.translate_to_lcn(first_vcn, count) {
        let bytes = (extent.clusters * cluster) as usize;
        if extent.lcn == SPARSE_LCN {
            window.resize(window.len() + bytes, 0);
        } else {
            window.extend(device.read_bytes(extent.lcn as u64 * cluster, bytes)?);
        }
    }
    if (window.len() as u64) < count * cluster {
        return Err(NtfsError::corrupt(
            "data stream",
            format!("{} of {length} bytes mapped by the run list", runs.cluster_count() * cluster),
        ));
    }
    let window_start = first_vcn * cluster;
    let mut out = window[(offset - window_start) as usize..(end - window_start) as usize].to_vec();
    if valid < end {
        let zero_from = valid.saturating_sub(offset) as usize;
        out[zero_from..].fill(0);
    }
    Ok(out)
}

/// Write `bytes` at `offset`, extending the stream as needed. The stream
/// stays resident while it fits the base segment.
pub(crate) fn write_data<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    record: &mut FileRecord,
    offset: u64,
    bytes: &[u8],
) -> Result<()> {
    if record.is_directory() {
        return Err(NtfsError::IsDirectory);
    }
    if bytes.is_empty() {
        return Ok(());
    }
    let end = offset
        .checked_add(bytes.len() as u64)
        .ok_or_else(|| NtfsError::InvalidArgument(format!("write at offset {offset} overflows")))?;
    let cluster = meta.geometry().cluster_size();
    let new_len = record.data_length().max(end);
    match resident_contents(record)? {
        Some(mut contents) if new_len <= resident_room(record) as u64 => {
            contents.resize(new_len as usize, 0);
            contents[offset as usize..end as usize].copy_from_slice(bytes);
            set_resident(record, contents)?;
        }
        Some(contents) => {
            let runs = make_non_resident(meta, &contents, new_len)?;
            write_stream(meta, &runs, offset, bytes)?;
            set_non_resident(record, AttributeType::Data, "", &runs, new_len, cluster)?;
        }
        None => {
            let mut runs = record.joined_runs(AttributeType::Data, "")?;
            grow_runs(meta, &mut runs, new_len.div_ceil(cluster))?;
            write_stream(meta, &runs, offset, bytes)?;
            set_non_resident(record, AttributeType::Data, "", &runs, new_len, cluster)?;
        }
    }
    touch(record)
}

/// Truncate or zero-extend the stream to `length` bytes.
pub(crate) fn set_data_length<D: SectorDevice + ?Sized>(
    meta: &mut MetadataTxn<'_, D>,
    record: &mut FileRecord,
    length: u64,
) -> Result<()> {
    if record.is_directory() {
        return Err(NtfsError::IsDirectory);
    }
    let cluster = meta.geometry().cluster_size();
    match resident_contents(record)? {
        Some(mut contents) if length <= resident_room(record) as u64 => {
            contents.resize(length as usize, 0);
            set_resident(record, contents)?;
        }
        Some(mut contents) => {
            contents.truncate(length as usize);
            let runs = make_non_resident(meta, &contents, length)?;
            set_non_resident(record, AttributeType::Data, "", &runs, length, cluster)?;
        }
        None => {
            let mut runs = record.joined_runs(AttributeType::Data, "")?;
            let clusters = length.div_ceil(cluster);
            if clusters < runs.cluster_count() {
                let released = runs.truncate(clusters);
                meta.free_runs(&released)?;
            } else {
                grow_runs(meta, &mut runs, clusters)?;
            }
            let tail = length % cluster;
            if tail != 0 && length < record.data_length() {
                let zeros = vec![0_u8; (cluster - tail) as usize];
                write_stream(meta, &runs, length, &zeros)?;
            }
            set_non_resident(record, AttributeType::Data, "", &runs, length, cluster)?;
        }
    }
    touch(record)
}

/// Clusters held by the record's data stream and index allocation.
pub(crate) fn owned_runs(record: &FileRecord) -> Result<Vec<DataRun>> {
    let mut runs = Vec::new();
    for attribute_type in [AttributeType::Data, AttributeType::IndexAllocation] {
        let names: Vec<String> = record
            .attributes()
            .iter()
            .filter(|attr| attr.attribute_type == attribute_type && !attr.is_resident())
            .map(|attr| attr.name.clone())
            .collect();
        let mut seen: Vec<&str> = Vec::new();
        for name in &names {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            runs.extend(record.joined_runs(attribute_type, name)?.into_runs());
        }
    }
    Ok(runs)
}
