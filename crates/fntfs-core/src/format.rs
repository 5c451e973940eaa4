//! Laying down an empty volume.
//!
//! Format writes straight to the device: nothing is mounted yet, so there is
//! no log to protect the writes. The boot sector goes last, which leaves a
//! device that was interrupted mid-format unrecognizable rather than
//! half-valid.

use std::sync::Arc;

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_log::{LogFile, LogRegion};
use fntfs_record::{
    AttributeRecord, AttributeType, DataRun, DataRunSequence, FileAttributes, FileNameAttribute,
    FileRecord, SegmentFlags, StandardInformation,
};
use fntfs_types::{NtTime, SegmentReference, SystemSegment, UpcaseTable, VolumeGeometry};
use tracing::info;

use crate::boot::BootSector;
use crate::config::FormatOptions;
use crate::index_store::{DirectoryIndex, IndexAllocation, empty_root};
use crate::meta::{NoExtensions, bitmap_bytes, set_non_resident};

/// `$UpCase` holds one UTF-16 unit per BMP code point.
const UPCASE_BYTES: u64 = 0x1_0000 * 2;

/// `$VOLUME_INFORMATION`: reserved u64, major u8, minor u8, flags u16.
const VOLUME_INFORMATION_LEN: usize = 12;

const SYSTEM_SEGMENTS: [SystemSegment; 12] = [
    SystemSegment::Mft,
    SystemSegment::MftMirror,
    SystemSegment::LogFile,
    SystemSegment::Volume,
    SystemSegment::AttributeDefinitions,
    SystemSegment::RootDirectory,
    SystemSegment::Bitmap,
    SystemSegment::Boot,
    SystemSegment::BadClusters,
    SystemSegment::Secure,
    SystemSegment::UpcaseTable,
    SystemSegment::Extend,
];

/// Cluster placement of every system stream on a fresh volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormatLayout {
    pub total_clusters: u64,
    pub mft: DataRunSequence,
    pub mft_bitmap: DataRunSequence,
    pub log: DataRunSequence,
    pub upcase: DataRunSequence,
    pub bitmap: DataRunSequence,
    /// Clusters `0..used_clusters` are taken once format completes.
    pub used_clusters: u64,
}

impl FormatLayout {
    /// Place the system streams back to back after the boot cluster.
    pub(crate) fn plan(options: &FormatOptions, total_clusters: u64) -> Result<Self> {
        let geometry = options.geometry;
        let cluster = geometry.cluster_size();
        let frs = u64::from(geometry.bytes_per_file_record_segment);
        let mut next = 1_u64;
        let mut take = |bytes: u64| {
            let clusters = bytes.div_ceil(cluster).max(1);
            let run = DataRun::new(clusters, next);
            next += clusters;
            DataRunSequence::from_runs(vec![run])
        };
        let mft = take(options.initial_mft_segments * frs)?;
        let mft_bitmap = take(bitmap_bytes(options.initial_mft_segments))?;
        let log = take(
            options
                .log_size_bytes
                .next_multiple_of(u64::from(options.log_page_size)),
        )?;
        let upcase = take(UPCASE_BYTES)?;
        let bitmap = take(bitmap_bytes(total_clusters))?;
        let used_clusters = next;
        if used_clusters >= total_clusters {
            return Err(NtfsError::InvalidArgument(format!(
                "a device of {total_clusters} clusters cannot hold {used_clusters} clusters of metadata"
            )));
        }
        Ok(Self {
            total_clusters,
            mft,
            mft_bitmap,
            log,
            upcase,
            bitmap,
            used_clusters,
        })
    }
}

/// Log region covering the clusters of `$LogFile`.
pub(crate) fn log_region(runs: &DataRunSequence, cluster_size: u64) -> Result<LogRegion> {
    let extents = runs
        .runs()
        .iter()
        .map(|run| {
            run.lcn
                .map(|lcn| (lcn * cluster_size, run.length * cluster_size))
                .ok_or_else(|| NtfsError::corrupt("$LogFile", "log stream has a sparse hole"))
        })
        .collect::<Result<Vec<_>>>()?;
    LogRegion::new(extents)
}

fn write_runs<D: SectorDevice + ?Sized>(
    device: &D,
    runs: &DataRunSequence,
    cluster_size: u64,
    bytes: &[u8],
) -> Result<()> {
    let mut written = 0_usize;
    for run in runs.runs() {
        let lcn = run
            .lcn
            .ok_or_else(|| NtfsError::internal("format placed a stream in a sparse run"))?;
        let len = ((run.length * cluster_size) as usize).min(bytes.len() - written);
        device.write_bytes(lcn * cluster_size, &bytes[written..written + len])?;
        written += len;
    }
    Ok(())
}

fn set_bit_range(bitmap: &mut [u8], count: u64) {
    for bit in 0..count as usize {
        bitmap[bit / 8] |= 1 << (bit % 8);
    }
}

fn padded(mut bytes: Vec<u8>, runs: &DataRunSequence, cluster_size: u64) -> Vec<u8> {
    bytes.resize((runs.cluster_count() * cluster_size) as usize, 0);
    bytes
}

// ---------------------------------------------------------------------------
// System records
// ---------------------------------------------------------------------------

fn base_record(
    reference: SegmentReference,
    name: Option<&str>,
    directory: bool,
    geometry: VolumeGeometry,
    minor_version: u8,
    now: NtTime,
) -> Result<FileRecord> {
    let mut record = FileRecord::new(reference, geometry.bytes_per_file_record_segment, minor_version);
    let hidden = FileAttributes::HIDDEN | FileAttributes::SYSTEM;
    if directory {
        record.set_flags(SegmentFlags::IN_USE | SegmentFlags::DIRECTORY);
    }
    record.set_hard_link_count(1);
    record.set_standard_information(&StandardInformation::new(now, hidden))?;
    if let Some(name) = name {
        let attributes = if directory {
            hidden | FileAttributes::DIRECTORY
        } else {
            hidden
        };
        let file_name =
            FileNameAttribute::new(SystemSegment::RootDirectory.reference(), name, attributes, now);
        record.add_attribute(AttributeRecord::resident(
            AttributeType::FileName,
            "",
            file_name.serialize()?,
        ));
    }
    if directory {
        let index = DirectoryIndex {
            root: empty_root(geometry),
            allocation: IndexAllocation::default(),
        };
        index.store(&mut record, geometry.cluster_size())?;
    }
    Ok(record)
}

fn volume_attributes(record: &mut FileRecord, options: &FormatOptions) {
    let label: Vec<u8> = options
        .volume_label
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    record.add_attribute(AttributeRecord::resident(AttributeType::VolumeName, "", label));
    let mut information = vec![0_u8; VOLUME_INFORMATION_LEN];
    information[8] = 3;
    information[9] = options.minor_version;
    record.add_attribute(AttributeRecord::resident(
        AttributeType::VolumeInformation,
        "",
        information,
    ));
}

/// Records for segments `0..FIRST_USER_SEGMENT`.
fn system_records(options: &FormatOptions, layout: &FormatLayout, now: NtTime) -> Result<Vec<FileRecord>> {
    let geometry = options.geometry;
    let cluster = geometry.cluster_size();
    let frs = u64::from(geometry.bytes_per_file_record_segment);
    let minor = options.minor_version;
    let mut records = Vec::with_capacity(SystemSegment::FIRST_USER_SEGMENT as usize);
    for system in SYSTEM_SEGMENTS {
        let directory = matches!(system, SystemSegment::RootDirectory | SystemSegment::Extend);
        let mut record = base_record(system.reference(), Some(system.name()), directory, geometry, minor, now)?;
        match system {
            SystemSegment::Mft => {
                let segments = options.initial_mft_segments;
                set_non_resident(&mut record, AttributeType::Data, "", &layout.mft, segments * frs, cluster)?;
                set_non_resident(
                    &mut record,
                    AttributeType::Bitmap,
                    "",
                    &layout.mft_bitmap,
                    bitmap_bytes(segments),
                    cluster,
                )?;
            }
            SystemSegment::LogFile => {
                let length = layout.log.cluster_count() * cluster;
                set_non_resident(&mut record, AttributeType::Data, "", &layout.log, length, cluster)?;
            }
            SystemSegment::Bitmap => {
                let length = bitmap_bytes(layout.total_clusters);
                set_non_resident(&mut record, AttributeType::Data, "", &layout.bitmap, length, cluster)?;
            }
            SystemSegment::UpcaseTable => {
                set_non_resident(&mut record, AttributeType::Data, "", &layout.upcase, UPCASE_BYTES, cluster)?;
            }
            SystemSegment::RootDirectory | SystemSegment::Extend => {}
            SystemSegment::Volume => {
                volume_attributes(&mut record, options);
                record.add_attribute(AttributeRecord::resident(AttributeType::Data, "", Vec::new()));
            }
            _ => {
                record.add_attribute(AttributeRecord::resident(AttributeType::Data, "", Vec::new()));
            }
        }
        records.push(record);
    }
    for number in SYSTEM_SEGMENTS.len() as u64..SystemSegment::FIRST_USER_SEGMENT {
        let reference = SegmentReference::new(number, number as u16);
        records.push(base_record(reference, None, false, geometry, minor, now)?);
    }
    Ok(records)
}

/// Write an empty volume onto `device`.
pub(crate) fn write_volume<D: SectorDevice + ?Sized>(device: &Arc<D>, options: &FormatOptions) -> Result<BootSector> {
    options.validate()?;
    let geometry = options.geometry;
    if device.bytes_per_sector() != geometry.bytes_per_sector {
        return Err(NtfsError::InvalidArgument(format!(
            "device has {}-byte sectors, geometry asks for {}",
            device.bytes_per_sector(),
            geometry.bytes_per_sector
        )));
    }
    let cluster = geometry.cluster_size();
    let frs = u64::from(geometry.bytes_per_file_record_segment);
    let total_clusters = device.total_sectors() / u64::from(geometry.sectors_per_cluster);
    let layout = FormatLayout::plan(options, total_clusters)?;

    let mut mft = vec![0_u8; (layout.mft.cluster_count() * cluster) as usize];
    for record in system_records(options, &layout, NtTime::now())? {
        let placed = record.update_segments(
            geometry.bytes_per_file_record_segment,
            options.minor_version,
            &mut NoExtensions,
        )?;
        for segment in placed.segments {
            let start = (segment.segment_number * frs) as usize;
            mft[start..start + frs as usize].copy_from_slice(&segment.encode()?);
        }
    }
    write_runs(&**device, &layout.mft, cluster, &mft)?;

    let mut mft_bitmap = padded(Vec::new(), &layout.mft_bitmap, cluster);
    set_bit_range(&mut mft_bitmap, SystemSegment::FIRST_USER_SEGMENT);
    write_runs(&**device, &layout.mft_bitmap, cluster, &mft_bitmap)?;

    let upcase = padded(UpcaseTable::shared().to_bytes(), &layout.upcase, cluster);
    write_runs(&**device, &layout.upcase, cluster, &upcase)?;

    let mut bitmap = padded(Vec::new(), &layout.bitmap, cluster);
    set_bit_range(&mut bitmap, layout.used_clusters);
    write_runs(&**device, &layout.bitmap, cluster, &bitmap)?;

    LogFile::format(
        Arc::clone(device),
        log_region(&layout.log, cluster)?,
        options.log_page_size,
        options.restart_version()?,
    )?;

    let mft_lcn = layout.mft.runs().first().and_then(|run| run.lcn).unwrap_or(1);
    let boot = BootSector {
        geometry,
        total_sectors: device.total_sectors(),
        mft_lcn,
        mft_mirror_lcn: mft_lcn,
        serial_number: options.serial_number,
    };
    device.write_bytes(0, &boot.encode()?)?;
    device.flush()?;
    info!(
        target: "fntfs::volume",
        total_clusters,
        mft_segments = options.initial_mft_segments,
        used_clusters = layout.used_clusters,
        "formatted volume"
    );
    Ok(boot)
}
