//! NTFS metadata engine.
//!
//! Formats, mounts and modifies NTFS-style volumes over any
//! [`SectorDevice`]: file records, `$I30` directory indexes, and a
//! write-ahead `$LogFile` that is replayed at mount so metadata survives a
//! crash.
//!
//! ```no_run
//! use fntfs::{FormatOptions, Volume};
//!
//! # fn main() -> fntfs::Result<()> {
//! let mut volume = fntfs::format_image("scratch.img", 64 * 1024 * 1024, &FormatOptions::default())?;
//! let docs = volume.create_file(volume.root(), "docs", true)?;
//! let note = volume.create_file(docs.reference(), "note.txt", false)?;
//! volume.write_data(&note, 0, b"hello")?;
//! volume.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

pub use fntfs_core::{
    BootSector, DirectoryEntry, FormatOptions, MountOptions, RecoverySummary, Volume,
    VolumeStatistics,
};
pub use fntfs_device::{ExclusiveGuard, FileDevice, MemoryDevice, SectorDevice, WriteEvent};
pub use fntfs_error::{NtfsError, Result};
pub use fntfs_log::RecoveryMode;
pub use fntfs_record::{
    AttributeRecord, AttributeType, FileAttributes, FileNameAttribute, FileRecord,
    StandardInformation,
};
pub use fntfs_types::{Lsn, NtTime, SegmentReference, SystemSegment, VolumeGeometry};

/// Create an image file of `len_bytes` and format it.
pub fn format_image(
    path: impl AsRef<Path>,
    len_bytes: u64,
    options: &FormatOptions,
) -> Result<Volume<FileDevice>> {
    let sector = options.geometry.bytes_per_sector;
    let device = FileDevice::create(path.as_ref(), sector, len_bytes / u64::from(sector))?;
    tracing::info!(target: "fntfs::volume", path = %path.as_ref().display(), len_bytes, "formatting image");
    Volume::format(Arc::new(device), options)
}

/// Mount an existing image file.
pub fn open_image(
    path: impl AsRef<Path>,
    bytes_per_sector: u32,
    options: &MountOptions,
) -> Result<Volume<FileDevice>> {
    let device = FileDevice::open(path.as_ref(), bytes_per_sector)?;
    if !device.is_writable() {
        return Err(NtfsError::InvalidArgument(format!(
            "{} is read-only",
            path.as_ref().display()
        )));
    }
    Volume::open(Arc::new(device), options)
}
