//! File-backed device using positional I/O.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fntfs_error::{NtfsError, Result};

use crate::{SectorDevice, check_range};

/// Sector device over a regular file or block-device node.
///
/// Positional reads and writes (`pread`/`pwrite`) keep the handle free of a
/// shared seek cursor. Exclusive access is tracked per handle; coordinating
/// several processes is left to the host.
#[derive(Debug, Clone)]
pub struct FileDevice {
    file: Arc<File>,
    bytes_per_sector: u32,
    total_sectors: u64,
    writable: bool,
    locked: Arc<AtomicBool>,
}

impl FileDevice {
    /// Open an existing image, read-write if permitted.
    pub fn open(path: impl AsRef<Path>, bytes_per_sector: u32) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        Self::from_file(file, bytes_per_sector, writable)
    }

    /// Create (or truncate) an image of `total_sectors` zeroed sectors.
    pub fn create(path: impl AsRef<Path>, bytes_per_sector: u32, total_sectors: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(total_sectors * u64::from(bytes_per_sector))?;
        Self::from_file(file, bytes_per_sector, true)
    }

    fn from_file(file: File, bytes_per_sector: u32, writable: bool) -> Result<Self> {
        if bytes_per_sector < 512 || !bytes_per_sector.is_power_of_two() {
            return Err(NtfsError::InvalidArgument(format!(
                "invalid sector size {bytes_per_sector}"
            )));
        }
        let len = file.metadata()?.len();
        tracing::debug!(target: "fntfs::device", len, bytes_per_sector, writable, "opened file device");
        Ok(Self {
            file: Arc::new(file),
            bytes_per_sector,
            total_sectors: len / u64::from(bytes_per_sector),
            writable,
            locked: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }
}

impl SectorDevice for FileDevice {
    fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    fn read_sectors(&self, first: u64, count: u32) -> Result<Vec<u8>> {
        let byte_len = count as usize * self.bytes_per_sector as usize;
        let range = check_range(self.bytes_per_sector, self.total_sectors, first, byte_len)?;
        let mut buf = vec![0_u8; byte_len];
        self.file.read_exact_at(&mut buf, range.start)?;
        Ok(buf)
    }

    fn write_sectors(&self, first: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(NtfsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            )));
        }
        let range = check_range(self.bytes_per_sector, self.total_sectors, first, data.len())?;
        self.file.write_all_at(data, range.start)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<()> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| NtfsError::Busy)
    }

    fn release(&self) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }
}
