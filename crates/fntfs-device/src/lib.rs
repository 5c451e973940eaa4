//! Sector-addressable storage consumed by the metadata engine.
//!
//! The engine never touches partitions, container formats, or volume
//! composition. It sees a flat run of equally sized sectors through
//! [`SectorDevice`], plus an exclusive-access bracket it holds for the
//! duration of a mutating operation.

mod file;
mod memory;

use fntfs_error::{NtfsError, Result};

pub use file::FileDevice;
pub use memory::{MemoryDevice, WriteEvent};

/// Block-device collaborator.
///
/// Implementations use interior mutability: every method takes `&self` so a
/// device can sit behind an `Arc` shared by the volume and its log.
pub trait SectorDevice: Send + Sync {
    /// Sector size in bytes (a power of two, at least 512).
    fn bytes_per_sector(&self) -> u32;

    /// Number of addressable sectors.
    fn total_sectors(&self) -> u64;

    /// Read `count` sectors starting at `first`.
    fn read_sectors(&self, first: u64, count: u32) -> Result<Vec<u8>>;

    /// Write whole sectors starting at `first`; `data.len()` must be a
    /// multiple of the sector size.
    fn write_sectors(&self, first: u64, data: &[u8]) -> Result<()>;

    /// Make every completed write durable.
    fn flush(&self) -> Result<()>;

    /// Take exclusive access, failing with `Busy` if another holder exists.
    fn lock_exclusive(&self) -> Result<()>;

    /// Drop exclusive access.
    fn release(&self) -> Result<()>;

    /// Total capacity in bytes.
    fn len_bytes(&self) -> u64 {
        self.total_sectors() * u64::from(self.bytes_per_sector())
    }

    /// Read `len` bytes at a sector-aligned byte offset.
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let (first, count) = sector_span(self.bytes_per_sector(), offset, len)?;
        let mut data = self.read_sectors(first, count)?;
        data.truncate(len);
        Ok(data)
    }

    /// Write bytes at a sector-aligned byte offset; the length must cover
    /// whole sectors.
    fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let (first, _) = sector_span(self.bytes_per_sector(), offset, data.len())?;
        if data.len() % self.bytes_per_sector() as usize != 0 {
            return Err(NtfsError::InvalidArgument(format!(
                "write of {} bytes is not a whole number of {}-byte sectors",
                data.len(),
                self.bytes_per_sector()
            )));
        }
        self.write_sectors(first, data)
    }
}

fn sector_span(bytes_per_sector: u32, offset: u64, len: usize) -> Result<(u64, u32)> {
    let sector = u64::from(bytes_per_sector);
    if offset % sector != 0 {
        return Err(NtfsError::InvalidArgument(format!(
            "byte offset {offset} is not aligned to {sector}-byte sectors"
        )));
    }
    let count = (len as u64).div_ceil(sector);
    let count = u32::try_from(count)
        .map_err(|_| NtfsError::InvalidArgument(format!("transfer of {len} bytes too large")))?;
    Ok((offset / sector, count))
}

/// Validate a sector range against the device size.
pub(crate) fn check_range(
    bytes_per_sector: u32,
    total_sectors: u64,
    first: u64,
    byte_len: usize,
) -> Result<std::ops::Range<u64>> {
    let sector = u64::from(bytes_per_sector);
    if byte_len as u64 % sector != 0 {
        return Err(NtfsError::InvalidArgument(format!(
            "transfer of {byte_len} bytes is not sector aligned"
        )));
    }
    let count = byte_len as u64 / sector;
    let end = first
        .checked_add(count)
        .filter(|end| *end <= total_sectors)
        .ok_or_else(|| {
            NtfsError::InvalidArgument(format!(
                "sectors {first}..{} beyond device end {total_sectors}",
                first.saturating_add(count)
            ))
        })?;
    Ok(first * sector..end * sector)
}

// ---------------------------------------------------------------------------
// Exclusive access guard
// ---------------------------------------------------------------------------

/// RAII bracket around [`SectorDevice::lock_exclusive`] /
/// [`SectorDevice::release`].
#[derive(Debug)]
pub struct ExclusiveGuard<'a, D: SectorDevice + ?Sized> {
    device: &'a D,
}

impl<'a, D: SectorDevice + ?Sized> ExclusiveGuard<'a, D> {
    pub fn acquire(device: &'a D) -> Result<Self> {
        device.lock_exclusive()?;
        Ok(Self { device })
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        self.device
    }
}

impl<D: SectorDevice + ?Sized> Drop for ExclusiveGuard<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.release() {
            tracing::warn!(target: "fntfs::device", error = %err, "release of exclusive access failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_helpers_require_alignment() {
        let device = MemoryDevice::new(512, 16);
        device.write_bytes(1024, &[7_u8; 512]).unwrap();
        assert_eq!(device.read_bytes(1024, 100).unwrap(), vec![7_u8; 100]);
        assert!(device.read_bytes(100, 10).is_err(), "case=unaligned_read");
        assert!(device.write_bytes(512, &[1_u8; 100]).is_err(), "case=partial_sector_write");
        assert_eq!(device.len_bytes(), 8192);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let device = MemoryDevice::new(512, 4);
        {
            let guard = ExclusiveGuard::acquire(&device).unwrap();
            assert_eq!(guard.device().total_sectors(), 4);
            assert!(matches!(device.lock_exclusive(), Err(NtfsError::Busy)));
        }
        let _again = ExclusiveGuard::acquire(&device).unwrap();
    }
}
