//! Where a metadata page lives on the device.

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_log::LogRecord;
use smallvec::SmallVec;

/// Size of the blocks `cluster_block_offset` counts in.
pub const CLUSTER_BLOCK_SIZE: u64 = 512;

/// A page of one metadata attribute and the clusters backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    /// Open attribute index the page's log records name.
    pub attribute: u16,
    pub vcn: u64,
    /// Clusters holding the page, in order.
    pub lcns: SmallVec<[u64; 4]>,
    /// Offset of the page inside its first cluster, in 512-byte blocks.
    pub cluster_block_offset: u16,
    pub length: usize,
}

impl PageTarget {
    #[must_use]
    pub fn new(
        attribute: u16,
        vcn: u64,
        lcns: impl IntoIterator<Item = u64>,
        cluster_block_offset: u16,
        length: usize,
    ) -> Self {
        Self {
            attribute,
            vcn,
            lcns: lcns.into_iter().collect(),
            cluster_block_offset,
            length,
        }
    }

    /// The page a log record addresses, `length` bytes long.
    #[must_use]
    pub fn from_record(record: &LogRecord, length: usize) -> Self {
        Self::new(
            record.target_attribute,
            record.target_vcn,
            record.lcns.iter().copied(),
            record.cluster_block_offset,
            length,
        )
    }

    /// Device offset of the first byte of the page.
    pub fn start(&self, bytes_per_cluster: u32) -> Result<u64> {
        let first = self.lcns.first().ok_or_else(|| {
            NtfsError::internal(format!("page at vcn {} has no clusters", self.vcn))
        })?;
        Ok(first * u64::from(bytes_per_cluster)
            + u64::from(self.cluster_block_offset) * CLUSTER_BLOCK_SIZE)
    }

    /// Device pieces covering page bytes `offset..offset + len`.
    pub fn extents(
        &self,
        bytes_per_cluster: u32,
        offset: usize,
        len: usize,
    ) -> Result<SmallVec<[(u64, usize); 4]>> {
        let cluster = u64::from(bytes_per_cluster);
        let base = u64::from(self.cluster_block_offset) * CLUSTER_BLOCK_SIZE;
        let mut pieces: SmallVec<[(u64, usize); 4]> = SmallVec::new();
        let mut pos = base + offset as u64;
        let end = pos + len as u64;
        while pos < end {
            let index = (pos / cluster) as usize;
            let lcn = *self.lcns.get(index).ok_or_else(|| {
                NtfsError::corrupt(
                    "page target",
                    format!(
                        "page at vcn {} needs cluster {index} but maps {}",
                        self.vcn,
                        self.lcns.len()
                    ),
                )
            })?;
            let within = pos % cluster;
            let take = (cluster - within).min(end - pos);
            let device = lcn * cluster + within;
            match pieces.last_mut() {
                Some((last, last_len)) if *last + *last_len as u64 == device => {
                    *last_len += take as usize;
                }
                _ => pieces.push((device, take as usize)),
            }
            pos += take;
        }
        Ok(pieces)
    }

    /// Read page bytes `offset..offset + len`.
    pub fn read_range<D: SectorDevice + ?Sized>(
        &self,
        device: &D,
        bytes_per_cluster: u32,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for (at, piece) in self.extents(bytes_per_cluster, offset, len)? {
            out.extend_from_slice(&device.read_bytes(at, piece)?);
        }
        Ok(out)
    }

    pub fn read<D: SectorDevice + ?Sized>(&self, device: &D, bytes_per_cluster: u32) -> Result<Vec<u8>> {
        self.read_range(device, bytes_per_cluster, 0, self.length)
    }

    /// Write `data` at page offset `offset`.
    pub fn write_range<D: SectorDevice + ?Sized>(
        &self,
        device: &D,
        bytes_per_cluster: u32,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let mut done = 0;
        for (at, piece) in self.extents(bytes_per_cluster, offset, data.len())? {
            device.write_bytes(at, &data[done..done + piece])?;
            done += piece;
        }
        Ok(())
    }
}
