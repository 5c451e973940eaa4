//! Mapping from log-relative offsets to device byte ranges.

use fntfs_error::{NtfsError, Result};

/// The device extents backing the log, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRegion {
    /// `(device byte offset, length)` pairs.
    extents: Vec<(u64, u64)>,
    len: u64,
}

impl LogRegion {
    pub fn new(extents: Vec<(u64, u64)>) -> Result<Self> {
        if extents.iter().any(|(_, len)| *len == 0) {
            return Err(NtfsError::InvalidArgument("empty log extent".to_owned()));
        }
        let len = extents.iter().map(|(_, len)| len).sum();
        Ok(Self { extents, len })
    }

    /// A single contiguous extent.
    pub fn contiguous(offset: u64, len: u64) -> Result<Self> {
        Self::new(vec![(offset, len)])
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device ranges covering `len` bytes at log offset `offset`.
    pub fn map(&self, offset: u64, len: u64) -> Result<Vec<(u64, usize)>> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(NtfsError::internal(format!(
                "log range {offset}+{len} beyond {} byte log",
                self.len
            )));
        }
        let mut out = Vec::new();
        let (mut offset, mut remaining) = (offset, len);
        for (device_offset, extent_len) in &self.extents {
            if remaining == 0 {
                break;
            }
            if offset >= *extent_len {
                offset -= extent_len;
                continue;
            }
            let take = remaining.min(extent_len - offset);
            out.push((device_offset + offset, take as usize));
            remaining -= take;
            offset = 0;
        }
        Ok(out)
    }
}
