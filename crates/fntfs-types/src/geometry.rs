//! Volume geometry: sector, cluster, and record sizes.

use fntfs_error::{NtfsError, Result};
use serde::{Deserialize, Serialize};

/// Size parameters fixed at format time and read back from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_file_record_segment: u32,
    pub bytes_per_index_record: u32,
}

impl Default for VolumeGeometry {
    fn default() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
            bytes_per_file_record_segment: 1024,
            bytes_per_index_record: 4096,
        }
    }
}

impl VolumeGeometry {
    #[must_use]
    pub const fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    #[must_use]
    pub const fn cluster_size(&self) -> u64 {
        self.bytes_per_cluster() as u64
    }

    /// Reject sizes the on-disk structures cannot express.
    pub fn validate(&self) -> Result<()> {
        let check_pow2 = |name: &str, value: u32| {
            if value == 0 || !value.is_power_of_two() {
                Err(NtfsError::InvalidArgument(format!(
                    "{name} must be a non-zero power of two, got {value}"
                )))
            } else {
                Ok(())
            }
        };
        check_pow2("bytes_per_sector", self.bytes_per_sector)?;
        check_pow2("sectors_per_cluster", self.sectors_per_cluster)?;
        check_pow2(
            "bytes_per_file_record_segment",
            self.bytes_per_file_record_segment,
        )?;
        check_pow2("bytes_per_index_record", self.bytes_per_index_record)?;

        if !(512..=4096).contains(&self.bytes_per_sector) {
            return Err(NtfsError::InvalidArgument(format!(
                "bytes_per_sector {} outside 512..=4096",
                self.bytes_per_sector
            )));
        }
        if self.bytes_per_cluster() > 64 * 1024 {
            return Err(NtfsError::InvalidArgument(format!(
                "cluster size {} exceeds 64 KiB",
                self.bytes_per_cluster()
            )));
        }
        if !(512..=4096).contains(&self.bytes_per_file_record_segment) {
            return Err(NtfsError::InvalidArgument(format!(
                "file record segment size {} outside 512..=4096",
                self.bytes_per_file_record_segment
            )));
        }
        if self.bytes_per_index_record < 512 {
            return Err(NtfsError::InvalidArgument(format!(
                "index record size {} below 512",
                self.bytes_per_index_record
            )));
        }
        Ok(())
    }

    /// Encode a record size the way the boot sector does: a positive cluster
    /// count, or `-log2(bytes)` when the record is smaller than a cluster.
    #[must_use]
    pub fn encode_record_size(&self, bytes: u32) -> i8 {
        let cluster = self.bytes_per_cluster();
        if bytes >= cluster {
            (bytes / cluster) as i8
        } else {
            -(bytes.trailing_zeros() as i8)
        }
    }

    /// Inverse of [`Self::encode_record_size`].
    pub fn decode_record_size(&self, raw: i8) -> Result<u32> {
        if raw > 0 {
            Ok(u32::from(raw.unsigned_abs()) * self.bytes_per_cluster())
        } else {
            let shift = u32::from(raw.unsigned_abs());
            if shift == 0 || shift > 31 {
                return Err(NtfsError::corrupt(
                    "boot sector",
                    format!("record size exponent {raw} out of range"),
                ));
            }
            Ok(1_u32 << shift)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_is_valid() {
        let geometry = VolumeGeometry::default();
        geometry.validate().unwrap();
        assert_eq!(geometry.bytes_per_cluster(), 4096);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let geometry = VolumeGeometry {
            sectors_per_cluster: 3,
            ..VolumeGeometry::default()
        };
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn test_record_size_encoding() {
        let geometry = VolumeGeometry::default();
        assert_eq!(geometry.encode_record_size(1024), -10);
        assert_eq!(geometry.decode_record_size(-10).unwrap(), 1024);
        assert_eq!(geometry.encode_record_size(4096), 1);
        assert_eq!(geometry.decode_record_size(1).unwrap(), 4096);
        assert!(geometry.decode_record_size(0).is_err());
    }

    #[test]
    fn test_geometry_from_partial_toml() {
        let geometry: VolumeGeometry = toml::from_str("sectors_per_cluster = 1").unwrap();
        assert_eq!(geometry.bytes_per_cluster(), 512);
        assert_eq!(geometry.bytes_per_file_record_segment, 1024);
        let json = serde_json::to_string(&geometry).unwrap();
        assert!(json.contains("\"sectors_per_cluster\":1"));
    }
}
