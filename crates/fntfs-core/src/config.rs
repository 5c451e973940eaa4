//! Format and mount options.
//!
//! Both structs deserialize with every field optional, so a TOML file only
//! names what it overrides. Options are validated before any byte is
//! written or read.

use fntfs_error::{NtfsError, Result};
use fntfs_log::{RecoveryMode, RestartVersion};
use fntfs_types::{SystemSegment, VolumeGeometry};
use serde::{Deserialize, Serialize};

const MAX_LABEL_UNITS: usize = 32;

/// Parameters fixed when a volume is formatted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub geometry: VolumeGeometry,
    /// Segments the MFT holds right after format.
    pub initial_mft_segments: u64,
    /// Minimum number of segments added each time the MFT grows.
    pub mft_growth_segments: u64,
    pub log_size_bytes: u64,
    pub log_page_size: u32,
    /// Restart area major version (0 or 1), selecting table layouts.
    pub restart_version: u16,
    /// Segment header layout: 0 for NTFS 3.0, 1 for NTFS 3.1.
    pub minor_version: u8,
    pub volume_label: String,
    pub serial_number: u64,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            geometry: VolumeGeometry::default(),
            initial_mft_segments: 64,
            mft_growth_segments: 64,
            log_size_bytes: 4 * 1024 * 1024,
            log_page_size: 4096,
            restart_version: 1,
            minor_version: 1,
            volume_label: String::new(),
            serial_number: 0x4E54_4653_0000_0001,
        }
    }
}

impl FormatOptions {
    /// Parse and validate options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)
            .map_err(|err| NtfsError::InvalidArgument(format!("format options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn restart_version(&self) -> Result<RestartVersion> {
        RestartVersion::from_major(self.restart_version).map_err(|_| {
            NtfsError::InvalidArgument(format!("restart version {}", self.restart_version))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.restart_version()?;
        if self.minor_version > 1 {
            return Err(NtfsError::InvalidArgument(format!(
                "segment header minor version {}",
                self.minor_version
            )));
        }
        if self.initial_mft_segments < SystemSegment::FIRST_USER_SEGMENT {
            return Err(NtfsError::InvalidArgument(format!(
                "{} initial MFT segments cannot hold the {} system segments",
                self.initial_mft_segments,
                SystemSegment::FIRST_USER_SEGMENT
            )));
        }
        if self.mft_growth_segments == 0 {
            return Err(NtfsError::InvalidArgument(
                "mft_growth_segments must be at least 1".to_owned(),
            ));
        }
        let page = self.log_page_size;
        if !page.is_power_of_two() || page < 512 || page % self.geometry.bytes_per_sector != 0 {
            return Err(NtfsError::InvalidArgument(format!("log page size {page}")));
        }
        // Two restart pages plus the smallest useful record area.
        if self.log_size_bytes < 6 * u64::from(page) {
            return Err(NtfsError::InvalidArgument(format!(
                "log of {} bytes is smaller than six {page}-byte pages",
                self.log_size_bytes
            )));
        }
        if self.volume_label.encode_utf16().count() > MAX_LABEL_UNITS {
            return Err(NtfsError::InvalidArgument(format!(
                "volume label longer than {MAX_LABEL_UNITS} characters"
            )));
        }
        Ok(())
    }
}

/// Parameters of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub recovery: RecoveryMode,
    /// Checkpoint after a transaction once fewer log pages than this are
    /// free.
    pub checkpoint_threshold_pages: u64,
    /// Committed metadata pages kept in memory.
    pub cache_pages: usize,
    /// Minimum number of segments added each time the MFT grows.
    pub mft_growth_segments: u64,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            recovery: RecoveryMode::RollForward,
            checkpoint_threshold_pages: 32,
            cache_pages: 1024,
            mft_growth_segments: 64,
        }
    }
}

impl MountOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)
            .map_err(|err| NtfsError::InvalidArgument(format!("mount options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_threshold_pages == 0 {
            return Err(NtfsError::InvalidArgument(
                "checkpoint_threshold_pages must be at least 1".to_owned(),
            ));
        }
        if self.mft_growth_segments == 0 {
            return Err(NtfsError::InvalidArgument(
                "mft_growth_segments must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        FormatOptions::default().validate().unwrap();
        MountOptions::default().validate().unwrap();
    }

    #[test]
    fn test_format_options_from_partial_toml() {
        let options = FormatOptions::from_toml_str(
            r#"
            initial_mft_segments = 128
            restart_version = 0
            volume_label = "scratch"

            [geometry]
            sectors_per_cluster = 1
            bytes_per_index_record = 1024
            "#,
        )
        .unwrap();
        assert_eq!(options.initial_mft_segments, 128);
        assert_eq!(options.restart_version().unwrap(), RestartVersion::V0);
        assert_eq!(options.geometry.bytes_per_cluster(), 512);
        assert_eq!(options.geometry.bytes_per_file_record_segment, 1024, "case=nested_default");
        assert_eq!(options.log_page_size, 4096, "case=top_level_default");
    }

    #[test]
    fn test_format_options_rejections() {
        for (case, text) in [
            ("restart_version", "restart_version = 2"),
            ("minor_version", "minor_version = 3"),
            ("too_few_segments", "initial_mft_segments = 8"),
            ("log_page", "log_page_size = 1000"),
            ("tiny_log", "log_size_bytes = 8192"),
            ("geometry", "[geometry]\nbytes_per_sector = 300"),
            ("unknown_type", "initial_mft_segments = \"many\""),
        ] {
            let err = FormatOptions::from_toml_str(text).unwrap_err();
            assert!(matches!(err, NtfsError::InvalidArgument(_)), "case={case} err={err}");
        }
    }

    #[test]
    fn test_mount_options_toml() {
        let options =
            MountOptions::from_toml_str("recovery = \"roll_back\"\ncache_pages = 0").unwrap();
        assert_eq!(options.recovery, RecoveryMode::RollBack);
        assert_eq!(options.cache_pages, 0);
        assert_eq!(options.checkpoint_threshold_pages, 32);
        assert!(MountOptions::from_toml_str("checkpoint_threshold_pages = 0").is_err());
        assert!(MountOptions::from_toml_str("mft_growth_segments = 0").is_err());
    }
}
