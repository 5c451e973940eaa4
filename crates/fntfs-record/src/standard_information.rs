//! `$STANDARD_INFORMATION` attribute value.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{NtTime, read_le_u32, read_le_u64, write_le_u32, write_le_u64};

use crate::file_name::FileAttributes;

/// Value length written by NTFS 1.2.
pub const STANDARD_INFORMATION_V1_LEN: usize = 48;
/// Value length written by NTFS 3.x (adds owner, security, quota, USN).
pub const STANDARD_INFORMATION_V3_LEN: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardInformation {
    pub created: NtTime,
    pub modified: NtTime,
    pub mft_changed: NtTime,
    pub accessed: NtTime,
    pub attributes: FileAttributes,
    pub max_versions: u32,
    pub version: u32,
    pub class_id: u32,
    /// NTFS 3.x fields; `None` for the 48-byte layout.
    pub extended: Option<StandardInformationExt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StandardInformationExt {
    pub owner_id: u32,
    pub security_id: u32,
    pub quota_charged: u64,
    pub usn: u64,
}

impl StandardInformation {
    #[must_use]
    pub fn new(now: NtTime, attributes: FileAttributes) -> Self {
        Self {
            created: now,
            modified: now,
            mft_changed: now,
            accessed: now,
            attributes,
            max_versions: 0,
            version: 0,
            class_id: 0,
            extended: Some(StandardInformationExt::default()),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < STANDARD_INFORMATION_V1_LEN {
            return Err(NtfsError::corrupt(
                "standard information",
                format!("value of {} bytes, need at least 48", data.len()),
            ));
        }
        let extended = if data.len() >= STANDARD_INFORMATION_V3_LEN {
            Some(StandardInformationExt {
                owner_id: read_le_u32(data, 0x30)?,
                security_id: read_le_u32(data, 0x34)?,
                quota_charged: read_le_u64(data, 0x38)?,
                usn: read_le_u64(data, 0x40)?,
            })
        } else {
            None
        };
        Ok(Self {
            created: NtTime(read_le_u64(data, 0x00)?),
            modified: NtTime(read_le_u64(data, 0x08)?),
            mft_changed: NtTime(read_le_u64(data, 0x10)?),
            accessed: NtTime(read_le_u64(data, 0x18)?),
            attributes: FileAttributes::from_bits_retain(read_le_u32(data, 0x20)?),
            max_versions: read_le_u32(data, 0x24)?,
            version: read_le_u32(data, 0x28)?,
            class_id: read_le_u32(data, 0x2C)?,
            extended,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let len = if self.extended.is_some() {
            STANDARD_INFORMATION_V3_LEN
        } else {
            STANDARD_INFORMATION_V1_LEN
        };
        let mut out = vec![0_u8; len];
        write_le_u64(&mut out, 0x00, self.created.0)?;
        write_le_u64(&mut out, 0x08, self.modified.0)?;
        write_le_u64(&mut out, 0x10, self.mft_changed.0)?;
        write_le_u64(&mut out, 0x18, self.accessed.0)?;
        write_le_u32(&mut out, 0x20, self.attributes.bits())?;
        write_le_u32(&mut out, 0x24, self.max_versions)?;
        write_le_u32(&mut out, 0x28, self.version)?;
        write_le_u32(&mut out, 0x2C, self.class_id)?;
        if let Some(ext) = self.extended {
            write_le_u32(&mut out, 0x30, ext.owner_id)?;
            write_le_u32(&mut out, 0x34, ext.security_id)?;
            write_le_u64(&mut out, 0x38, ext.quota_charged)?;
            write_le_u64(&mut out, 0x40, ext.usn)?;
        }
        Ok(out)
    }
}
