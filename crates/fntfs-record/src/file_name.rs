//! `$FILE_NAME` attribute value and the file attribute flag set.

use bitflags::bitflags;
use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    NtTime, SegmentReference, read_le_u32, read_le_u64, read_le_u8, read_utf16le, utf16_units,
    write_le_u32, write_le_u64, write_le_u8, write_utf16le,
};
use serde::{Deserialize, Serialize};

const FILE_NAME_HEADER_LEN: usize = 0x42;

bitflags! {
    /// DOS-style attribute bits shared by `$STANDARD_INFORMATION` and
    /// `$FILE_NAME`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const ARCHIVE = 0x0000_0020;
        const DEVICE = 0x0000_0040;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
        const OFFLINE = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED = 0x0000_4000;
        /// Set in `$FILE_NAME` of directories (the `$I30` index is present).
        const DIRECTORY = 0x1000_0000;
        const INDEX_VIEW = 0x2000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileNamespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl FileNamespace {
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Posix),
            1 => Ok(Self::Win32),
            2 => Ok(Self::Dos),
            3 => Ok(Self::Win32AndDos),
            other => Err(NtfsError::corrupt(
                "file name",
                format!("unknown namespace {other}"),
            )),
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Posix => 0,
            Self::Win32 => 1,
            Self::Dos => 2,
            Self::Win32AndDos => 3,
        }
    }
}

/// Decoded `$FILE_NAME` value. Also the key of every `$I30` index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameAttribute {
    pub parent: SegmentReference,
    pub created: NtTime,
    pub modified: NtTime,
    pub mft_changed: NtTime,
    pub accessed: NtTime,
    pub allocated_size: u64,
    pub real_size: u64,
    pub attributes: FileAttributes,
    pub ea_or_reparse: u32,
    pub namespace: FileNamespace,
    pub name: String,
}

impl FileNameAttribute {
    #[must_use]
    pub fn new(parent: SegmentReference, name: &str, attributes: FileAttributes, now: NtTime) -> Self {
        Self {
            parent,
            created: now,
            modified: now,
            mft_changed: now,
            accessed: now,
            allocated_size: 0,
            real_size: 0,
            attributes,
            ea_or_reparse: 0,
            namespace: FileNamespace::Win32AndDos,
            name: name.to_owned(),
        }
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FILE_NAME_HEADER_LEN + utf16_units(&self.name) * 2
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_NAME_HEADER_LEN {
            return Err(NtfsError::corrupt(
                "file name",
                format!("value of {} bytes shorter than header", data.len()),
            ));
        }
        let name_units = usize::from(read_le_u8(data, 0x40)?);
        if FILE_NAME_HEADER_LEN + name_units * 2 > data.len() {
            return Err(NtfsError::corrupt(
                "file name",
                format!("name of {name_units} units overruns {} byte value", data.len()),
            ));
        }
        Ok(Self {
            parent: SegmentReference::from_u64(read_le_u64(data, 0x00)?),
            created: NtTime(read_le_u64(data, 0x08)?),
            modified: NtTime(read_le_u64(data, 0x10)?),
            mft_changed: NtTime(read_le_u64(data, 0x18)?),
            accessed: NtTime(read_le_u64(data, 0x20)?),
            allocated_size: read_le_u64(data, 0x28)?,
            real_size: read_le_u64(data, 0x30)?,
            attributes: FileAttributes::from_bits_retain(read_le_u32(data, 0x38)?),
            ea_or_reparse: read_le_u32(data, 0x3C)?,
            namespace: FileNamespace::from_u8(read_le_u8(data, 0x41)?)?,
            name: read_utf16le(data, FILE_NAME_HEADER_LEN, name_units)?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let units = utf16_units(&self.name);
        let units_u8 = u8::try_from(units)
            .ok()
            .filter(|units| *units > 0)
            .ok_or_else(|| {
                NtfsError::InvalidArgument(format!(
                    "file name must be 1..=255 UTF-16 units, got {units}"
                ))
            })?;
        let mut out = vec![0_u8; self.encoded_len()];
        write_le_u64(&mut out, 0x00, self.parent.to_u64())?;
        write_le_u64(&mut out, 0x08, self.created.0)?;
        write_le_u64(&mut out, 0x10, self.modified.0)?;
        write_le_u64(&mut out, 0x18, self.mft_changed.0)?;
        write_le_u64(&mut out, 0x20, self.accessed.0)?;
        write_le_u64(&mut out, 0x28, self.allocated_size)?;
        write_le_u64(&mut out, 0x30, self.real_size)?;
        write_le_u32(&mut out, 0x38, self.attributes.bits())?;
        write_le_u32(&mut out, 0x3C, self.ea_or_reparse)?;
        write_le_u8(&mut out, 0x40, units_u8)?;
        write_le_u8(&mut out, 0x41, self.namespace.as_u8())?;
        write_utf16le(&mut out, FILE_NAME_HEADER_LEN, &self.name)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let mut name = FileNameAttribute::new(
            SegmentReference::new(5, 5),
            "Résumé.txt",
            FileAttributes::ARCHIVE,
            NtTime(132_000_000_000_000_000),
        );
        name.real_size = 1234;
        let bytes = name.serialize().unwrap();
        assert_eq!(bytes.len(), 0x42 + 20);
        assert_eq!(FileNameAttribute::parse(&bytes).unwrap(), name);
    }

    #[test]
    fn test_file_name_rejects_overrun_and_empty() {
        let name = FileNameAttribute::new(SegmentReference::NULL, "a", FileAttributes::empty(), NtTime(0));
        let bytes = name.serialize().unwrap();
        assert!(FileNameAttribute::parse(&bytes[..0x42]).unwrap_err().is_corruption());
        let empty = FileNameAttribute::new(SegmentReference::NULL, "", FileAttributes::empty(), NtTime(0));
        assert!(empty.serialize().is_err(), "case=empty_name");
    }
}
