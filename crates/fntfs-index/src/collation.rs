//! Collation rules ordering index keys.

use std::cmp::Ordering;

use fntfs_error::{NtfsError, Result};
use fntfs_types::{UpcaseTable, read_le_u32, read_le_u8};

/// Offset of the name inside a `$FILE_NAME` key.
const FILE_NAME_NAME_OFFSET: usize = 0x42;
const FILE_NAME_LENGTH_OFFSET: usize = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollationRule {
    /// `$FILE_NAME` keys, compared by name ignoring case.
    Filename,
    /// Raw UTF-16 keys, compared ignoring case.
    UnicodeString,
    /// Little-endian `u32` keys.
    NtofsUlong,
}

impl CollationRule {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0x01 => Ok(Self::Filename),
            0x02 => Ok(Self::UnicodeString),
            0x10 => Ok(Self::NtofsUlong),
            other => Err(NtfsError::unsupported(format!(
                "collation rule {other:#x}"
            ))),
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Filename => 0x01,
            Self::UnicodeString => 0x02,
            Self::NtofsUlong => 0x10,
        }
    }

    /// Order two keys. Names equal ignoring case fall back to a
    /// case-sensitive comparison so the order is total.
    pub fn compare(self, upcase: &UpcaseTable, left: &[u8], right: &[u8]) -> Result<Ordering> {
        match self {
            Self::Filename => Ok(compare_units(
                upcase,
                file_name_units(left)?,
                file_name_units(right)?,
            )),
            Self::UnicodeString => Ok(compare_units(
                upcase,
                raw_units(left, "unicode string key")?,
                raw_units(right, "unicode string key")?,
            )),
            Self::NtofsUlong => {
                Ok(read_ulong_key(left)?.cmp(&read_ulong_key(right)?))
            }
        }
    }

    /// Order two keys ignoring case only; equal means "same name" for the
    /// purpose of duplicate detection.
    pub fn compare_ignore_case(
        self,
        upcase: &UpcaseTable,
        left: &[u8],
        right: &[u8],
    ) -> Result<Ordering> {
        match self {
            Self::Filename => Ok(fold(upcase, file_name_units(left)?)
                .cmp(fold(upcase, file_name_units(right)?))),
            Self::UnicodeString => Ok(fold(upcase, raw_units(left, "unicode string key")?)
                .cmp(fold(upcase, raw_units(right, "unicode string key")?))),
            Self::NtofsUlong => self.compare(upcase, left, right),
        }
    }
}

fn read_ulong_key(key: &[u8]) -> Result<u32> {
    read_le_u32(key, 0).map_err(|_| {
        NtfsError::corrupt("index key", format!("ulong key of {} bytes", key.len()))
    })
}

/// UTF-16 code units of the name in a `$FILE_NAME` key.
fn file_name_units(key: &[u8]) -> Result<&[u8]> {
    let units = usize::from(read_le_u8(key, FILE_NAME_LENGTH_OFFSET).map_err(|_| {
        NtfsError::corrupt("index key", format!("file name key of {} bytes", key.len()))
    })?);
    let end = FILE_NAME_NAME_OFFSET + units * 2;
    key.get(FILE_NAME_NAME_OFFSET..end).ok_or_else(|| {
        NtfsError::corrupt(
            "index key",
            format!("file name of {units} units overruns {} byte key", key.len()),
        )
    })
}

fn raw_units<'a>(key: &'a [u8], structure: &'static str) -> Result<&'a [u8]> {
    if key.len() % 2 != 0 {
        return Err(NtfsError::corrupt(structure, "odd byte length"));
    }
    Ok(key)
}

fn units(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
}

fn fold<'a>(upcase: &'a UpcaseTable, bytes: &'a [u8]) -> impl Iterator<Item = u16> + 'a {
    units(bytes).map(|unit| upcase.upcase(unit))
}

fn compare_units(upcase: &UpcaseTable, left: &[u8], right: &[u8]) -> Ordering {
    fold(upcase, left)
        .cmp(fold(upcase, right))
        .then_with(|| units(left).cmp(units(right)))
}
