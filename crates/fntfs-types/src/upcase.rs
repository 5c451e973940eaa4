//! Upcase table used for case-insensitive name collation.
//!
//! The table maps every UTF-16 code unit to its uppercase counterpart. It is
//! generated from the simple (one-to-one) Unicode uppercase mappings; code
//! units with no single-unit uppercase form map to themselves, surrogates
//! included.

use std::cmp::Ordering;
use std::sync::OnceLock;

use fntfs_error::{NtfsError, Result};

const TABLE_LEN: usize = 0x1_0000;

#[derive(Clone, PartialEq, Eq)]
pub struct UpcaseTable {
    map: Box<[u16]>,
}

impl std::fmt::Debug for UpcaseTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcaseTable").finish_non_exhaustive()
    }
}

impl UpcaseTable {
    /// Build the table from Unicode simple uppercase mappings.
    #[must_use]
    pub fn generate() -> Self {
        let mut map = vec![0_u16; TABLE_LEN];
        for (unit, slot) in map.iter_mut().enumerate() {
            let unit = unit as u16;
            *slot = char::from_u32(u32::from(unit)).map_or(unit, |ch| {
                let mut upper = ch.to_uppercase();
                match (upper.next(), upper.next()) {
                    (Some(single), None) => u16::try_from(u32::from(single)).unwrap_or(unit),
                    _ => unit,
                }
            });
        }
        Self {
            map: map.into_boxed_slice(),
        }
    }

    /// Process-wide generated table.
    #[must_use]
    pub fn shared() -> &'static Self {
        static TABLE: OnceLock<UpcaseTable> = OnceLock::new();
        TABLE.get_or_init(Self::generate)
    }

    /// Load a table from its on-disk form (65536 little-endian `u16`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TABLE_LEN * 2 {
            return Err(NtfsError::corrupt(
                "upcase table",
                format!("expected {} bytes, got {}", TABLE_LEN * 2, bytes.len()),
            ));
        }
        let map = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        Ok(Self {
            map: map.into_boxed_slice(),
        })
    }

    /// On-disk form of the table.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.map.iter().flat_map(|unit| unit.to_le_bytes()).collect()
    }

    #[inline]
    #[must_use]
    pub fn upcase(&self, unit: u16) -> u16 {
        self.map[usize::from(unit)]
    }

    /// Compare two UTF-16 strings ignoring case.
    #[must_use]
    pub fn compare_ignore_case(&self, left: &[u16], right: &[u16]) -> Ordering {
        let folded_left = left.iter().map(|unit| self.upcase(*unit));
        let folded_right = right.iter().map(|unit| self.upcase(*unit));
        folded_left.cmp(folded_right)
    }

    /// Case-insensitive comparison with a case-sensitive tie break, giving a
    /// total order in which names differing only in case are adjacent.
    #[must_use]
    pub fn collate(&self, left: &[u16], right: &[u16]) -> Ordering {
        self.compare_ignore_case(left, right)
            .then_with(|| left.cmp(right))
    }

    /// Whether two names are equal ignoring case.
    #[must_use]
    pub fn eq_ignore_case(&self, left: &str, right: &str) -> bool {
        let left: Vec<u16> = left.encode_utf16().collect();
        let right: Vec<u16> = right.encode_utf16().collect();
        self.compare_ignore_case(&left, &right) == Ordering::Equal
    }
}
