//! Segment references and log sequence numbers.

use std::fmt;

use serde::{Deserialize, Serialize};

const SEGMENT_NUMBER_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Reference to one file record segment: a 48-bit segment number plus a
/// 16-bit sequence number.
///
/// The sequence number is bumped every time a segment is reused, so a
/// reference whose sequence number disagrees with the segment's header
/// points at a different (newer) file and must not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentReference {
    segment_number: u64,
    sequence_number: u16,
}

impl SegmentReference {
    /// The all-zero reference ("no base segment").
    pub const NULL: Self = Self {
        segment_number: 0,
        sequence_number: 0,
    };

    /// Build a reference; the segment number is truncated to 48 bits.
    #[must_use]
    pub const fn new(segment_number: u64, sequence_number: u16) -> Self {
        Self {
            segment_number: segment_number & SEGMENT_NUMBER_MASK,
            sequence_number,
        }
    }

    /// Decode the on-disk `u64` form.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self {
            segment_number: raw & SEGMENT_NUMBER_MASK,
            sequence_number: (raw >> 48) as u16,
        }
    }

    /// Encode to the on-disk `u64` form.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.sequence_number as u64) << 48) | self.segment_number
    }

    #[must_use]
    pub const fn segment_number(self) -> u64 {
        self.segment_number
    }

    #[must_use]
    pub const fn sequence_number(self) -> u16 {
        self.sequence_number
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.segment_number == 0 && self.sequence_number == 0
    }
}

impl fmt::Display for SegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.segment_number, self.sequence_number)
    }
}

/// Well-known system segments created at format time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum SystemSegment {
    Mft = 0,
    MftMirror = 1,
    LogFile = 2,
    Volume = 3,
    AttributeDefinitions = 4,
    RootDirectory = 5,
    Bitmap = 6,
    Boot = 7,
    BadClusters = 8,
    Secure = 9,
    UpcaseTable = 10,
    Extend = 11,
}

impl SystemSegment {
    /// First segment number handed out to user files.
    pub const FIRST_USER_SEGMENT: u64 = 16;

    #[must_use]
    pub const fn segment_number(self) -> u64 {
        self as u64
    }

    /// Reference to this system segment; system segments keep their
    /// segment number as sequence number.
    #[must_use]
    pub const fn reference(self) -> SegmentReference {
        let number = self as u64;
        let sequence = if number == 0 { 1 } else { number as u16 };
        SegmentReference::new(number, sequence)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mft => "$MFT",
            Self::MftMirror => "$MFTMirr",
            Self::LogFile => "$LogFile",
            Self::Volume => "$Volume",
            Self::AttributeDefinitions => "$AttrDef",
            Self::RootDirectory => ".",
            Self::Bitmap => "$Bitmap",
            Self::Boot => "$Boot",
            Self::BadClusters => "$BadClus",
            Self::Secure => "$Secure",
            Self::UpcaseTable => "$UpCase",
            Self::Extend => "$Extend",
        }
    }
}

/// Log sequence number: the byte position of a record in the log stream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_round_trip() {
        let reference = SegmentReference::new(0x1234_5678_9ABC, 0xDEF0);
        let raw = reference.to_u64();
        assert_eq!(raw, 0xDEF0_1234_5678_9ABC);
        assert_eq!(SegmentReference::from_u64(raw), reference);
    }

    #[test]
    fn test_segment_number_truncated_to_48_bits() {
        let reference = SegmentReference::new(u64::MAX, 1);
        assert_eq!(reference.segment_number(), 0x0000_FFFF_FFFF_FFFF);
    }

    #[test]
    fn test_system_segment_references() {
        assert_eq!(SystemSegment::Mft.reference(), SegmentReference::new(0, 1));
        assert_eq!(
            SystemSegment::RootDirectory.reference(),
            SegmentReference::new(5, 5)
        );
        assert!(SegmentReference::NULL.is_null());
        assert_eq!(SystemSegment::RootDirectory.reference().to_string(), "5#5");
    }

    #[test]
    fn test_lsn_ordering() {
        assert!(Lsn(4096) > Lsn(8));
        assert!(Lsn::ZERO.is_zero());
        assert_eq!(Lsn(0x2000).to_string(), "0x2000");
    }
}
