//! Core type definitions for the NTFS metadata engine.
//!
//! Leaf crate: byte-level codecs, the multi-sector fixup protocol, segment
//! references, log sequence numbers, volume geometry, and the upcase table
//! used by filename collation.

pub mod codec;
pub mod fixup;
pub mod geometry;
pub mod reference;
pub mod time;
pub mod upcase;

pub use codec::{
    align8, ensure_slice, read_be_u16, read_be_u32, read_be_u64, read_fixed, read_le_u16,
    read_le_u32, read_le_u64, read_le_u8, read_utf16le, utf16_units, write_be_u32, write_le_u16,
    write_le_u32, write_le_u64, write_le_u8, write_utf16le,
};
pub use fixup::{
    MULTI_SECTOR_STRIDE, bump_and_protect, next_update_sequence_number, protect, unprotect,
    usa_count_for,
};
pub use geometry::VolumeGeometry;
pub use reference::{Lsn, SegmentReference, SystemSegment};
pub use time::NtTime;
pub use upcase::UpcaseTable;

/// Volume-relative cluster number used to mark a sparse hole.
pub const SPARSE_LCN: i64 = -1;
