//! File record segments ("FILE" records).
//!
//! A segment is one fixed-size slot of the MFT. The in-memory form keeps the
//! header fields and the decoded attribute list; [`FileRecordSegment::to_bytes`]
//! produces the unprotected image (fixup applied by whoever writes it) and
//! [`FileRecordSegment::decode`] accepts a protected on-disk image.

use bitflags::bitflags;
use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, SegmentReference, align8, bump_and_protect, read_le_u16, read_le_u32, read_le_u64,
    unprotect, usa_count_for, write_le_u16, write_le_u32, write_le_u64,
};

use crate::attribute::{AttributeRecord, AttributeType, END_MARKER};

/// Signature of a file record segment.
pub const FILE_SIGNATURE: &[u8; 4] = b"FILE";

const USA_OFFSET_V0: u16 = 0x2A;
const USA_OFFSET_V1: u16 = 0x30;
const END_MARKER_LEN: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SegmentFlags: u16 {
        const IN_USE = 0x0001;
        const DIRECTORY = 0x0002;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordSegment {
    pub segment_number: u64,
    /// Header layout: 0 places the update sequence array at 0x2A, 1 adds
    /// the segment number field and moves the array to 0x30.
    pub minor_version: u8,
    pub lsn: Lsn,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub flags: SegmentFlags,
    pub base_segment: SegmentReference,
    pub next_attribute_instance: u16,
    pub bytes_allocated: u32,
    pub update_sequence_number: u16,
    pub attributes: Vec<AttributeRecord>,
}

impl FileRecordSegment {
    /// Empty in-use segment.
    #[must_use]
    pub const fn new(
        segment_number: u64,
        sequence_number: u16,
        bytes_per_segment: u32,
        minor_version: u8,
    ) -> Self {
        Self {
            segment_number,
            minor_version,
            lsn: Lsn::ZERO,
            sequence_number,
            hard_link_count: 0,
            flags: SegmentFlags::IN_USE,
            base_segment: SegmentReference::NULL,
            next_attribute_instance: 0,
            bytes_allocated: bytes_per_segment,
            update_sequence_number: 1,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn reference(&self) -> SegmentReference {
        SegmentReference::new(self.segment_number, self.sequence_number)
    }

    #[must_use]
    pub const fn is_in_use(&self) -> bool {
        self.flags.contains(SegmentFlags::IN_USE)
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.flags.contains(SegmentFlags::DIRECTORY)
    }

    /// A base segment has no back-reference.
    #[must_use]
    pub const fn is_base(&self) -> bool {
        self.base_segment.is_null()
    }

    const fn usa_offset(&self) -> u16 {
        if self.minor_version == 0 {
            USA_OFFSET_V0
        } else {
            USA_OFFSET_V1
        }
    }

    /// Offset of the first attribute record.
    #[must_use]
    pub fn first_attribute_offset(&self) -> usize {
        align8(usize::from(self.usa_offset()) + 2 * usa_count_for(self.bytes_allocated as usize))
    }

    /// Bytes a segment with these attributes would use, terminator included.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.first_attribute_offset()
            + self
                .attributes
                .iter()
                .map(|attr| attr.serialized_length() as usize)
                .sum::<usize>()
            + END_MARKER_LEN
    }

    /// Bytes still available for attribute records.
    #[must_use]
    pub fn free_space(&self) -> usize {
        (self.bytes_allocated as usize).saturating_sub(self.bytes_in_use())
    }

    /// Space available to attributes in an empty segment of this shape.
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.bytes_allocated as usize)
            .saturating_sub(self.first_attribute_offset() + END_MARKER_LEN)
    }

    #[must_use]
    pub fn find_attribute(&self, attribute_type: AttributeType, name: &str) -> Option<&AttributeRecord> {
        self.attributes
            .iter()
            .find(|attr| attr.attribute_type == attribute_type && attr.name == name)
    }

    /// Insert keeping (type, name, lowest VCN) order; assigns the instance.
    pub fn insert_attribute(&mut self, mut attribute: AttributeRecord) -> u16 {
        attribute.instance = self.next_attribute_instance;
        self.next_attribute_instance = self.next_attribute_instance.wrapping_add(1);
        let instance = attribute.instance;
        let position = self
            .attributes
            .partition_point(|existing| existing.sort_key() <= attribute.sort_key());
        self.attributes.insert(position, attribute);
        instance
    }

    /// Unprotected on-disk image of exactly `bytes_allocated` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let allocated = self.bytes_allocated as usize;
        let in_use = self.bytes_in_use();
        if in_use > allocated {
            return Err(NtfsError::out_of_space(format!(
                "segment {} needs {in_use} bytes, only {allocated} allocated",
                self.segment_number
            )));
        }
        let mut out = vec![0_u8; allocated];
        let usa_offset = self.usa_offset();
        let first_attribute = self.first_attribute_offset();
        out[0..4].copy_from_slice(FILE_SIGNATURE);
        write_le_u16(&mut out, 0x04, usa_offset)?;
        write_le_u16(&mut out, 0x06, usa_count_for(allocated) as u16)?;
        write_le_u64(&mut out, 0x08, self.lsn.get())?;
        write_le_u16(&mut out, 0x10, self.sequence_number)?;
        write_le_u16(&mut out, 0x12, self.hard_link_count)?;
        write_le_u16(&mut out, 0x14, first_attribute as u16)?;
        write_le_u16(&mut out, 0x16, self.flags.bits())?;
        write_le_u32(&mut out, 0x18, in_use as u32)?;
        write_le_u32(&mut out, 0x1C, self.bytes_allocated)?;
        write_le_u64(&mut out, 0x20, self.base_segment.to_u64())?;
        write_le_u16(&mut out, 0x28, self.next_attribute_instance)?;
        if self.minor_version != 0 {
            write_le_u32(&mut out, 0x2C, self.segment_number as u32)?;
        }
        write_le_u16(&mut out, usize::from(usa_offset), self.update_sequence_number)?;

        let mut pos = first_attribute;
        for attribute in &self.attributes {
            let len = attribute.serialized_length() as usize;
            attribute.serialize_into(&mut out[pos..pos + len])?;
            pos += len;
        }
        write_le_u32(&mut out, pos, END_MARKER)?;
        Ok(out)
    }

    /// Decode an unprotected image. `segment_number` identifies the slot it
    /// was read from (the v0 header does not record it).
    pub fn from_bytes(data: &[u8], segment_number: u64) -> Result<Self> {
        if data.len() < 0x30 || &data[0..4] != FILE_SIGNATURE {
            return Err(NtfsError::corrupt(
                "file record segment",
                format!("segment {segment_number} lacks FILE signature"),
            ));
        }
        let usa_offset = read_le_u16(data, 0x04)?;
        let minor_version = match usa_offset {
            USA_OFFSET_V0 => 0,
            USA_OFFSET_V1 => 1,
            other => {
                return Err(NtfsError::corrupt(
                    "file record segment",
                    format!("segment {segment_number} has unexpected array offset {other:#x}"),
                ));
            }
        };
        let first_attribute = usize::from(read_le_u16(data, 0x14)?);
        let bytes_in_use = read_le_u32(data, 0x18)? as usize;
        let bytes_allocated = read_le_u32(data, 0x1C)?;
        if bytes_allocated as usize != data.len()
            || bytes_in_use > data.len()
            || first_attribute >= bytes_in_use
        {
            return Err(NtfsError::corrupt(
                "file record segment",
                format!(
                    "segment {segment_number}: in use {bytes_in_use}, allocated {bytes_allocated}, buffer {}, first attribute {first_attribute:#x}",
                    data.len()
                ),
            ));
        }
        if minor_version == 1 {
            let recorded = u64::from(read_le_u32(data, 0x2C)?);
            if recorded != segment_number & 0xFFFF_FFFF {
                return Err(NtfsError::corrupt(
                    "file record segment",
                    format!("slot {segment_number} holds segment {recorded}"),
                ));
            }
        }

        let area = &data[..bytes_in_use];
        let mut attributes = Vec::new();
        let mut pos = first_attribute;
        loop {
            let type_code = read_le_u32(area, pos).map_err(|_| {
                NtfsError::corrupt(
                    "file record segment",
                    format!("segment {segment_number} attribute area lacks end marker"),
                )
            })?;
            if type_code == END_MARKER {
                break;
            }
            let attribute = AttributeRecord::parse(area, pos)?;
            pos += attribute.record_length_on_disk() as usize;
            attributes.push(attribute);
        }

        Ok(Self {
            segment_number,
            minor_version,
            lsn: Lsn(read_le_u64(data, 0x08)?),
            sequence_number: read_le_u16(data, 0x10)?,
            hard_link_count: read_le_u16(data, 0x12)?,
            flags: SegmentFlags::from_bits_retain(read_le_u16(data, 0x16)?),
            base_segment: SegmentReference::from_u64(read_le_u64(data, 0x20)?),
            next_attribute_instance: read_le_u16(data, 0x28)?,
            bytes_allocated,
            update_sequence_number: read_le_u16(data, usize::from(usa_offset))?,
            attributes,
        })
    }

    /// Verify the fixup of an on-disk image and decode it.
    pub fn decode(raw: &[u8], segment_number: u64) -> Result<Self> {
        let mut buf = raw.to_vec();
        unprotect(&mut buf, "file record segment")?;
        Self::from_bytes(&buf, segment_number)
    }

    /// Protected on-disk image with a fresh update sequence number.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = self.to_bytes()?;
        bump_and_protect(&mut buf, "file record segment")?;
        Ok(buf)
    }
}

/// Whether `raw` carries a FILE signature (used to tell formatted slots
/// from never-written ones).
#[must_use]
pub fn has_file_signature(raw: &[u8]) -> bool {
    raw.get(0..4) == Some(FILE_SIGNATURE.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(minor_version: u8) -> FileRecordSegment {
        let mut segment = FileRecordSegment::new(20, 3, 1024, minor_version);
        segment.hard_link_count = 1;
        segment.insert_attribute(AttributeRecord::resident(AttributeType::Data, "", b"payload".to_vec()));
        segment.insert_attribute(AttributeRecord::resident(
            AttributeType::StandardInformation,
            "",
            vec![0; 72],
        ));
        segment
    }

    #[test]
    fn test_attributes_kept_sorted_with_instances() {
        let segment = sample(1);
        assert_eq!(segment.attributes[0].attribute_type, AttributeType::StandardInformation);
        assert_eq!(segment.attributes[0].instance, 1);
        assert_eq!(segment.attributes[1].instance, 0);
        assert_eq!(segment.next_attribute_instance, 2);
    }

    #[test]
    fn test_round_trip_both_header_layouts() {
        for minor_version in [0, 1] {
            let segment = sample(minor_version);
            let encoded = segment.encode().unwrap();
            assert_eq!(encoded.len(), 1024);
            let decoded = FileRecordSegment::decode(&encoded, 20).unwrap();
            assert_eq!(decoded.minor_version, minor_version);
            assert_eq!(decoded.attributes.len(), 2);
            assert_eq!(decoded.update_sequence_number, 2, "case=usn_bumped");
            // Re-encoding the decoded form yields the same unprotected image
            // apart from the USN it was written with.
            let mut expected = segment.clone();
            expected.update_sequence_number = 2;
            assert_eq!(decoded.to_bytes().unwrap(), expected.to_bytes().unwrap());
            let first = if minor_version == 0 { 0x30 } else { 0x38 };
            assert_eq!(decoded.first_attribute_offset(), first);
        }
    }

    #[test]
    fn test_torn_segment_is_corrupt() {
        let mut encoded = sample(1).encode().unwrap();
        encoded[1022] ^= 0xFF;
        let err = FileRecordSegment::decode(&encoded, 20).unwrap_err();
        assert!(err.is_corruption(), "case=torn_second_sector err={err}");
    }

    #[test]
    fn test_wrong_slot_and_signature_rejected() {
        let encoded = sample(1).encode().unwrap();
        assert!(FileRecordSegment::decode(&encoded, 21).unwrap_err().is_corruption());
        assert!(!has_file_signature(&[0_u8; 16]));
        let err = FileRecordSegment::decode(&vec![0_u8; 1024], 20).unwrap_err();
        assert!(err.is_corruption(), "case=blank_slot err={err}");
    }

    #[test]
    fn test_overfull_segment_reports_out_of_space() {
        let mut segment = FileRecordSegment::new(30, 1, 1024, 1);
        segment.insert_attribute(AttributeRecord::resident(AttributeType::Data, "", vec![1; 2000]));
        assert!(segment.free_space() == 0);
        assert!(matches!(segment.to_bytes(), Err(NtfsError::OutOfSpace(_))));
    }
}
