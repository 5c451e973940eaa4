//! `$ATTRIBUTE_LIST` entries: where each attribute of a multi-segment file
//! record lives.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    SegmentReference, align8, read_le_u16, read_le_u32, read_le_u64, read_le_u8, read_utf16le,
    utf16_units, write_le_u16, write_le_u32, write_le_u64, write_le_u8, write_utf16le,
};

use crate::attribute::AttributeType;

const ENTRY_HEADER_LEN: usize = 0x1A;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListEntry {
    pub attribute_type: AttributeType,
    pub name: String,
    pub lowest_vcn: u64,
    pub segment: SegmentReference,
    pub instance: u16,
}

impl AttributeListEntry {
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        align8(ENTRY_HEADER_LEN + utf16_units(&self.name) * 2)
    }

    /// Whether this entry describes the attribute instance `(type, name,
    /// lowest_vcn)`.
    #[must_use]
    pub fn describes(&self, attribute_type: AttributeType, name: &str, lowest_vcn: u64) -> bool {
        self.attribute_type == attribute_type && self.name == name && self.lowest_vcn == lowest_vcn
    }
}

/// Decode every entry of a resident attribute list value.
pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0_usize;
    while pos < data.len() {
        let type_code = read_le_u32(data, pos)?;
        let length = usize::from(read_le_u16(data, pos + 0x04)?);
        if length < ENTRY_HEADER_LEN || pos + length > data.len() {
            return Err(NtfsError::corrupt(
                "attribute list",
                format!("entry at {pos:#x} has invalid length {length}"),
            ));
        }
        let name_units = usize::from(read_le_u8(data, pos + 0x06)?);
        let name_offset = usize::from(read_le_u8(data, pos + 0x07)?);
        let name = if name_units == 0 {
            String::new()
        } else {
            if name_offset + name_units * 2 > length {
                return Err(NtfsError::corrupt(
                    "attribute list",
                    format!("entry at {pos:#x} name overruns the entry"),
                ));
            }
            read_utf16le(data, pos + name_offset, name_units)?
        };
        entries.push(AttributeListEntry {
            attribute_type: AttributeType::from_code(type_code),
            name,
            lowest_vcn: read_le_u64(data, pos + 0x08)?,
            segment: SegmentReference::from_u64(read_le_u64(data, pos + 0x10)?),
            instance: read_le_u16(data, pos + 0x18)?,
        });
        pos += length;
    }
    Ok(entries)
}

/// Encode entries back into an attribute list value.
pub fn serialize_attribute_list(entries: &[AttributeListEntry]) -> Result<Vec<u8>> {
    let total = entries.iter().map(AttributeListEntry::encoded_len).sum();
    let mut out = vec![0_u8; total];
    let mut pos = 0;
    for entry in entries {
        let length = entry.encoded_len();
        let units = utf16_units(&entry.name);
        write_le_u32(&mut out, pos, entry.attribute_type.code())?;
        write_le_u16(&mut out, pos + 0x04, length as u16)?;
        write_le_u8(&mut out, pos + 0x06, units as u8)?;
        write_le_u8(&mut out, pos + 0x07, ENTRY_HEADER_LEN as u8)?;
        write_le_u64(&mut out, pos + 0x08, entry.lowest_vcn)?;
        write_le_u64(&mut out, pos + 0x10, entry.segment.to_u64())?;
        write_le_u16(&mut out, pos + 0x18, entry.instance)?;
        if units > 0 {
            write_utf16le(&mut out, pos + ENTRY_HEADER_LEN, &entry.name)?;
        }
        pos += length;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_list_round_trip() {
        let entries = vec![
            AttributeListEntry {
                attribute_type: AttributeType::StandardInformation,
                name: String::new(),
                lowest_vcn: 0,
                segment: SegmentReference::new(40, 2),
                instance: 0,
            },
            AttributeListEntry {
                attribute_type: AttributeType::IndexAllocation,
                name: "$I30".to_owned(),
                lowest_vcn: 0,
                segment: SegmentReference::new(41, 1),
                instance: 4,
            },
        ];
        let bytes = serialize_attribute_list(&entries).unwrap();
        assert_eq!(bytes.len(), 0x20 + 0x28);
        assert_eq!(parse_attribute_list(&bytes).unwrap(), entries);
        assert!(entries[1].describes(AttributeType::IndexAllocation, "$I30", 0));
    }

    #[test]
    fn test_attribute_list_rejects_bad_length() {
        let mut bytes = serialize_attribute_list(&[AttributeListEntry {
            attribute_type: AttributeType::Data,
            name: String::new(),
            lowest_vcn: 0,
            segment: SegmentReference::new(16, 1),
            instance: 1,
        }])
        .unwrap();
        write_le_u16(&mut bytes, 0x04, 0x40).unwrap();
        assert!(parse_attribute_list(&bytes).unwrap_err().is_corruption());
    }
}
