//! Attribute records: the common header plus the resident and non-resident
//! forms.

use std::cmp::Ordering;

use bitflags::bitflags;
use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    align8, ensure_slice, read_le_u16, read_le_u32, read_le_u64, read_le_u8, read_utf16le,
    utf16_units, write_le_u16, write_le_u32, write_le_u64, write_le_u8, write_utf16le,
};
use serde::{Deserialize, Serialize};

use crate::data_run::DataRunSequence;

const RESIDENT_HEADER_LEN: usize = 0x18;
const NON_RESIDENT_HEADER_LEN: usize = 0x40;
const NON_RESIDENT_HEADER_LEN_EXT: usize = 0x48;

/// Marker closing the attribute area of a segment.
pub const END_MARKER: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// Attribute type codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    LoggedUtilityStream,
    End,
    /// Type code this engine does not interpret; carried through opaquely.
    Unknown(u32),
}

impl AttributeType {
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x10 => Self::StandardInformation,
            0x20 => Self::AttributeList,
            0x30 => Self::FileName,
            0x40 => Self::ObjectId,
            0x50 => Self::SecurityDescriptor,
            0x60 => Self::VolumeName,
            0x70 => Self::VolumeInformation,
            0x80 => Self::Data,
            0x90 => Self::IndexRoot,
            0xA0 => Self::IndexAllocation,
            0xB0 => Self::Bitmap,
            0xC0 => Self::ReparsePoint,
            0xD0 => Self::EaInformation,
            0xE0 => Self::Ea,
            0x100 => Self::LoggedUtilityStream,
            END_MARKER => Self::End,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::StandardInformation => 0x10,
            Self::AttributeList => 0x20,
            Self::FileName => 0x30,
            Self::ObjectId => 0x40,
            Self::SecurityDescriptor => 0x50,
            Self::VolumeName => 0x60,
            Self::VolumeInformation => 0x70,
            Self::Data => 0x80,
            Self::IndexRoot => 0x90,
            Self::IndexAllocation => 0xA0,
            Self::Bitmap => 0xB0,
            Self::ReparsePoint => 0xC0,
            Self::EaInformation => 0xD0,
            Self::Ea => 0xE0,
            Self::LoggedUtilityStream => 0x100,
            Self::End => END_MARKER,
            Self::Unknown(code) => code,
        }
    }
}

impl PartialOrd for AttributeType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code().cmp(&other.code())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AttributeFlags: u16 {
        const COMPRESSED = 0x0001;
        const ENCRYPTED = 0x4000;
        const SPARSE = 0x8000;
    }
}

// ---------------------------------------------------------------------------
// Record forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResidentValue {
    pub data: Vec<u8>,
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonResidentValue {
    pub lowest_vcn: i64,
    /// `lowest_vcn - 1` for an extent that maps no clusters.
    pub highest_vcn: i64,
    pub compression_unit: u8,
    pub allocated_length: u64,
    pub data_length: u64,
    pub valid_data_length: u64,
    /// Present only for compressed or sparse attributes.
    pub total_allocated: Option<u64>,
    pub runs: DataRunSequence,
}

impl NonResidentValue {
    /// Empty extent starting at VCN 0.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            lowest_vcn: 0,
            highest_vcn: -1,
            compression_unit: 0,
            allocated_length: 0,
            data_length: 0,
            valid_data_length: 0,
            total_allocated: None,
            runs: DataRunSequence::new(),
        }
    }

    /// Extent covering `runs`, with lengths derived from `cluster_size`.
    #[must_use]
    pub fn from_runs(runs: DataRunSequence, data_length: u64, cluster_size: u64) -> Self {
        let clusters = runs.cluster_count();
        Self {
            lowest_vcn: 0,
            highest_vcn: clusters as i64 - 1,
            compression_unit: 0,
            allocated_length: clusters * cluster_size,
            data_length,
            valid_data_length: data_length,
            total_allocated: None,
            runs,
        }
    }

    /// Recompute `highest_vcn` and `allocated_length` after the run list
    /// changed.
    pub fn sync_extent(&mut self, cluster_size: u64) {
        let clusters = self.runs.cluster_count();
        self.highest_vcn = self.lowest_vcn + clusters as i64 - 1;
        self.allocated_length = clusters * cluster_size;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Resident(ResidentValue),
    NonResident(NonResidentValue),
}

// ---------------------------------------------------------------------------
// AttributeRecord
// ---------------------------------------------------------------------------

/// One attribute record as stored inside a file record segment.
///
/// `Clone` is a deep copy; nothing in a record is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub attribute_type: AttributeType,
    pub name: String,
    pub flags: AttributeFlags,
    pub instance: u16,
    pub value: AttributeValue,
    /// Length the record occupied when parsed; 0 for records built in
    /// memory. Re-serialization never emits less than this.
    record_length_on_disk: u32,
}

impl AttributeRecord {
    #[must_use]
    pub fn resident(attribute_type: AttributeType, name: &str, data: Vec<u8>) -> Self {
        Self {
            attribute_type,
            name: name.to_owned(),
            flags: AttributeFlags::empty(),
            instance: 0,
            value: AttributeValue::Resident(ResidentValue {
                data,
                indexed: false,
            }),
            record_length_on_disk: 0,
        }
    }

    #[must_use]
    pub fn non_resident(attribute_type: AttributeType, name: &str, value: NonResidentValue) -> Self {
        Self {
            attribute_type,
            name: name.to_owned(),
            flags: AttributeFlags::empty(),
            instance: 0,
            value: AttributeValue::NonResident(value),
            record_length_on_disk: 0,
        }
    }

    #[must_use]
    pub const fn is_resident(&self) -> bool {
        matches!(self.value, AttributeValue::Resident(_))
    }

    #[must_use]
    pub const fn resident_value(&self) -> Option<&ResidentValue> {
        match &self.value {
            AttributeValue::Resident(value) => Some(value),
            AttributeValue::NonResident(_) => None,
        }
    }

    pub fn resident_value_mut(&mut self) -> Option<&mut ResidentValue> {
        match &mut self.value {
            AttributeValue::Resident(value) => Some(value),
            AttributeValue::NonResident(_) => None,
        }
    }

    #[must_use]
    pub const fn non_resident_value(&self) -> Option<&NonResidentValue> {
        match &self.value {
            AttributeValue::NonResident(value) => Some(value),
            AttributeValue::Resident(_) => None,
        }
    }

    pub fn non_resident_value_mut(&mut self) -> Option<&mut NonResidentValue> {
        match &mut self.value {
            AttributeValue::NonResident(value) => Some(value),
            AttributeValue::Resident(_) => None,
        }
    }

    /// Resident payload, or `CorruptFormat` if the record is non-resident.
    pub fn resident_data(&self) -> Result<&[u8]> {
        self.resident_value()
            .map(|value| value.data.as_slice())
            .ok_or_else(|| {
                NtfsError::corrupt(
                    "attribute",
                    format!("{:?} attribute expected resident", self.attribute_type),
                )
            })
    }

    /// Replace the resident payload and release any reserved slack.
    pub fn set_resident_data(&mut self, data: Vec<u8>) -> Result<()> {
        let attribute_type = self.attribute_type;
        let value = self.resident_value_mut().ok_or_else(|| {
            NtfsError::InvalidArgument(format!("{attribute_type:?} attribute is not resident"))
        })?;
        value.data = data;
        self.record_length_on_disk = 0;
        Ok(())
    }

    /// Replace the whole value (e.g. resident to non-resident conversion).
    pub fn set_value(&mut self, value: AttributeValue) {
        self.value = value;
        self.record_length_on_disk = 0;
    }

    /// Logical length of the attribute value.
    #[must_use]
    pub fn data_length(&self) -> u64 {
        match &self.value {
            AttributeValue::Resident(value) => value.data.len() as u64,
            AttributeValue::NonResident(value) => value.data_length,
        }
    }

    /// Space reserved for the value.
    #[must_use]
    pub fn allocated_length(&self) -> u64 {
        match &self.value {
            AttributeValue::Resident(value) => align8(value.data.len()) as u64,
            AttributeValue::NonResident(value) => value.allocated_length,
        }
    }

    /// Lowest VCN for non-resident extents, 0 otherwise.
    #[must_use]
    pub fn lowest_vcn(&self) -> u64 {
        self.non_resident_value()
            .map_or(0, |value| value.lowest_vcn.max(0) as u64)
    }

    /// Sort key inside a segment: type, then name, then starting VCN.
    #[must_use]
    pub fn sort_key(&self) -> (u32, &str, u64) {
        (self.attribute_type.code(), self.name.as_str(), self.lowest_vcn())
    }

    fn header_len(&self) -> usize {
        match &self.value {
            AttributeValue::Resident(_) => RESIDENT_HEADER_LEN,
            AttributeValue::NonResident(value) if value.total_allocated.is_some() => {
                NON_RESIDENT_HEADER_LEN_EXT
            }
            AttributeValue::NonResident(_) => NON_RESIDENT_HEADER_LEN,
        }
    }

    fn body_offset(&self) -> usize {
        align8(self.header_len() + utf16_units(&self.name) * 2)
    }

    /// Length this record encodes to, ignoring any slack it was parsed with.
    #[must_use]
    pub fn record_length(&self) -> u32 {
        let body = match &self.value {
            AttributeValue::Resident(value) => value.data.len(),
            AttributeValue::NonResident(value) => value.runs.encoded_len(),
        };
        align8(self.body_offset() + body) as u32
    }

    /// Length the record occupied on disk when parsed (0 if built in memory).
    #[must_use]
    pub const fn record_length_on_disk(&self) -> u32 {
        self.record_length_on_disk
    }

    /// Bytes this record takes when serialized.
    #[must_use]
    pub fn serialized_length(&self) -> u32 {
        self.record_length().max(self.record_length_on_disk)
    }

    /// Parse the record starting at `offset` in `data`, which is the segment
    /// buffer limited to its bytes in use.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let type_code = read_le_u32(data, offset)?;
        if type_code == END_MARKER {
            return Err(NtfsError::corrupt(
                "attribute",
                format!("end marker where a record was expected at {offset:#x}"),
            ));
        }
        let record_length = read_le_u32(data, offset + 0x04)? as usize;
        if record_length < RESIDENT_HEADER_LEN || record_length % 8 != 0 {
            return Err(NtfsError::corrupt(
                "attribute",
                format!("record length {record_length} at {offset:#x} invalid"),
            ));
        }
        let record = ensure_slice(data, offset, record_length).map_err(|_| {
            NtfsError::corrupt(
                "attribute",
                format!(
                    "record at {offset:#x} of length {record_length} extends past segment end {}",
                    data.len()
                ),
            )
        })?;

        let non_resident = read_le_u8(record, 0x08)? != 0;
        let name_units = usize::from(read_le_u8(record, 0x09)?);
        let name_offset = usize::from(read_le_u16(record, 0x0A)?);
        let flags = AttributeFlags::from_bits_retain(read_le_u16(record, 0x0C)?);
        let instance = read_le_u16(record, 0x0E)?;
        let name = if name_units == 0 {
            String::new()
        } else {
            if name_offset + name_units * 2 > record_length {
                return Err(NtfsError::corrupt(
                    "attribute",
                    format!("name at {name_offset:#x} overruns record at {offset:#x}"),
                ));
            }
            read_utf16le(record, name_offset, name_units)?
        };

        let value = if non_resident {
            Self::parse_non_resident(record, flags, offset)?
        } else {
            let value_length = read_le_u32(record, 0x10)? as usize;
            let value_offset = usize::from(read_le_u16(record, 0x14)?);
            let indexed = read_le_u8(record, 0x16)? & 0x01 != 0;
            let end = value_offset.checked_add(value_length);
            if end.is_none_or(|end| end > record_length) || value_offset < RESIDENT_HEADER_LEN {
                return Err(NtfsError::corrupt(
                    "attribute",
                    format!(
                        "resident value {value_offset:#x}+{value_length} outside record of {record_length} bytes at {offset:#x}"
                    ),
                ));
            }
            AttributeValue::Resident(ResidentValue {
                data: record[value_offset..value_offset + value_length].to_vec(),
                indexed,
            })
        };

        Ok(Self {
            attribute_type: AttributeType::from_code(type_code),
            name,
            flags,
            instance,
            value,
            record_length_on_disk: record_length as u32,
        })
    }

    fn parse_non_resident(
        record: &[u8],
        flags: AttributeFlags,
        offset: usize,
    ) -> Result<AttributeValue> {
        if record.len() < NON_RESIDENT_HEADER_LEN {
            return Err(NtfsError::corrupt(
                "attribute",
                format!("non-resident record at {offset:#x} shorter than its header"),
            ));
        }
        let lowest_vcn = read_le_u64(record, 0x10)? as i64;
        let highest_vcn = read_le_u64(record, 0x18)? as i64;
        let mapping_pairs_offset = usize::from(read_le_u16(record, 0x20)?);
        let compression_unit = read_le_u8(record, 0x22)?;
        let allocated_length = read_le_u64(record, 0x28)?;
        let data_length = read_le_u64(record, 0x30)?;
        let valid_data_length = read_le_u64(record, 0x38)?;
        let extended = flags.intersects(AttributeFlags::COMPRESSED | AttributeFlags::SPARSE);
        let total_allocated = if extended {
            Some(read_le_u64(record, 0x40)?)
        } else {
            None
        };
        if mapping_pairs_offset >= record.len() || mapping_pairs_offset < NON_RESIDENT_HEADER_LEN {
            return Err(NtfsError::corrupt(
                "attribute",
                format!("mapping pairs offset {mapping_pairs_offset:#x} invalid at {offset:#x}"),
            ));
        }
        let runs = DataRunSequence::decode(&record[mapping_pairs_offset..])?;
        let covered = runs.cluster_count() as i64;
        if highest_vcn.wrapping_sub(lowest_vcn).wrapping_add(1) != covered {
            return Err(NtfsError::corrupt(
                "attribute",
                format!(
                    "runs cover {covered} clusters but header spans vcn {lowest_vcn}..={highest_vcn} at {offset:#x}"
                ),
            ));
        }
        Ok(AttributeValue::NonResident(NonResidentValue {
            lowest_vcn,
            highest_vcn,
            compression_unit,
            allocated_length,
            data_length,
            valid_data_length,
            total_allocated,
            runs,
        }))
    }

    /// Serialize into a fresh buffer of [`Self::serialized_length`] bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let length = self.serialized_length() as usize;
        let mut out = vec![0_u8; length];
        self.serialize_into(&mut out)?;
        Ok(out)
    }

    /// Serialize into `out`, which must be exactly
    /// [`Self::serialized_length`] bytes.
    pub fn serialize_into(&self, out: &mut [u8]) -> Result<()> {
        let length = self.serialized_length() as usize;
        if out.len() != length {
            return Err(NtfsError::internal(format!(
                "attribute buffer is {} bytes, record needs {length}",
                out.len()
            )));
        }
        let name_units = utf16_units(&self.name);
        let name_units_u8 = u8::try_from(name_units).map_err(|_| {
            NtfsError::InvalidArgument(format!("attribute name {:?} too long", self.name))
        })?;
        let header_len = self.header_len();
        let body_offset = self.body_offset();

        write_le_u32(out, 0x00, self.attribute_type.code())?;
        write_le_u32(out, 0x04, length as u32)?;
        write_le_u8(out, 0x08, u8::from(!self.is_resident()))?;
        write_le_u8(out, 0x09, name_units_u8)?;
        write_le_u16(out, 0x0A, if name_units == 0 { 0 } else { header_len as u16 })?;
        write_le_u16(out, 0x0C, self.flags.bits())?;
        write_le_u16(out, 0x0E, self.instance)?;
        if name_units > 0 {
            write_utf16le(out, header_len, &self.name)?;
        }

        match &self.value {
            AttributeValue::Resident(value) => {
                write_le_u32(out, 0x10, value.data.len() as u32)?;
                write_le_u16(out, 0x14, body_offset as u16)?;
                write_le_u8(out, 0x16, u8::from(value.indexed))?;
                out[body_offset..body_offset + value.data.len()].copy_from_slice(&value.data);
            }
            AttributeValue::NonResident(value) => {
                write_le_u64(out, 0x10, value.lowest_vcn as u64)?;
                write_le_u64(out, 0x18, value.highest_vcn as u64)?;
                write_le_u16(out, 0x20, body_offset as u16)?;
                write_le_u8(out, 0x22, value.compression_unit)?;
                write_le_u64(out, 0x28, value.allocated_length)?;
                write_le_u64(out, 0x30, value.data_length)?;
                write_le_u64(out, 0x38, value.valid_data_length)?;
                if let Some(total) = value.total_allocated {
                    write_le_u64(out, 0x40, total)?;
                }
                let runs = value.runs.encode();
                out[body_offset..body_offset + runs.len()].copy_from_slice(&runs);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_run::DataRun;

    #[test]
    fn test_resident_round_trip_with_name() {
        let mut record = AttributeRecord::resident(AttributeType::Data, "stream", b"hello".to_vec());
        record.instance = 3;
        let bytes = record.serialize().unwrap();
        assert_eq!(bytes.len() % 8, 0);
        // header 0x18 + 12 bytes of name -> value at 0x28, 5 bytes -> 0x30.
        assert_eq!(bytes.len(), 0x30);
        assert_eq!(read_le_u16(&bytes, 0x14).unwrap(), 0x28);

        let parsed = AttributeRecord::parse(&bytes, 0).unwrap();
        assert_eq!(parsed.name, "stream");
        assert_eq!(parsed.resident_data().unwrap(), b"hello");
        assert_eq!(parsed.instance, 3);
        assert_eq!(parsed.record_length_on_disk(), 0x30);
        assert_eq!(parsed.serialize().unwrap(), bytes);
    }

    #[test]
    fn test_non_resident_round_trip() {
        let runs =
            DataRunSequence::from_runs(vec![DataRun::new(8, 0x1000), DataRun::new(2, 0x40)]).unwrap();
        let value = NonResidentValue::from_runs(runs, 37_000, 4096);
        let record = AttributeRecord::non_resident(AttributeType::Data, "", value);
        let bytes = record.serialize().unwrap();
        let parsed = AttributeRecord::parse(&bytes, 0).unwrap();
        let parsed_value = parsed.non_resident_value().unwrap();
        assert_eq!(parsed_value.highest_vcn, 9);
        assert_eq!(parsed.allocated_length(), 40_960);
        assert_eq!(parsed.data_length(), 37_000);
        assert_eq!(parsed, AttributeRecord { record_length_on_disk: bytes.len() as u32, ..record });
    }

    #[test]
    fn test_resident_value_outside_record_is_corrupt() {
        let record = AttributeRecord::resident(AttributeType::Data, "", vec![1, 2, 3]);
        let mut bytes = record.serialize().unwrap();
        write_le_u32(&mut bytes, 0x10, 64).unwrap();
        let err = AttributeRecord::parse(&bytes, 0).unwrap_err();
        assert!(err.is_corruption(), "case=value_length_overrun err={err}");

        // Record longer than the segment buffer handed in.
        let bytes = record.serialize().unwrap();
        let err = AttributeRecord::parse(&bytes[..bytes.len() - 8], 0).unwrap_err();
        assert!(err.is_corruption(), "case=record_past_segment err={err}");
    }

    #[test]
    fn test_vcn_mismatch_is_corrupt() {
        let runs = DataRunSequence::from_runs(vec![DataRun::new(4, 10)]).unwrap();
        let mut value = NonResidentValue::from_runs(runs, 100, 512);
        value.highest_vcn = 7;
        let bytes = AttributeRecord::non_resident(AttributeType::Data, "", value)
            .serialize()
            .unwrap();
        let err = AttributeRecord::parse(&bytes, 0).unwrap_err();
        assert!(err.is_corruption(), "case=vcn_count_mismatch err={err}");
    }

    #[test]
    fn test_slack_preserved_until_value_changes() {
        let record = AttributeRecord::resident(AttributeType::Data, "", vec![9; 4]);
        let mut bytes = record.serialize().unwrap();
        // Pretend the on-disk slot reserved 16 extra bytes.
        let slot = bytes.len() + 16;
        bytes.resize(slot, 0);
        write_le_u32(&mut bytes, 0x04, slot as u32).unwrap();

        let mut parsed = AttributeRecord::parse(&bytes, 0).unwrap();
        assert_eq!(parsed.record_length(), 0x20);
        assert_eq!(parsed.serialized_length() as usize, slot);
        assert_eq!(parsed.serialize().unwrap(), bytes, "case=unmodified_keeps_slot");

        parsed.set_resident_data(vec![1]).unwrap();
        assert_eq!(parsed.serialized_length(), 0x20, "case=rewrite_drops_slack");
    }

    #[test]
    fn test_unknown_type_preserved() {
        let record = AttributeRecord::resident(AttributeType::from_code(0x1234), "", vec![7; 9]);
        let bytes = record.serialize().unwrap();
        let parsed = AttributeRecord::parse(&bytes, 0).unwrap();
        assert_eq!(parsed.attribute_type, AttributeType::Unknown(0x1234));
        assert_eq!(parsed.attribute_type.code(), 0x1234);
        assert!(AttributeType::FileName < AttributeType::Data);
    }
}
