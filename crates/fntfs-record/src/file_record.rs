//! Logical file records assembled from one or more segments.
//!
//! [`FileRecord::parse`] deep-copies every attribute out of the segments it
//! is given, so the assembled view can be edited freely. Writing changes back
//! goes through [`FileRecord::update_segments`], which re-partitions the
//! attribute set over the base segment and as many extension segments as
//! needed, driven by the `$ATTRIBUTE_LIST`.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{SegmentReference, align8, utf16_units};

use crate::attribute::{AttributeRecord, AttributeType, AttributeValue, NonResidentValue};
use crate::attribute_list::{AttributeListEntry, parse_attribute_list, serialize_attribute_list};
use crate::data_run::DataRunSequence;
use crate::file_name::{FileNameAttribute, FileNamespace};
use crate::segment::{FileRecordSegment, SegmentFlags};
use crate::standard_information::StandardInformation;

/// Source of fresh extension segments.
pub trait SegmentAllocator {
    /// Reserve a free segment and return its reference (with the sequence
    /// number the new segment must carry).
    fn allocate_segment(&mut self) -> Result<SegmentReference>;
}

/// Result of [`FileRecord::update_segments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Base segment first, then extensions in segment-number order.
    pub segments: Vec<FileRecordSegment>,
    /// Extension segments that no longer hold any attribute.
    pub released: Vec<SegmentReference>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Base header with its attribute vector emptied.
    base: FileRecordSegment,
    /// Extension headers, attributes emptied.
    extensions: Vec<FileRecordSegment>,
    attributes: Vec<AttributeRecord>,
}

impl FileRecord {
    /// Fresh single-segment record.
    #[must_use]
    pub fn new(reference: SegmentReference, bytes_per_segment: u32, minor_version: u8) -> Self {
        let base = FileRecordSegment::new(
            reference.segment_number(),
            reference.sequence_number(),
            bytes_per_segment,
            minor_version,
        );
        Self {
            base,
            extensions: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Assemble a record from its base segment followed by any extension
    /// segments. Attributes are copied out in segment order.
    pub fn parse(segments: &[FileRecordSegment]) -> Result<Self> {
        let (base, rest) = segments.split_first().ok_or_else(|| {
            NtfsError::InvalidArgument("file record needs at least one segment".to_owned())
        })?;
        if !base.is_base() {
            return Err(NtfsError::corrupt(
                "file record",
                format!(
                    "segment {} is an extension of {}, not a base segment",
                    base.segment_number, base.base_segment
                ),
            ));
        }
        let base_reference = base.reference();
        let mut attributes: Vec<AttributeRecord> = base.attributes.clone();
        let mut extensions = Vec::with_capacity(rest.len());
        for extension in rest {
            if extension.base_segment != base_reference {
                return Err(NtfsError::corrupt(
                    "file record",
                    format!(
                        "extension {} points at {}, expected {base_reference}",
                        extension.segment_number, extension.base_segment
                    ),
                ));
            }
            attributes.extend(extension.attributes.iter().cloned());
            extensions.push(FileRecordSegment {
                attributes: Vec::new(),
                ..extension.clone()
            });
        }
        attributes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let record = Self {
            base: FileRecordSegment {
                attributes: Vec::new(),
                ..base.clone()
            },
            extensions,
            attributes,
        };
        for entry in record.attribute_list()? {
            let present = entry.segment == base_reference
                || record.extensions.iter().any(|ext| ext.reference() == entry.segment);
            if !present {
                return Err(NtfsError::corrupt(
                    "file record",
                    format!(
                        "attribute list names segment {} which was not supplied",
                        entry.segment
                    ),
                ));
            }
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Header accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn reference(&self) -> SegmentReference {
        self.base.reference()
    }

    #[must_use]
    pub const fn segment_number(&self) -> u64 {
        self.base.segment_number
    }

    #[must_use]
    pub const fn sequence_number(&self) -> u16 {
        self.base.sequence_number
    }

    #[must_use]
    pub const fn hard_link_count(&self) -> u16 {
        self.base.hard_link_count
    }

    pub fn set_hard_link_count(&mut self, count: u16) {
        self.base.hard_link_count = count;
    }

    #[must_use]
    pub const fn flags(&self) -> SegmentFlags {
        self.base.flags
    }

    pub fn set_flags(&mut self, flags: SegmentFlags) {
        self.base.flags = flags;
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.base.is_directory()
    }

    #[must_use]
    pub const fn is_in_use(&self) -> bool {
        self.base.is_in_use()
    }

    #[must_use]
    pub const fn bytes_per_segment(&self) -> u32 {
        self.base.bytes_allocated
    }

    #[must_use]
    pub const fn minor_version(&self) -> u8 {
        self.base.minor_version
    }

    /// References of the extension segments this record was assembled from.
    #[must_use]
    pub fn extension_references(&self) -> Vec<SegmentReference> {
        self.extensions.iter().map(FileRecordSegment::reference).collect()
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn attributes(&self) -> &[AttributeRecord] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<AttributeRecord> {
        &mut self.attributes
    }

    #[must_use]
    pub fn find_attribute(&self, attribute_type: AttributeType, name: &str) -> Option<&AttributeRecord> {
        self.attributes
            .iter()
            .find(|attr| attr.attribute_type == attribute_type && attr.name == name)
    }

    pub fn find_attribute_mut(
        &mut self,
        attribute_type: AttributeType,
        name: &str,
    ) -> Option<&mut AttributeRecord> {
        self.attributes
            .iter_mut()
            .find(|attr| attr.attribute_type == attribute_type && attr.name == name)
    }

    /// Add an attribute, assigning the next instance number of the record.
    pub fn add_attribute(&mut self, mut attribute: AttributeRecord) -> u16 {
        let instance = self.base.next_attribute_instance;
        self.base.next_attribute_instance = instance.wrapping_add(1);
        attribute.instance = instance;
        let position = self
            .attributes
            .partition_point(|existing| existing.sort_key() <= attribute.sort_key());
        self.attributes.insert(position, attribute);
        instance
    }

    /// Remove every extent of the named attribute; returns how many records
    /// were removed.
    pub fn remove_attribute(&mut self, attribute_type: AttributeType, name: &str) -> usize {
        let before = self.attributes.len();
        self.attributes
            .retain(|attr| !(attr.attribute_type == attribute_type && attr.name == name));
        before - self.attributes.len()
    }

    /// Decoded `$ATTRIBUTE_LIST` entries (empty for single-segment records).
    pub fn attribute_list(&self) -> Result<Vec<AttributeListEntry>> {
        match self.find_attribute(AttributeType::AttributeList, "") {
            None => Ok(Vec::new()),
            Some(list) => match &list.value {
                AttributeValue::Resident(value) => parse_attribute_list(&value.data),
                AttributeValue::NonResident(_) => Err(NtfsError::unsupported(
                    "non-resident attribute list",
                )),
            },
        }
    }

    /// `$STANDARD_INFORMATION`, decoded from the current attribute bytes.
    pub fn standard_information(&self) -> Result<StandardInformation> {
        let attribute = self
            .find_attribute(AttributeType::StandardInformation, "")
            .ok_or_else(|| {
                NtfsError::corrupt(
                    "file record",
                    format!("segment {} has no standard information", self.segment_number()),
                )
            })?;
        StandardInformation::parse(attribute.resident_data()?)
    }

    pub fn set_standard_information(&mut self, info: &StandardInformation) -> Result<()> {
        let bytes = info.serialize()?;
        match self.find_attribute_mut(AttributeType::StandardInformation, "") {
            Some(attribute) => {
                if attribute.resident_data()? != bytes.as_slice() {
                    attribute.set_resident_data(bytes)?;
                }
            }
            None => {
                self.add_attribute(AttributeRecord::resident(
                    AttributeType::StandardInformation,
                    "",
                    bytes,
                ));
            }
        }
        Ok(())
    }

    /// Every `$FILE_NAME`, decoded from the current attribute bytes.
    pub fn file_names(&self) -> Result<Vec<FileNameAttribute>> {
        self.attributes
            .iter()
            .filter(|attr| attr.attribute_type == AttributeType::FileName)
            .map(|attr| FileNameAttribute::parse(attr.resident_data()?))
            .collect()
    }

    /// The long (Win32 or POSIX) name, falling back to any name present.
    pub fn file_name(&self) -> Result<Option<FileNameAttribute>> {
        let mut names = self.file_names()?;
        let preferred = names
            .iter()
            .position(|name| name.namespace != FileNamespace::Dos);
        Ok(match preferred {
            Some(index) => Some(names.swap_remove(index)),
            None => names.pop(),
        })
    }

    /// Unnamed `$DATA` extents, lowest VCN first.
    #[must_use]
    pub fn data_extents(&self) -> Vec<&AttributeRecord> {
        let mut extents: Vec<&AttributeRecord> = self
            .attributes
            .iter()
            .filter(|attr| attr.attribute_type == AttributeType::Data && attr.name.is_empty())
            .collect();
        extents.sort_by_key(|attr| attr.lowest_vcn());
        extents
    }

    /// The unnamed `$DATA` attribute's first extent.
    #[must_use]
    pub fn data_attribute(&self) -> Option<&AttributeRecord> {
        self.data_extents().into_iter().next()
    }

    /// Logical size of the unnamed data stream.
    #[must_use]
    pub fn data_length(&self) -> u64 {
        self.data_attribute().map_or(0, AttributeRecord::data_length)
    }

    /// Run list of a non-resident attribute, joined across extents.
    pub fn joined_runs(&self, attribute_type: AttributeType, name: &str) -> Result<DataRunSequence> {
        let mut extents: Vec<&NonResidentValue> = self
            .attributes
            .iter()
            .filter(|attr| attr.attribute_type == attribute_type && attr.name == name)
            .filter_map(AttributeRecord::non_resident_value)
            .collect();
        extents.sort_by_key(|value| value.lowest_vcn);
        let mut joined = DataRunSequence::new();
        for value in extents {
            if value.lowest_vcn as u64 != joined.cluster_count() {
                return Err(NtfsError::corrupt(
                    "file record",
                    format!(
                        "{attribute_type:?} extent starts at vcn {} but previous extents end at {}",
                        value.lowest_vcn,
                        joined.cluster_count()
                    ),
                ));
            }
            for run in value.runs.runs() {
                joined.push(*run);
            }
        }
        Ok(joined)
    }

    // -----------------------------------------------------------------------
    // Re-partitioning
    // -----------------------------------------------------------------------

    /// Lay the current attributes out over segments of `bytes_per_segment`
    /// bytes using the given header layout.
    ///
    /// Each attribute stays in the segment the attribute list last placed it
    /// in when it still fits there, so an unmodified record reproduces its
    /// segments byte for byte. New or displaced attributes go to the base
    /// segment, then to existing extensions, then to extensions obtained from
    /// `allocator`.
    pub fn update_segments(
        &self,
        bytes_per_segment: u32,
        minor_version: u8,
        allocator: &mut dyn SegmentAllocator,
    ) -> Result<SegmentLayout> {
        let mut base = FileRecordSegment {
            minor_version,
            bytes_allocated: bytes_per_segment,
            attributes: Vec::new(),
            ..self.base.clone()
        };
        let previous_list = self.attribute_list()?;
        let payload: Vec<&AttributeRecord> = self
            .attributes
            .iter()
            .filter(|attr| attr.attribute_type != AttributeType::AttributeList)
            .collect();

        let fits_single = base.first_attribute_offset()
            + payload
                .iter()
                .map(|attr| attr.serialized_length() as usize)
                .sum::<usize>()
            + 8
            <= bytes_per_segment as usize;
        if previous_list.is_empty() && fits_single {
            base.attributes = payload.into_iter().cloned().collect();
            let released = self.extension_references();
            return Ok(SegmentLayout {
                segments: vec![base],
                released,
            });
        }

        // Reserve room in the base segment for the attribute list itself.
        let list_len = align8(
            0x18 + payload
                .iter()
                .map(|attr| align8(0x1A + utf16_units(&attr.name) * 2))
                .sum::<usize>(),
        );
        let existing_list = self.find_attribute(AttributeType::AttributeList, "");
        let list_reserve = existing_list
            .map_or(list_len, |list| list_len.max(list.serialized_length() as usize));

        let mut extensions: Vec<FileRecordSegment> = self
            .extensions
            .iter()
            .map(|ext| FileRecordSegment {
                minor_version,
                bytes_allocated: bytes_per_segment,
                attributes: Vec::new(),
                ..ext.clone()
            })
            .collect();
        let mut base_used = base.first_attribute_offset() + 8 + list_reserve;
        if base_used > bytes_per_segment as usize {
            return Err(NtfsError::out_of_space(format!(
                "attribute list of {list_len} bytes does not fit segment {}",
                base.segment_number
            )));
        }
        let base_reference = base.reference();
        let mut entries = Vec::with_capacity(payload.len());

        for attribute in payload {
            let len = attribute.serialized_length() as usize;
            let previous = previous_list
                .iter()
                .find(|entry| {
                    entry.describes(attribute.attribute_type, &attribute.name, attribute.lowest_vcn())
                })
                .map(|entry| entry.segment);

            let mut placed: Option<SegmentReference> = None;
            if let Some(previous) = previous {
                if previous == base_reference {
                    if base_used + len <= bytes_per_segment as usize {
                        placed = Some(base_reference);
                    }
                } else if let Some(ext) = extensions.iter().find(|ext| ext.reference() == previous) {
                    if ext.bytes_in_use() + len <= bytes_per_segment as usize {
                        placed = Some(previous);
                    }
                }
            }
            let target = match placed {
                Some(target) => target,
                None if attribute.attribute_type == AttributeType::StandardInformation
                    || base_used + len <= bytes_per_segment as usize =>
                {
                    base_reference
                }
                None => {
                    match extensions
                        .iter()
                        .find(|ext| ext.bytes_in_use() + len <= bytes_per_segment as usize)
                    {
                        Some(ext) => ext.reference(),
                        None => {
                            let reference = allocator.allocate_segment()?;
                            let mut ext = FileRecordSegment::new(
                                reference.segment_number(),
                                reference.sequence_number(),
                                bytes_per_segment,
                                minor_version,
                            );
                            ext.base_segment = base_reference;
                            if ext.bytes_in_use() + len > bytes_per_segment as usize {
                                return Err(NtfsError::out_of_space(format!(
                                    "{:?} attribute of {len} bytes exceeds an empty segment",
                                    attribute.attribute_type
                                )));
                            }
                            tracing::debug!(
                                target: "fntfs::record",
                                base = %base_reference,
                                extension = %reference,
                                "allocated extension segment"
                            );
                            extensions.push(ext);
                            reference
                        }
                    }
                }
            };

            if target == base_reference {
                base_used += len;
                base.attributes.push(attribute.clone());
            } else if let Some(ext) = extensions.iter_mut().find(|ext| ext.reference() == target) {
                ext.attributes.push(attribute.clone());
                ext.next_attribute_instance =
                    ext.next_attribute_instance.max(attribute.instance.wrapping_add(1));
            }
            entries.push(AttributeListEntry {
                attribute_type: attribute.attribute_type,
                name: attribute.name.clone(),
                lowest_vcn: attribute.lowest_vcn(),
                segment: target,
                instance: attribute.instance,
            });
        }

        let (kept, emptied): (Vec<_>, Vec<_>) = extensions
            .into_iter()
            .partition(|ext| !ext.attributes.is_empty());
        let released: Vec<SegmentReference> =
            emptied.iter().map(FileRecordSegment::reference).collect();

        if kept.is_empty() && base.bytes_in_use() <= bytes_per_segment as usize {
            // Everything fits the base segment again; drop the list.
            return Ok(SegmentLayout {
                segments: vec![base],
                released,
            });
        }

        let list_bytes = serialize_attribute_list(&entries)?;
        let list_record = match existing_list {
            Some(existing) => {
                let mut list = existing.clone();
                if list.resident_data()? != list_bytes.as_slice() {
                    list.set_resident_data(list_bytes)?;
                }
                list
            }
            None => {
                let mut list =
                    AttributeRecord::resident(AttributeType::AttributeList, "", list_bytes);
                list.instance = base.next_attribute_instance;
                base.next_attribute_instance = base.next_attribute_instance.wrapping_add(1);
                list
            }
        };
        let position = base
            .attributes
            .partition_point(|existing| existing.sort_key() <= list_record.sort_key());
        base.attributes.insert(position, list_record);

        let mut segments = Vec::with_capacity(1 + kept.len());
        segments.push(base);
        let mut kept = kept;
        kept.sort_by_key(|ext| ext.segment_number);
        segments.extend(kept);
        Ok(SegmentLayout { segments, released })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_name::FileAttributes;
    use fntfs_types::NtTime;

    struct CountingAllocator {
        next: u64,
        handed_out: Vec<SegmentReference>,
    }

    impl SegmentAllocator for CountingAllocator {
        fn allocate_segment(&mut self) -> Result<SegmentReference> {
            let reference = SegmentReference::new(self.next, 1);
            self.next += 1;
            self.handed_out.push(reference);
            Ok(reference)
        }
    }

    fn allocator() -> CountingAllocator {
        CountingAllocator {
            next: 100,
            handed_out: Vec::new(),
        }
    }

    fn small_record() -> FileRecord {
        let mut record = FileRecord::new(SegmentReference::new(40, 2), 1024, 1);
        record.set_hard_link_count(1);
        record
            .set_standard_information(&StandardInformation::new(NtTime(7), FileAttributes::ARCHIVE))
            .unwrap();
        let name = FileNameAttribute::new(
            SegmentReference::new(5, 5),
            "notes.txt",
            FileAttributes::ARCHIVE,
            NtTime(7),
        );
        record.add_attribute(AttributeRecord::resident(
            AttributeType::FileName,
            "",
            name.serialize().unwrap(),
        ));
        record.add_attribute(AttributeRecord::resident(AttributeType::Data, "", b"abc".to_vec()));
        record
    }

    fn reparse(layout: &SegmentLayout) -> (Vec<FileRecordSegment>, FileRecord) {
        let segments: Vec<FileRecordSegment> = layout
            .segments
            .iter()
            .map(|seg| FileRecordSegment::decode(&seg.encode().unwrap(), seg.segment_number).unwrap())
            .collect();
        let record = FileRecord::parse(&segments).unwrap();
        (segments, record)
    }

    #[test]
    fn test_single_segment_accessors() {
        let record = small_record();
        let layout = record.update_segments(1024, 1, &mut allocator()).unwrap();
        assert_eq!(layout.segments.len(), 1);
        let (_, parsed) = reparse(&layout);
        assert_eq!(parsed.file_name().unwrap().unwrap().name, "notes.txt");
        assert_eq!(parsed.standard_information().unwrap().created, NtTime(7));
        assert_eq!(parsed.data_length(), 3);
    }

    #[test]
    fn test_clone_isolation() {
        let layout = small_record().update_segments(1024, 1, &mut allocator()).unwrap();
        let (segments, mut record) = reparse(&layout);
        let before: Vec<Vec<u8>> = segments.iter().map(|seg| seg.to_bytes().unwrap()).collect();

        record
            .find_attribute_mut(AttributeType::Data, "")
            .unwrap()
            .set_resident_data(b"changed after assembly".to_vec())
            .unwrap();
        record.remove_attribute(AttributeType::FileName, "");

        let after: Vec<Vec<u8>> = segments.iter().map(|seg| seg.to_bytes().unwrap()).collect();
        assert_eq!(before, after, "case=assembled_edits_must_not_leak_into_segments");
    }

    #[test]
    fn test_noop_update_is_byte_identical() {
        // Enough named streams to spill into extension segments.
        let mut record = small_record();
        for index in 0..12 {
            record.add_attribute(AttributeRecord::resident(
                AttributeType::Data,
                &format!("stream{index:02}"),
                vec![index as u8; 150],
            ));
        }
        let mut alloc = allocator();
        let layout = record.update_segments(1024, 1, &mut alloc).unwrap();
        assert!(layout.segments.len() > 1, "case=spilled");
        let (segments, parsed) = reparse(&layout);

        let mut second = allocator();
        let again = parsed.update_segments(1024, 1, &mut second).unwrap();
        assert!(second.handed_out.is_empty(), "case=no_new_segments");
        assert!(again.released.is_empty());
        let original: Vec<Vec<u8>> = segments.iter().map(|seg| seg.to_bytes().unwrap()).collect();
        let rewritten: Vec<Vec<u8>> = again.segments.iter().map(|seg| seg.to_bytes().unwrap()).collect();
        assert_eq!(original, rewritten, "case=noop_update_stable");
    }

    #[test]
    fn test_shrinking_releases_extensions() {
        let mut record = small_record();
        for index in 0..12 {
            record.add_attribute(AttributeRecord::resident(
                AttributeType::Data,
                &format!("s{index}"),
                vec![0xAA; 200],
            ));
        }
        let layout = record.update_segments(1024, 0, &mut allocator()).unwrap();
        let extension_count = layout.segments.len() - 1;
        assert!(extension_count >= 2);
        let (_, mut parsed) = reparse(&layout);
        assert_eq!(parsed.attribute_list().unwrap().len(), 15);

        for index in 0..12 {
            parsed.remove_attribute(AttributeType::Data, &format!("s{index}"));
        }
        let shrunk = parsed.update_segments(1024, 0, &mut allocator()).unwrap();
        assert_eq!(shrunk.segments.len(), 1);
        assert_eq!(shrunk.released.len(), extension_count);
        assert!(shrunk.segments[0].find_attribute(AttributeType::AttributeList, "").is_none());
    }

    #[test]
    fn test_parse_rejects_foreign_extension() {
        let mut base = FileRecordSegment::new(40, 2, 1024, 1);
        base.insert_attribute(AttributeRecord::resident(AttributeType::Data, "", vec![]));
        let mut ext = FileRecordSegment::new(41, 1, 1024, 1);
        ext.base_segment = SegmentReference::new(39, 1);
        assert!(FileRecord::parse(&[base.clone(), ext]).unwrap_err().is_corruption());
        assert!(FileRecord::parse(&[]).is_err());
        let mut not_base = base;
        not_base.base_segment = SegmentReference::new(1, 1);
        assert!(FileRecord::parse(&[not_base]).unwrap_err().is_corruption());
    }
}
