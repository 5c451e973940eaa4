//! On-disk record model: data runs, attribute records, and file records.
//!
//! Everything in this crate is a pure codec over byte buffers. Reading and
//! writing segments, allocating them, and logging their changes happen in
//! the volume layer above.

pub mod attribute;
pub mod attribute_list;
pub mod data_run;
pub mod file_name;
pub mod file_record;
pub mod segment;
pub mod standard_information;

pub use attribute::{
    AttributeFlags, AttributeRecord, AttributeType, AttributeValue, END_MARKER, NonResidentValue,
    ResidentValue,
};
pub use attribute_list::{AttributeListEntry, parse_attribute_list, serialize_attribute_list};
pub use data_run::{DataRun, DataRunSequence, LcnExtent};
pub use file_name::{FileAttributes, FileNameAttribute, FileNamespace};
pub use file_record::{FileRecord, SegmentAllocator, SegmentLayout};
pub use segment::{FILE_SIGNATURE, FileRecordSegment, SegmentFlags, has_file_signature};
pub use standard_information::{
    STANDARD_INFORMATION_V1_LEN, STANDARD_INFORMATION_V3_LEN, StandardInformation,
    StandardInformationExt,
};
