//! Redo application, shared by commit and recovery.
//!
//! Staging a change applies its record to an in-memory page image; replay
//! after a crash applies the same record to the page read back from the
//! device. Every supported operation is idempotent.

use std::ops::Range;

use fntfs_error::{NtfsError, Result};
use fntfs_log::{LogOperation, LogRecord};
use fntfs_types::{read_le_u16, read_le_u32, write_le_u16};

const FILE_SIGNATURE: &[u8; 4] = b"FILE";
const SEGMENT_FLAGS_OFFSET: usize = 0x16;
const SEGMENT_IN_USE: u16 = 0x0001;

/// Redo payload of a bitmap operation: bits `bit_offset..bit_offset + count`
/// of the page.
#[must_use]
pub fn bitmap_payload(bit_offset: u32, count: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&bit_offset.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}

fn bitmap_bits(record: &LogRecord) -> Result<Range<usize>> {
    let start = read_le_u32(&record.redo_data, 0)
        .map_err(|_| NtfsError::corrupt("log record", "short bitmap redo payload"))?;
    let count = read_le_u32(&record.redo_data, 4)
        .map_err(|_| NtfsError::corrupt("log record", "short bitmap redo payload"))?;
    Ok(start as usize..start as usize + count as usize)
}

/// Page bytes a record's redo touches, or `None` for a no-op.
pub fn redo_span(record: &LogRecord) -> Result<Option<Range<usize>>> {
    let span = match record.redo_op {
        LogOperation::Noop => return Ok(None),
        LogOperation::InitializeFileRecordSegment => 0..record.redo_data.len(),
        LogOperation::UpdateNonResidentValue => {
            let start = usize::from(record.record_offset);
            start..start + record.redo_data.len()
        }
        LogOperation::DeallocateFileRecordSegment => 0..SEGMENT_FLAGS_OFFSET + 2,
        LogOperation::SetBitsInNonResidentBitMap | LogOperation::ClearBitsInNonResidentBitMap => {
            let bits = bitmap_bits(record)?;
            if bits.is_empty() {
                return Ok(None);
            }
            bits.start / 8..bits.end.div_ceil(8)
        }
        other => {
            return Err(NtfsError::unsupported(format!("redo of {}", other.name())));
        }
    };
    Ok(Some(span))
}

/// Apply `record`'s redo to `page`, whose byte 0 is the start of the page.
pub fn apply_redo(page: &mut [u8], record: &LogRecord) -> Result<()> {
    let Some(span) = redo_span(record)? else {
        return Ok(());
    };
    if span.end > page.len() {
        return Err(NtfsError::corrupt(
            "log record",
            format!(
                "{} at lsn {} touches bytes {}..{} of a {} byte page",
                record.redo_op.name(),
                record.lsn,
                span.start,
                span.end,
                page.len()
            ),
        ));
    }
    match record.redo_op {
        LogOperation::InitializeFileRecordSegment | LogOperation::UpdateNonResidentValue => {
            page[span].copy_from_slice(&record.redo_data);
        }
        LogOperation::DeallocateFileRecordSegment => {
            if page.get(0..4) != Some(FILE_SIGNATURE.as_slice()) {
                return Err(NtfsError::corrupt(
                    "file record segment",
                    format!("deallocation at lsn {} targets a page without FILE", record.lsn),
                ));
            }
            let flags = read_le_u16(page, SEGMENT_FLAGS_OFFSET)?;
            write_le_u16(page, SEGMENT_FLAGS_OFFSET, flags & !SEGMENT_IN_USE)?;
        }
        LogOperation::SetBitsInNonResidentBitMap | LogOperation::ClearBitsInNonResidentBitMap => {
            let set = record.redo_op == LogOperation::SetBitsInNonResidentBitMap;
            for bit in bitmap_bits(record)? {
                let mask = 1_u8 << (bit % 8);
                if set {
                    page[bit / 8] |= mask;
                } else {
                    page[bit / 8] &= !mask;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: LogOperation, record_offset: u16, redo: Vec<u8>) -> LogRecord {
        LogRecord::page_update(op, 0x18, 0, vec![7], 0, record_offset, redo)
    }

    #[test]
    fn test_byte_range_redo_is_idempotent() {
        let mut page = vec![0_u8; 64];
        let update = record(LogOperation::UpdateNonResidentValue, 8, vec![9; 4]);
        apply_redo(&mut page, &update).unwrap();
        let once = page.clone();
        apply_redo(&mut page, &update).unwrap();
        assert_eq!(page, once);
        assert_eq!(&page[6..14], &[0, 0, 9, 9, 9, 9, 0, 0]);
    }

    #[test]
    fn test_bitmap_set_and_clear() {
        let mut page = vec![0_u8; 4];
        apply_redo(
            &mut page,
            &record(LogOperation::SetBitsInNonResidentBitMap, 0, bitmap_payload(6, 5)),
        )
        .unwrap();
        assert_eq!(page, vec![0b1100_0000, 0b0000_0111, 0, 0]);
        apply_redo(
            &mut page,
            &record(LogOperation::ClearBitsInNonResidentBitMap, 0, bitmap_payload(7, 2)),
        )
        .unwrap();
        assert_eq!(page, vec![0b0100_0000, 0b0000_0110, 0, 0]);
        assert_eq!(
            redo_span(&record(LogOperation::SetBitsInNonResidentBitMap, 0, bitmap_payload(6, 5)))
                .unwrap(),
            Some(0..2)
        );
    }

    #[test]
    fn test_deallocate_requires_file_signature() {
        let mut page = vec![0_u8; 32];
        let dealloc = record(LogOperation::DeallocateFileRecordSegment, 0, Vec::new());
        assert!(apply_redo(&mut page, &dealloc).unwrap_err().is_corruption());
        page[0..4].copy_from_slice(b"FILE");
        page[0x16] = 0x03;
        apply_redo(&mut page, &dealloc).unwrap();
        assert_eq!(page[0x16], 0x02, "case=in_use_cleared_directory_kept");
    }

    #[test]
    fn test_out_of_bounds_and_unsupported_ops() {
        let mut page = vec![0_u8; 16];
        let err = apply_redo(&mut page, &record(LogOperation::UpdateNonResidentValue, 12, vec![1; 8]))
            .unwrap_err();
        assert!(err.is_corruption(), "case=past_page_end err={err}");
        let err = apply_redo(&mut page, &record(LogOperation::AddIndexEntryRoot, 0, vec![1]))
            .unwrap_err();
        assert!(matches!(err, NtfsError::UnsupportedFormat(_)), "err={err}");
        apply_redo(&mut page, &record(LogOperation::Noop, 0, Vec::new())).unwrap();
    }
}
