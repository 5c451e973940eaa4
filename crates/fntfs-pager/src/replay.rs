//! Reapplying redo records to the device after a crash.

use fntfs_device::SectorDevice;
use fntfs_error::Result;
use fntfs_log::LogRecord;
use hashbrown::HashSet;
use serde::Serialize;
use tracing::{info, trace};

use crate::redo::{apply_redo, redo_span};
use crate::target::PageTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReplaySummary {
    pub records_applied: usize,
    pub records_skipped: usize,
    pub pages_touched: usize,
}

/// Apply `records` (oldest first) to the pages they address, then flush.
///
/// Each record rewrites only the sectors its redo touches, so replaying a
/// record whose page already reached the device is harmless.
pub fn replay<D: SectorDevice + ?Sized>(
    device: &D,
    bytes_per_cluster: u32,
    records: &[LogRecord],
) -> Result<ReplaySummary> {
    let sector = device.bytes_per_sector() as usize;
    let mut summary = ReplaySummary::default();
    let mut pages = HashSet::new();
    for record in records {
        let Some(span) = redo_span(record)? else {
            summary.records_skipped += 1;
            continue;
        };
        let window_start = span.start / sector * sector;
        let window_end = span.end.div_ceil(sector) * sector;
        let target = PageTarget::from_record(record, window_end);
        let mut page = vec![0_u8; window_end];
        let current = target.read_range(device, bytes_per_cluster, window_start, window_end - window_start)?;
        page[window_start..].copy_from_slice(&current);
        apply_redo(&mut page, record)?;
        target.write_range(device, bytes_per_cluster, window_start, &page[window_start..])?;
        pages.insert(target.start(bytes_per_cluster)?);
        summary.records_applied += 1;
        trace!(
            target: "fntfs::recovery",
            lsn = %record.lsn,
            op = record.redo_op.name(),
            vcn = record.target_vcn,
            bytes = span.len(),
            "applied redo"
        );
    }
    device.flush()?;
    summary.pages_touched = pages.len();
    info!(
        target: "fntfs::recovery",
        records_applied = summary.records_applied,
        pages_touched = summary.pages_touched,
        "redo pass complete"
    );
    Ok(summary)
}
