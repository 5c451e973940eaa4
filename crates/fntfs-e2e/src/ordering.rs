//! Write-ahead ordering checks over recorded device history.

use std::ops::Range;

use fntfs::{AttributeType, MemoryDevice, SystemSegment, Volume, WriteEvent};
use serde::Serialize;

use crate::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderingReport {
    pub log_writes: usize,
    pub metadata_writes: usize,
    pub flushes: usize,
}

/// Byte ranges of the device occupied by `$LogFile`.
pub fn log_ranges(volume: &Volume<MemoryDevice>) -> E2eResult<Vec<Range<u64>>> {
    let cluster = volume.geometry().cluster_size();
    let record = volume.get_file_record(SystemSegment::LogFile.reference())?;
    let runs = record.joined_runs(AttributeType::Data, "")?;
    Ok(runs
        .runs()
        .iter()
        .filter_map(|run| {
            run.lcn
                .map(|lcn| lcn * cluster..(lcn + run.length) * cluster)
        })
        .collect())
}

/// Every write outside the log must be preceded by a flush issued after the
/// last log write. Direct data-stream writes are not logged, so histories
/// checked here should come from namespace operations only.
pub fn check_write_ahead(history: &[WriteEvent], log: &[Range<u64>]) -> E2eResult<OrderingReport> {
    let mut report = OrderingReport::default();
    let mut unflushed_log = false;
    for (position, event) in history.iter().enumerate() {
        match *event {
            WriteEvent::Flush => {
                report.flushes += 1;
                unflushed_log = false;
            }
            WriteEvent::Write { offset, len } => {
                let end = offset + len;
                if log.iter().any(|range| offset < range.end && range.start < end) {
                    report.log_writes += 1;
                    unflushed_log = true;
                } else if unflushed_log {
                    return Err(E2eError::Ordering(format!(
                        "event {position}: write at {offset:#x} follows log writes that were never flushed"
                    )));
                } else {
                    report.metadata_writes += 1;
                }
            }
        }
    }
    Ok(report)
}
