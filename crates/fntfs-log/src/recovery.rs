//! Restart analysis: which logged changes must be reapplied after a crash.
//!
//! Analysis is a pure pass over the records returned by
//! [`LogFile::open`](crate::LogFile::open). Applying the redo records to
//! the device is the caller's job; [`LogFile::finish_recovery`] then
//! writes a checkpoint so the same records are never replayed twice.

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_types::Lsn;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::log_file::{LogFile, LogScan};
use crate::record::LogRecord;
use crate::transaction::TransactionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Reapply committed changes; discard everything else.
    #[default]
    RollForward,
    /// Undo incomplete transactions using their undo data.
    RollBack,
}

/// Outcome of analysis.
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlan {
    /// Page records to reapply, oldest first.
    pub redo: Vec<LogRecord>,
    pub transactions_redone: usize,
    /// Transactions that never committed; their changes are dropped.
    pub transactions_discarded: usize,
    /// Transactions fully forgotten within the scanned range.
    pub transactions_completed: usize,
    pub analysis_start: Lsn,
    pub end_lsn: Lsn,
}

impl RecoveryPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redo.is_empty()
    }
}

#[derive(Debug)]
struct Pending {
    status: TransactionStatus,
    records: Vec<LogRecord>,
}

/// Classify every transaction seen in `scan` and collect the redo set.
pub fn analyze(scan: &LogScan, mode: RecoveryMode) -> Result<RecoveryPlan> {
    if mode == RecoveryMode::RollBack {
        return Err(NtfsError::unsupported("roll-back recovery"));
    }
    let mut plan = RecoveryPlan {
        analysis_start: scan.records.first().map_or(scan.restart.checkpoint_lsn, |r| r.lsn),
        end_lsn: scan.records.last().map_or(Lsn::ZERO, |r| r.lsn),
        ..RecoveryPlan::default()
    };
    let mut live: HashMap<u32, Pending> = HashMap::new();
    let mut finished: Vec<Pending> = Vec::new();

    for record in &scan.records {
        if record.transaction_id == 0 {
            continue;
        }
        let pending = live.entry(record.transaction_id).or_insert_with(|| Pending {
            status: TransactionStatus::Open,
            records: Vec::new(),
        });
        pending.status = pending.status.advance(record.redo_op, &record.redo_data)?;
        if !record.redo_op.is_control() {
            pending.records.push(record.clone());
        }
        if pending.status.is_forgotten() {
            // Ids are reused once forgotten.
            if let Some(done) = live.remove(&record.transaction_id) {
                finished.push(done);
            }
        }
    }

    plan.transactions_completed = finished.len();
    for (id, pending) in live {
        if pending.status.needs_redo() {
            debug!(
                target: "fntfs::log",
                transaction = id,
                records = pending.records.len(),
                "committed transaction needs redo"
            );
            plan.transactions_redone += 1;
            plan.redo.extend(pending.records);
        } else {
            debug!(target: "fntfs::log", transaction = id, "discarding uncommitted transaction");
            plan.transactions_discarded += 1;
        }
    }
    plan.redo.sort_by_key(|record| record.lsn);
    Ok(plan)
}

impl<D: SectorDevice + ?Sized> LogFile<D> {
    /// Record that `plan` has been applied and durably checkpoint past it.
    pub fn finish_recovery(&mut self, plan: &RecoveryPlan) -> Result<Lsn> {
        let checkpoint = self.checkpoint()?;
        self.counters()
            .record_recovery(plan.transactions_redone, plan.redo.len());
        info!(
            target: "fntfs::log",
            transactions_redone = plan.transactions_redone,
            records_redone = plan.redo.len(),
            transactions_discarded = plan.transactions_discarded,
            checkpoint_lsn = %checkpoint,
            "recovery complete"
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{DirtyPageEntry, OpenAttributeEntry, TransactionEntry};
    use crate::op::LogOperation;
    use crate::restart::RestartArea;
    use crate::table::{RestartTable, RestartVersion};
    use crate::transaction::forget_payload;

    fn rec(lsn: u64, id: u32, op: LogOperation, redo: Vec<u8>) -> LogRecord {
        let mut record = if op.is_control() {
            LogRecord::control(op, redo)
        } else {
            LogRecord::page_update(op, 1, 0, vec![40], 0, 0, redo)
        };
        record.lsn = Lsn(lsn);
        record.transaction_id = id;
        record
    }

    fn scan(records: Vec<LogRecord>) -> LogScan {
        LogScan {
            restart: RestartArea::new(RestartVersion::V1, 4096, 8),
            records,
            transaction_table: RestartTable::<TransactionEntry>::new(RestartVersion::V1, 0),
            dirty_page_table: RestartTable::<DirtyPageEntry>::new(RestartVersion::V1, 8),
            open_attribute_table: RestartTable::<OpenAttributeEntry>::new(RestartVersion::V1, 0),
        }
    }

    #[test]
    fn test_only_committed_unforgotten_transactions_are_redone() {
        let update = LogOperation::UpdateNonResidentValue;
        let plan = analyze(
            &scan(vec![
                rec(0x40, 0x18, update, vec![1]),
                rec(0x80, 0x40, update, vec![2]),
                rec(0xC0, 0x18, LogOperation::CommitTransaction, vec![]),
                rec(0x100, 0x68, update, vec![3]),
                rec(0x140, 0x68, LogOperation::CommitTransaction, vec![]),
                rec(0x180, 0x68, LogOperation::ForgetTransaction, forget_payload(true)),
                rec(0x1C0, 0x0, LogOperation::DirtyPageTableDump, vec![]),
            ]),
            RecoveryMode::RollForward,
        )
        .unwrap();
        assert_eq!(plan.transactions_redone, 1);
        assert_eq!(plan.transactions_discarded, 1, "case=uncommitted_0x40");
        assert_eq!(plan.transactions_completed, 1);
        assert_eq!(plan.redo.len(), 1);
        assert_eq!(plan.redo[0].redo_data, vec![1]);
        assert_eq!(plan.end_lsn, Lsn(0x1C0));
    }

    #[test]
    fn test_reused_id_after_forget_starts_fresh() {
        let update = LogOperation::UpdateNonResidentValue;
        let plan = analyze(
            &scan(vec![
                rec(0x40, 0x18, update, vec![1]),
                rec(0x80, 0x18, LogOperation::CommitTransaction, vec![]),
                rec(0xC0, 0x18, LogOperation::ForgetTransaction, forget_payload(true)),
                rec(0x100, 0x18, update, vec![2]),
                rec(0x140, 0x18, LogOperation::CommitTransaction, vec![]),
            ]),
            RecoveryMode::RollForward,
        )
        .unwrap();
        assert_eq!(plan.redo.len(), 1);
        assert_eq!(plan.redo[0].lsn, Lsn(0x100));
    }

    #[test]
    fn test_roll_back_and_inconsistent_logs_are_rejected() {
        assert!(matches!(
            analyze(&scan(Vec::new()), RecoveryMode::RollBack),
            Err(NtfsError::UnsupportedFormat(_))
        ));
        let err = analyze(
            &scan(vec![
                rec(0x40, 0x18, LogOperation::CommitTransaction, vec![]),
                rec(0x80, 0x18, LogOperation::UpdateNonResidentValue, vec![1]),
            ]),
            RecoveryMode::RollForward,
        )
        .unwrap_err();
        assert!(err.is_corruption(), "case=update_after_commit err={err}");
    }
}
