//! Per-transaction state machine.
//!
//! ```text
//! Open --CommitTransaction--> Committed --ForgetTransaction--> Forgotten { committed: true }
//!   \------------------------ForgetTransaction---------------> Forgotten { committed: false }
//! ```
//!
//! Pages are written only between commit and forget, so `Committed` is
//! the one state whose records recovery must redo.

use fntfs_error::{NtfsError, Result};
use serde::Serialize;

use crate::op::LogOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionStatus {
    Open,
    Committed,
    Forgotten { committed: bool },
}

impl TransactionStatus {
    /// Whether a crash in this state leaves logged changes that may be
    /// missing from their pages.
    #[must_use]
    pub const fn needs_redo(self) -> bool {
        matches!(self, Self::Committed)
    }

    #[must_use]
    pub const fn is_forgotten(self) -> bool {
        matches!(self, Self::Forgotten { .. })
    }

    /// State after a record with `op` is logged for this transaction.
    pub fn advance(self, op: LogOperation, redo_data: &[u8]) -> Result<Self> {
        match (self, op) {
            (Self::Forgotten { .. }, _) => Err(NtfsError::corrupt(
                "log record",
                format!("{} after transaction was forgotten", op.name()),
            )),
            (Self::Open, LogOperation::CommitTransaction) => Ok(Self::Committed),
            (Self::Committed, LogOperation::CommitTransaction) => Err(NtfsError::corrupt(
                "log record",
                "transaction committed twice",
            )),
            (_, LogOperation::ForgetTransaction) => Ok(Self::Forgotten {
                committed: forget_flag(redo_data),
            }),
            (Self::Committed, op) if !op.is_control() => Err(NtfsError::corrupt(
                "log record",
                format!("{} after commit", op.name()),
            )),
            (status, _) => Ok(status),
        }
    }
}

/// Redo payload of a ForgetTransaction record.
#[must_use]
pub fn forget_payload(committed: bool) -> Vec<u8> {
    vec![u8::from(committed)]
}

fn forget_flag(redo_data: &[u8]) -> bool {
    redo_data.first().is_some_and(|flag| *flag != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_then_forget() {
        let status = TransactionStatus::Open
            .advance(LogOperation::UpdateNonResidentValue, &[])
            .unwrap();
        assert_eq!(status, TransactionStatus::Open);
        let status = status.advance(LogOperation::CommitTransaction, &[]).unwrap();
        assert!(status.needs_redo(), "case=committed_needs_redo");
        let status = status
            .advance(LogOperation::ForgetTransaction, &forget_payload(true))
            .unwrap();
        assert_eq!(status, TransactionStatus::Forgotten { committed: true });
        assert!(!status.needs_redo());
    }

    #[test]
    fn test_forget_without_commit_and_records_after_forget() {
        let status = TransactionStatus::Open
            .advance(LogOperation::ForgetTransaction, &forget_payload(false))
            .unwrap();
        assert_eq!(status, TransactionStatus::Forgotten { committed: false });
        assert!(status
            .advance(LogOperation::UpdateNonResidentValue, &[])
            .unwrap_err()
            .is_corruption());
        assert!(TransactionStatus::Committed
            .advance(LogOperation::SetBitsInNonResidentBitMap, &[])
            .unwrap_err()
            .is_corruption(), "case=page_record_after_commit");
    }
}
