//! Log counters.

use std::sync::atomic::{AtomicU64, Ordering};

use fntfs_types::Lsn;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct LogCounters {
    records_appended: AtomicU64,
    bytes_appended: AtomicU64,
    flushes: AtomicU64,
    pages_written: AtomicU64,
    checkpoints: AtomicU64,
    wraps: AtomicU64,
    recoveries: AtomicU64,
    transactions_redone: AtomicU64,
    records_redone: AtomicU64,
}

impl LogCounters {
    pub(crate) fn record_append(&self, bytes: usize) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, pages: u32) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.pages_written.fetch_add(u64::from(pages), Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wrap(&self) {
        self.wraps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self, transactions: usize, records: usize) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.transactions_redone
            .fetch_add(u64::try_from(transactions).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.records_redone
            .fetch_add(u64::try_from(records).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

/// Point-in-time view of one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStatistics {
    pub records_appended: u64,
    pub bytes_appended: u64,
    pub flushes: u64,
    pub pages_written: u64,
    pub checkpoints: u64,
    pub wraps: u64,
    /// Completed restart recoveries and what they reapplied.
    pub recoveries: u64,
    pub transactions_redone: u64,
    pub records_redone: u64,
    pub current_lsn: Lsn,
    pub flushed_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub open_transactions: usize,
    pub dirty_pages: usize,
    /// Record pages that can be written before needed space is reached.
    pub free_pages: u64,
    pub record_pages: u64,
}

impl LogStatistics {
    pub(crate) fn from_counters(counters: &LogCounters) -> Self {
        Self {
            records_appended: counters.records_appended.load(Ordering::Relaxed),
            bytes_appended: counters.bytes_appended.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            pages_written: counters.pages_written.load(Ordering::Relaxed),
            checkpoints: counters.checkpoints.load(Ordering::Relaxed),
            wraps: counters.wraps.load(Ordering::Relaxed),
            recoveries: counters.recoveries.load(Ordering::Relaxed),
            transactions_redone: counters.transactions_redone.load(Ordering::Relaxed),
            records_redone: counters.records_redone.load(Ordering::Relaxed),
            current_lsn: Lsn::ZERO,
            flushed_lsn: Lsn::ZERO,
            checkpoint_lsn: Lsn::ZERO,
            open_transactions: 0,
            dirty_pages: 0,
            free_pages: 0,
            record_pages: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_serialize() {
        let counters = LogCounters::default();
        counters.record_append(64);
        counters.record_flush(2);
        let stats = LogStatistics::from_counters(&counters);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["records_appended"], 1);
        assert_eq!(json["pages_written"], 2);
    }

    #[test]
    fn test_recovery_totals_accumulate() {
        let counters = LogCounters::default();
        counters.record_recovery(2, 5);
        counters.record_recovery(0, 0);
        let stats = LogStatistics::from_counters(&counters);
        assert_eq!(stats.recoveries, 2);
        assert_eq!(stats.transactions_redone, 2);
        assert_eq!(stats.records_redone, 5);
    }
}
