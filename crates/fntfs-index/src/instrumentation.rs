//! Directory index operation counters.
//!
//! Process-local totals for the `fntfs::index` tracing lane, read back by
//! volume statistics and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Index operation kinds counted individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOpType {
    Seek,
    Insert,
    Delete,
}

impl IndexOpType {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seek => "seek",
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

/// Snapshot of the index counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexMetricsSnapshot {
    pub seeks: u64,
    pub inserts: u64,
    pub deletes: u64,
    pub page_splits: u64,
    pub root_promotions: u64,
    pub page_frees: u64,
    pub root_collapses: u64,
    /// Deepest descent observed by the most recent operation.
    pub depth: u64,
}

static INDEX_SEEK_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_INSERT_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_DELETE_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_PAGE_SPLITS_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_ROOT_PROMOTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_PAGE_FREES_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_ROOT_COLLAPSES_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_DEPTH_GAUGE: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_operation(op_type: IndexOpType) {
    let counter = match op_type {
        IndexOpType::Seek => &INDEX_SEEK_TOTAL,
        IndexOpType::Insert => &INDEX_INSERT_TOTAL,
        IndexOpType::Delete => &INDEX_DELETE_TOTAL,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_split() {
    INDEX_PAGE_SPLITS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_root_promotion() {
    INDEX_ROOT_PROMOTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_page_free() {
    INDEX_PAGE_FREES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_root_collapse() {
    INDEX_ROOT_COLLAPSES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn set_depth_gauge(depth: usize) {
    INDEX_DEPTH_GAUGE.store(u64::try_from(depth).unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Current counter values.
#[must_use]
pub fn index_metrics_snapshot() -> IndexMetricsSnapshot {
    IndexMetricsSnapshot {
        seeks: INDEX_SEEK_TOTAL.load(Ordering::Relaxed),
        inserts: INDEX_INSERT_TOTAL.load(Ordering::Relaxed),
        deletes: INDEX_DELETE_TOTAL.load(Ordering::Relaxed),
        page_splits: INDEX_PAGE_SPLITS_TOTAL.load(Ordering::Relaxed),
        root_promotions: INDEX_ROOT_PROMOTIONS_TOTAL.load(Ordering::Relaxed),
        page_frees: INDEX_PAGE_FREES_TOTAL.load(Ordering::Relaxed),
        root_collapses: INDEX_ROOT_COLLAPSES_TOTAL.load(Ordering::Relaxed),
        depth: INDEX_DEPTH_GAUGE.load(Ordering::Relaxed),
    }
}

/// Zero every counter.
pub fn reset_index_metrics() {
    for counter in [
        &INDEX_SEEK_TOTAL,
        &INDEX_INSERT_TOTAL,
        &INDEX_DELETE_TOTAL,
        &INDEX_PAGE_SPLITS_TOTAL,
        &INDEX_ROOT_PROMOTIONS_TOTAL,
        &INDEX_PAGE_FREES_TOTAL,
        &INDEX_ROOT_COLLAPSES_TOTAL,
        &INDEX_DEPTH_GAUGE,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexOpType, index_metrics_snapshot, record_operation, record_split};

    #[test]
    fn metrics_snapshot_tracks_operation_buckets() {
        let before = index_metrics_snapshot();
        record_operation(IndexOpType::Seek);
        record_operation(IndexOpType::Seek);
        record_operation(IndexOpType::Insert);
        record_split();

        let after = index_metrics_snapshot();
        assert!(after.seeks >= before.seeks.saturating_add(2));
        assert!(after.inserts >= before.inserts.saturating_add(1));
        assert!(after.page_splits >= before.page_splits.saturating_add(1));
        assert!(after.deletes >= before.deletes);
        assert_eq!(IndexOpType::Delete.as_str(), "delete");
    }
}
