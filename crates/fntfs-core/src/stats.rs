//! Volume-wide statistics.

use fntfs_index::IndexMetricsSnapshot;
use fntfs_log::LogStatistics;
use fntfs_pager::PagerStatistics;
use serde::Serialize;

use crate::volume::RecoverySummary;

/// Point-in-time view of space use and engine activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeStatistics {
    pub bytes_per_cluster: u32,
    pub total_clusters: u64,
    pub free_clusters: u64,
    pub mft_segments: u64,
    pub used_segments: u64,
    pub free_segments: u64,
    /// What the most recent mount had to redo.
    pub recovery: RecoverySummary,
    pub log: LogStatistics,
    pub pager: PagerStatistics,
    /// Process-wide index counters.
    pub index: IndexMetricsSnapshot,
}

impl VolumeStatistics {
    /// Bytes not yet handed to any file or metadata stream.
    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        self.free_clusters * self.bytes_per_cluster as u64
    }

    /// JSON rendering for logs and tooling.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
