//! Directory index: `$INDEX_ROOT`, INDX pages, collation, and the B+tree
//! that keeps entries ordered across them.
//!
//! The tree never touches a device. Pages come from an [`IndexPageStore`];
//! the volume layer supplies one backed by `$INDEX_ALLOCATION` and
//! `$BITMAP`, and [`MemoryPageStore`] serves tests and tools.

pub mod collation;
pub mod entry;
pub mod instrumentation;
pub mod page;
pub mod root;
pub mod store;
pub mod tree;

pub use collation::CollationRule;
pub use entry::{INDEX_HEADER_LEN, IndexEntry, IndexNode};
pub use instrumentation::{
    IndexMetricsSnapshot, IndexOpType, index_metrics_snapshot, reset_index_metrics,
};
pub use page::{INDX_SIGNATURE, IndexRecordPage, entries_offset, has_indx_signature, page_capacity};
pub use root::IndexRoot;
pub use store::{IndexPageStore, MemoryPageStore};
pub use tree::IndexTree;
