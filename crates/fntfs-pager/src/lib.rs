//! Metadata page writes under write-ahead logging.
//!
//! Pages are staged in a [`PagerTransaction`] and reach the device only
//! after the log records describing them are durable. [`replay`] reapplies
//! logged changes after a crash with the same redo code commit uses.

pub mod backend;
pub mod cache;
pub mod pager;
pub mod redo;
pub mod replay;
pub mod target;

pub use backend::LogBackend;
pub use cache::PageCache;
pub use pager::{ImageKind, MetadataPager, PagerStatistics, PagerTransaction};
pub use redo::{apply_redo, bitmap_payload, redo_span};
pub use replay::{ReplaySummary, replay};
pub use target::{CLUSTER_BLOCK_SIZE, PageTarget};
