//! Volume engine for the NTFS metadata engine.
//!
//! [`Volume`] ties the lower crates together: it formats and mounts a
//! volume, runs log recovery, and exposes file and directory operations as
//! logged metadata transactions over a [`SectorDevice`](fntfs_device::SectorDevice).

pub mod boot;
pub mod config;
mod format;
mod index_store;
mod log_adapter;
mod meta;
pub mod stats;
mod stream;
pub mod volume;

pub use boot::BootSector;
pub use config::{FormatOptions, MountOptions};
pub use stats::VolumeStatistics;
pub use volume::{DirectoryEntry, RecoverySummary, Volume};
