//! End-to-end harness for the NTFS metadata engine.
//!
//! Volumes live on [`MemoryDevice`]s so a test can cut power at any write
//! ([`crash::CrashSweep`]), record the order in which bytes reach the device
//! ([`ordering`]), and emit machine-readable reports ([`report`]).

use std::sync::Arc;

use fntfs::{FormatOptions, MemoryDevice, MountOptions, NtfsError, Volume};
use tracing_subscriber::EnvFilter;

pub mod crash;
pub mod ordering;
pub mod report;

#[derive(Debug, thiserror::Error)]
pub enum E2eError {
    #[error("volume error: {0}")]
    Volume(#[from] NtfsError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("inconsistent state after crash at write {writes_allowed}: {detail}")]
    Inconsistent { writes_allowed: u64, detail: String },
    #[error("write ordering violated: {0}")]
    Ordering(String),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// 16 MiB of 512-byte sectors.
pub const FIXTURE_SECTORS: u64 = 32_768;

/// Install a test-friendly subscriber honouring `RUST_LOG`. Returns false
/// when another subscriber is already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[must_use]
pub fn fixture_options() -> FormatOptions {
    FormatOptions {
        log_size_bytes: 1024 * 1024,
        volume_label: "e2e".to_owned(),
        ..FormatOptions::default()
    }
}

/// A freshly formatted, cleanly closed device.
pub fn formatted_device(total_sectors: u64, options: &FormatOptions) -> E2eResult<MemoryDevice> {
    let device = MemoryDevice::new(options.geometry.bytes_per_sector, total_sectors);
    Volume::format(Arc::new(device.clone()), options)?.close()?;
    Ok(device)
}

/// Mount `device` with default options. The volume shares its storage.
pub fn mount(device: &MemoryDevice) -> E2eResult<Volume<MemoryDevice>> {
    Ok(Volume::open(Arc::new(device.clone()), &MountOptions::default())?)
}

/// Prepare a fixture by running `setup` and closing cleanly.
pub fn prepared_device(
    setup: impl FnOnce(&mut Volume<MemoryDevice>) -> fntfs::Result<()>,
) -> E2eResult<MemoryDevice> {
    let device = formatted_device(FIXTURE_SECTORS, &fixture_options())?;
    let mut volume = mount(&device)?;
    setup(&mut volume)?;
    volume.close()?;
    Ok(device)
}
