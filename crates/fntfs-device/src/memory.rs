//! In-memory device with crash injection for tests and tooling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fntfs_error::{NtfsError, Result};
use parking_lot::{Mutex, RwLock};

use crate::{SectorDevice, check_range};

/// One observed device operation, recorded when history is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    Write { offset: u64, len: u64 },
    Flush,
}

#[derive(Debug, Default)]
struct FaultState {
    /// Writes still allowed before every further write fails.
    writes_remaining: Option<u64>,
    history: Option<Vec<WriteEvent>>,
}

/// Sector device backed by a byte vector.
///
/// Clones share the same storage; [`MemoryDevice::snapshot`] makes an
/// independent copy, which is how tests capture the on-disk state at a
/// simulated crash point.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    bytes: Arc<RwLock<Vec<u8>>>,
    bytes_per_sector: u32,
    locked: Arc<AtomicBool>,
    faults: Arc<Mutex<FaultState>>,
}

impl MemoryDevice {
    #[must_use]
    pub fn new(bytes_per_sector: u32, total_sectors: u64) -> Self {
        let len = usize::try_from(total_sectors * u64::from(bytes_per_sector)).unwrap_or(0);
        Self::from_bytes(bytes_per_sector, vec![0_u8; len])
    }

    #[must_use]
    pub fn from_bytes(bytes_per_sector: u32, bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
            bytes_per_sector,
            locked: Arc::new(AtomicBool::new(false)),
            faults: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Independent copy of the current contents, unlocked and fault-free.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::from_bytes(self.bytes_per_sector, self.bytes.read().clone())
    }

    /// Copy of the raw contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Let `count` more writes succeed, then fail every write with an I/O
    /// error until [`Self::clear_faults`] is called.
    pub fn fail_writes_after(&self, count: u64) {
        self.faults.lock().writes_remaining = Some(count);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().writes_remaining = None;
    }

    /// Start recording writes and flushes.
    pub fn record_history(&self) {
        self.faults.lock().history = Some(Vec::new());
    }

    /// Recorded events since the last call.
    pub fn take_history(&self) -> Vec<WriteEvent> {
        self.faults
            .lock()
            .history
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl SectorDevice for MemoryDevice {
    fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    fn total_sectors(&self) -> u64 {
        self.bytes.read().len() as u64 / u64::from(self.bytes_per_sector)
    }

    fn read_sectors(&self, first: u64, count: u32) -> Result<Vec<u8>> {
        let byte_len = count as usize * self.bytes_per_sector as usize;
        let range = check_range(self.bytes_per_sector, self.total_sectors(), first, byte_len)?;
        let bytes = self.bytes.read();
        Ok(bytes[range.start as usize..range.end as usize].to_vec())
    }

    fn write_sectors(&self, first: u64, data: &[u8]) -> Result<()> {
        let range = check_range(self.bytes_per_sector, self.total_sectors(), first, data.len())?;
        {
            let mut faults = self.faults.lock();
            if let Some(remaining) = faults.writes_remaining.as_mut() {
                if *remaining == 0 {
                    return Err(NtfsError::Io(std::io::Error::other(
                        "injected write failure",
                    )));
                }
                *remaining -= 1;
            }
            if let Some(history) = faults.history.as_mut() {
                history.push(WriteEvent::Write {
                    offset: range.start,
                    len: data.len() as u64,
                });
            }
        }
        let mut bytes = self.bytes.write();
        bytes[range.start as usize..range.end as usize].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(history) = self.faults.lock().history.as_mut() {
            history.push(WriteEvent::Flush);
        }
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<()> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| NtfsError::Busy)
    }

    fn release(&self) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }
}
