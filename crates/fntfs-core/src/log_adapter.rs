//! Adapter connecting the circular log to the pager.
//!
//! [`LogAdapter`] wraps a [`LogFile`] to satisfy the pager's
//! [`LogBackend`] trait and adds the volume's checkpoint policy: once a
//! committed transaction is forgotten and fewer than the configured number
//! of log pages remain free, a checkpoint is written before the next
//! transaction starts.

use fntfs_device::SectorDevice;
use fntfs_error::Result;
use fntfs_log::{LogFile, LogRecord};
use fntfs_pager::LogBackend;
use fntfs_types::{Lsn, SegmentReference};
use tracing::{debug, warn};

pub struct LogAdapter<D: SectorDevice + ?Sized> {
    log: LogFile<D>,
    checkpoint_threshold_pages: u64,
}

impl<D: SectorDevice + ?Sized> std::fmt::Debug for LogAdapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAdapter")
            .field("log", &self.log)
            .field("checkpoint_threshold_pages", &self.checkpoint_threshold_pages)
            .finish()
    }
}

impl<D: SectorDevice + ?Sized> LogAdapter<D> {
    #[must_use]
    pub const fn new(log: LogFile<D>, checkpoint_threshold_pages: u64) -> Self {
        Self {
            log,
            checkpoint_threshold_pages,
        }
    }

    #[must_use]
    pub const fn inner(&self) -> &LogFile<D> {
        &self.log
    }

    pub fn inner_mut(&mut self) -> &mut LogFile<D> {
        &mut self.log
    }

    /// Open attribute index for `(file_reference, attribute_type)`. Only
    /// valid until the next checkpoint, so callers resolve it per
    /// transaction.
    pub fn open_attribute(
        &mut self,
        file_reference: SegmentReference,
        attribute_type: u32,
        bytes_per_index_buffer: u32,
    ) -> Result<u16> {
        self.log
            .open_attribute(file_reference, attribute_type, bytes_per_index_buffer)
    }

    /// Whether free log space has dropped below the threshold.
    #[must_use]
    pub fn needs_checkpoint(&self) -> bool {
        self.log.free_pages() < self.checkpoint_threshold_pages
    }

    fn checkpoint_if_needed(&mut self) -> Result<()> {
        if !self.needs_checkpoint() {
            return Ok(());
        }
        debug!(
            target: "fntfs::log",
            free_pages = self.log.free_pages(),
            threshold = self.checkpoint_threshold_pages,
            "log space low, checkpointing"
        );
        self.log.checkpoint()?;
        Ok(())
    }
}

impl<D: SectorDevice + ?Sized> LogBackend for LogAdapter<D> {
    fn begin(&mut self) -> Result<u32> {
        Ok(self.log.begin())
    }

    fn append(&mut self, transaction: u32, record: LogRecord) -> Result<Lsn> {
        self.log.append(transaction, record)
    }

    fn commit(&mut self, transaction: u32) -> Result<Lsn> {
        self.log.commit(transaction)
    }

    fn forget(&mut self, transaction: u32, committed: bool) -> Result<()> {
        self.log.forget(transaction, committed)?;
        // The transaction is closed either way; a failed checkpoint only
        // leaves less log space, which the next attempt reclaims.
        if let Err(err) = self.checkpoint_if_needed() {
            warn!(target: "fntfs::log", error = %err, "automatic checkpoint failed");
        }
        Ok(())
    }

    fn page_written(&mut self, attribute: u16, vcn: u64) {
        self.log.page_written(attribute, vcn);
    }

    fn flushed_lsn(&self) -> Lsn {
        self.log.flushed_lsn()
    }

    fn max_record_len(&self) -> usize {
        self.log.max_record_len()
    }
}
