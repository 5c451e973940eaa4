//! Single-writer metadata pager.
//!
//! A [`PagerTransaction`] collects staged page images. Every change is
//! described by a log record and applied to the staged image through
//! [`apply_redo`], the same function replay uses. Commit makes the log
//! durable through the commit record, writes the staged pages, flushes the
//! device, and only then appends the forget record. A page whose last
//! record is not yet durable is never written.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_log::record::CLIENT_DATA_HEADER_LEN;
use fntfs_log::{LOG_RECORD_HEADER_LEN, LogOperation, LogRecord};
use fntfs_types::Lsn;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::backend::LogBackend;
use crate::cache::PageCache;
use crate::redo::{apply_redo, bitmap_payload};
use crate::target::PageTarget;

/// How a full page image is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A file record segment; logged whole when it fits one record.
    FileRecordSegment,
    /// An index buffer or other multi-sector page; logged in chunks.
    Buffer,
}

#[derive(Debug)]
struct StagedPage {
    target: PageTarget,
    start: u64,
    image: Vec<u8>,
    last_lsn: Lsn,
}

/// Staged changes of one metadata transaction.
pub struct PagerTransaction {
    log_id: Option<u32>,
    pages: Vec<StagedPage>,
    index: HashMap<u64, usize>,
    records: usize,
    finished: bool,
    writer: Arc<AtomicBool>,
    abandoned: Arc<Mutex<Vec<u32>>>,
}

impl std::fmt::Debug for PagerTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagerTransaction")
            .field("log_id", &self.log_id)
            .field("pages", &self.pages.len())
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl PagerTransaction {
    /// Log transaction id, once something was staged.
    #[must_use]
    pub const fn log_id(&self) -> Option<u32> {
        self.log_id
    }

    #[must_use]
    pub fn staged_pages(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    fn finish(&mut self) {
        self.finished = true;
        self.writer.store(false, Ordering::Release);
    }
}

impl Drop for PagerTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(id) = self.log_id {
            warn!(target: "fntfs::pager", transaction = id, "metadata transaction dropped unfinished");
            self.abandoned.lock().push(id);
        }
        self.writer.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PagerCounters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    records_logged: AtomicU64,
    pages_written: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    ordering_violations: AtomicU64,
}

/// Point-in-time view of pager activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PagerStatistics {
    pub commits: u64,
    pub rollbacks: u64,
    pub records_logged: u64,
    pub pages_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub ordering_violations: u64,
}

// ---------------------------------------------------------------------------
// Pager
// ---------------------------------------------------------------------------

pub struct MetadataPager<D: SectorDevice + ?Sized, L: LogBackend> {
    device: Arc<D>,
    log: L,
    bytes_per_cluster: u32,
    cache: Mutex<PageCache>,
    writer: Arc<AtomicBool>,
    abandoned: Arc<Mutex<Vec<u32>>>,
    counters: PagerCounters,
}

impl<D: SectorDevice + ?Sized, L: LogBackend> std::fmt::Debug for MetadataPager<D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataPager")
            .field("bytes_per_cluster", &self.bytes_per_cluster)
            .field("cached_pages", &self.cache.lock().len())
            .field("writer_active", &self.writer.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<D: SectorDevice + ?Sized, L: LogBackend> MetadataPager<D, L> {
    #[must_use]
    pub fn new(device: Arc<D>, log: L, bytes_per_cluster: u32, cache_pages: usize) -> Self {
        Self {
            device,
            log,
            bytes_per_cluster,
            cache: Mutex::new(PageCache::new(cache_pages)),
            writer: Arc::new(AtomicBool::new(false)),
            abandoned: Arc::new(Mutex::new(Vec::new())),
            counters: PagerCounters::default(),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    #[must_use]
    pub const fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    #[must_use]
    pub fn statistics(&self) -> PagerStatistics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PagerStatistics {
            commits: load(&self.counters.commits),
            rollbacks: load(&self.counters.rollbacks),
            records_logged: load(&self.counters.records_logged),
            pages_written: load(&self.counters.pages_written),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
            ordering_violations: load(&self.counters.ordering_violations),
        }
    }

    /// Start the single writer transaction.
    pub fn begin(&mut self) -> Result<PagerTransaction> {
        if self.writer.swap(true, Ordering::AcqRel) {
            return Err(NtfsError::Busy);
        }
        let abandoned = std::mem::take(&mut *self.abandoned.lock());
        for id in abandoned {
            if let Err(err) = self.log.forget(id, false) {
                warn!(target: "fntfs::pager", transaction = id, error = %err, "could not close abandoned transaction");
            }
        }
        Ok(PagerTransaction {
            log_id: None,
            pages: Vec::new(),
            index: HashMap::new(),
            records: 0,
            finished: false,
            writer: Arc::clone(&self.writer),
            abandoned: Arc::clone(&self.abandoned),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    fn read_committed(&self, target: &PageTarget, start: u64) -> Result<Vec<u8>> {
        let cached = self.cache.lock().get(start, target.length).map(<[u8]>::to_vec);
        if let Some(image) = cached {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(image);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        let image = target.read(&*self.device, self.bytes_per_cluster)?;
        self.cache.lock().insert(start, image.clone());
        Ok(image)
    }

    /// Current image of a page: staged by `txn`, else committed.
    pub fn read_page(&self, txn: &PagerTransaction, target: &PageTarget) -> Result<Vec<u8>> {
        let start = target.start(self.bytes_per_cluster)?;
        if let Some(&slot) = txn.index.get(&start) {
            let staged = &txn.pages[slot];
            if staged.image.len() == target.length {
                return Ok(staged.image.clone());
            }
        }
        self.read_committed(target, start)
    }

    /// Committed image of a page, outside any transaction.
    pub fn read_page_committed(&self, target: &PageTarget) -> Result<Vec<u8>> {
        let start = target.start(self.bytes_per_cluster)?;
        self.read_committed(target, start)
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    fn staged_slot(&mut self, txn: &mut PagerTransaction, target: &PageTarget) -> Result<usize> {
        let start = target.start(self.bytes_per_cluster)?;
        if let Some(&slot) = txn.index.get(&start) {
            if txn.pages[slot].image.len() != target.length {
                return Err(NtfsError::internal(format!(
                    "page at {start:#x} staged as {} bytes, addressed as {}",
                    txn.pages[slot].image.len(),
                    target.length
                )));
            }
            return Ok(slot);
        }
        let image = self.read_committed(target, start)?;
        txn.pages.push(StagedPage {
            target: target.clone(),
            start,
            image,
            last_lsn: Lsn::ZERO,
        });
        let slot = txn.pages.len() - 1;
        txn.index.insert(start, slot);
        Ok(slot)
    }

    fn log_and_apply(
        &mut self,
        txn: &mut PagerTransaction,
        slot: usize,
        record: LogRecord,
    ) -> Result<Lsn> {
        let id = match txn.log_id {
            Some(id) => id,
            None => {
                let id = self.log.begin()?;
                txn.log_id = Some(id);
                id
            }
        };
        apply_redo(&mut txn.pages[slot].image, &record)?;
        let op = record.redo_op;
        let lsn = self.log.append(id, record)?;
        txn.pages[slot].last_lsn = lsn;
        txn.records += 1;
        self.counters.records_logged.fetch_add(1, Ordering::Relaxed);
        trace!(target: "fntfs::pager", transaction = id, lsn = %lsn, op = op.name(), "staged page record");
        Ok(lsn)
    }

    fn record_for(target: &PageTarget, op: LogOperation, record_offset: usize, redo: Vec<u8>) -> Result<LogRecord> {
        let record_offset = u16::try_from(record_offset).map_err(|_| {
            NtfsError::unsupported(format!("page offset {record_offset} exceeds a log record's range"))
        })?;
        Ok(LogRecord::page_update(
            op,
            target.attribute,
            target.vcn,
            target.lcns.to_vec(),
            target.cluster_block_offset,
            record_offset,
            redo,
        ))
    }

    /// Largest redo payload one record for `target` can carry.
    fn chunk_limit(&self, target: &PageTarget) -> Result<usize> {
        let overhead = LOG_RECORD_HEADER_LEN + CLIENT_DATA_HEADER_LEN + 8 * target.lcns.len();
        let limit = self.log.max_record_len().saturating_sub(overhead) & !7;
        if limit == 0 {
            return Err(NtfsError::unsupported("log pages too small for page records"));
        }
        Ok(limit)
    }

    /// Replace a page with `image`, logging it in full.
    pub fn stage_image(
        &mut self,
        txn: &mut PagerTransaction,
        target: &PageTarget,
        image: &[u8],
        kind: ImageKind,
    ) -> Result<()> {
        if image.len() != target.length {
            return Err(NtfsError::internal(format!(
                "{} byte image for a {} byte page",
                image.len(),
                target.length
            )));
        }
        let slot = self.staged_slot(txn, target)?;
        if txn.pages[slot].image == image {
            return Ok(());
        }
        let limit = self.chunk_limit(target)?;
        if kind == ImageKind::FileRecordSegment && image.len() <= limit {
            let record = Self::record_for(target, LogOperation::InitializeFileRecordSegment, 0, image.to_vec())?;
            self.log_and_apply(txn, slot, record)?;
            return Ok(());
        }
        let mut offset = 0;
        while offset < image.len() {
            let end = (offset + limit).min(image.len());
            if txn.pages[slot].image[offset..end] != image[offset..end] {
                let record = Self::record_for(
                    target,
                    LogOperation::UpdateNonResidentValue,
                    offset,
                    image[offset..end].to_vec(),
                )?;
                self.log_and_apply(txn, slot, record)?;
            }
            offset = end;
        }
        Ok(())
    }

    fn stage_bits(
        &mut self,
        txn: &mut PagerTransaction,
        target: &PageTarget,
        op: LogOperation,
        bit_offset: u32,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let slot = self.staged_slot(txn, target)?;
        let record = Self::record_for(target, op, 0, bitmap_payload(bit_offset, count))?;
        self.log_and_apply(txn, slot, record)?;
        Ok(())
    }

    /// Set bits `bit_offset..bit_offset + count` of a bitmap page.
    pub fn set_bits(&mut self, txn: &mut PagerTransaction, target: &PageTarget, bit_offset: u32, count: u32) -> Result<()> {
        self.stage_bits(txn, target, LogOperation::SetBitsInNonResidentBitMap, bit_offset, count)
    }

    /// Clear bits `bit_offset..bit_offset + count` of a bitmap page.
    pub fn clear_bits(&mut self, txn: &mut PagerTransaction, target: &PageTarget, bit_offset: u32, count: u32) -> Result<()> {
        self.stage_bits(txn, target, LogOperation::ClearBitsInNonResidentBitMap, bit_offset, count)
    }

    /// Clear the in-use flag of a file record segment.
    pub fn deallocate_segment(&mut self, txn: &mut PagerTransaction, target: &PageTarget) -> Result<()> {
        let slot = self.staged_slot(txn, target)?;
        let record = Self::record_for(target, LogOperation::DeallocateFileRecordSegment, 0, Vec::new())?;
        self.log_and_apply(txn, slot, record)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commit and rollback
    // -----------------------------------------------------------------------

    fn write_staged(&self, page: &StagedPage) -> Result<()> {
        let flushed = self.log.flushed_lsn();
        if flushed < page.last_lsn {
            self.counters.ordering_violations.fetch_add(1, Ordering::Relaxed);
            return Err(NtfsError::WriteOrdering {
                required: page.last_lsn.get(),
                flushed: flushed.get(),
            });
        }
        page.target.write_range(&*self.device, self.bytes_per_cluster, 0, &page.image)
    }

    /// Make the transaction durable. Returns the commit LSN, or `None` when
    /// nothing was staged.
    pub fn commit(&mut self, mut txn: PagerTransaction) -> Result<Option<Lsn>> {
        let Some(id) = txn.log_id else {
            txn.finish();
            return Ok(None);
        };
        let commit_lsn = match self.log.commit(id) {
            Ok(lsn) => lsn,
            Err(err) => {
                if let Err(close) = self.log.forget(id, false) {
                    warn!(target: "fntfs::pager", transaction = id, error = %close, "could not close failed transaction");
                }
                txn.finish();
                return Err(err);
            }
        };
        // From here the transaction is committed in the log; a failure
        // leaves its pages to replay at the next mount.
        let result = self.write_committed(&txn, id);
        txn.finish();
        result?;
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "fntfs::pager",
            transaction = id,
            commit_lsn = %commit_lsn,
            pages = txn.pages.len(),
            records = txn.records,
            "metadata transaction committed"
        );
        Ok(Some(commit_lsn))
    }

    fn write_committed(&mut self, txn: &PagerTransaction, id: u32) -> Result<()> {
        for page in &txn.pages {
            if let Err(err) = self.write_staged(page) {
                // The device may now hold part of the new images.
                let mut cache = self.cache.lock();
                for written in &txn.pages {
                    cache.invalidate(written.start);
                }
                return Err(err);
            }
        }
        self.device.flush()?;
        self.counters
            .pages_written
            .fetch_add(txn.pages.len() as u64, Ordering::Relaxed);
        {
            let mut cache = self.cache.lock();
            for page in &txn.pages {
                cache.insert(page.start, page.image.clone());
            }
        }
        for page in &txn.pages {
            self.log.page_written(page.target.attribute, page.target.vcn);
        }
        self.log.forget(id, true)
    }

    /// Discard staged pages and close the log transaction.
    pub fn rollback(&mut self, mut txn: PagerTransaction) -> Result<()> {
        txn.finish();
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        if let Some(id) = txn.log_id {
            debug!(target: "fntfs::pager", transaction = id, records = txn.records, "metadata transaction rolled back");
            self.log.forget(id, false)?;
        }
        Ok(())
    }

    /// Forget cached images overlapping bytes written outside the pager.
    pub fn invalidate(&self, start: u64, len: u64) {
        self.cache.lock().invalidate_range(start, len);
    }

    /// Drop every cached page image.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
