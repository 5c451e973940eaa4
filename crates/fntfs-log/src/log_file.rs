//! The circular log: restart pages, record pages, and the writer.
//!
//! Region layout: two restart pages, then `record_pages` record pages.
//! Stream page `n` lives in physical record page `n % record_pages`, and
//! every record page is written exactly once per lap: a flush seals the
//! partially filled tail and the next record starts a fresh page. A torn
//! page therefore never loses records that were already durable.

use std::sync::Arc;

use fntfs_device::SectorDevice;
use fntfs_error::{NtfsError, Result};
use fntfs_types::{Lsn, SegmentReference};
use tracing::{debug, info, trace, warn};

use crate::entries::{
    DirtyPageEntry, OpenAttributeEntry, TransactionEntry, TransactionEntryState,
};
use crate::op::LogOperation;
use crate::page::{RecordPage, records_offset};
use crate::record::LogRecord;
use crate::region::LogRegion;
use crate::restart::RestartArea;
use crate::stats::{LogCounters, LogStatistics};
use crate::table::{RestartTable, RestartVersion};
use crate::transaction::{TransactionStatus, forget_payload};

/// Restart page count at the start of the region.
const RESTART_PAGES: u64 = 2;
/// Minimum record pages a log is formatted with.
const MIN_RECORD_PAGES: u64 = 4;
/// Initial LCN capacity of dirty page entries.
const DIRTY_PAGE_LCNS: usize = 8;

/// Log state read back at mount, before recovery.
#[derive(Debug, Clone)]
pub struct LogScan {
    pub restart: RestartArea,
    /// Records from the analysis start to the end of the log, oldest first.
    pub records: Vec<LogRecord>,
    pub transaction_table: RestartTable<TransactionEntry>,
    pub dirty_page_table: RestartTable<DirtyPageEntry>,
    pub open_attribute_table: RestartTable<OpenAttributeEntry>,
}

pub struct LogFile<D: SectorDevice + ?Sized> {
    device: Arc<D>,
    region: LogRegion,
    page_size: usize,
    record_pages: u64,
    restart: RestartArea,
    next_restart_copy: u64,
    tail: Option<RecordPage>,
    pending: Vec<RecordPage>,
    next_stream_page: u64,
    last_lsn: Lsn,
    flushed_lsn: Lsn,
    transactions: RestartTable<TransactionEntry>,
    dirty_pages: RestartTable<DirtyPageEntry>,
    open_attributes: RestartTable<OpenAttributeEntry>,
    counters: LogCounters,
}

impl<D: SectorDevice + ?Sized> std::fmt::Debug for LogFile<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("page_size", &self.page_size)
            .field("record_pages", &self.record_pages)
            .field("last_lsn", &self.last_lsn)
            .field("flushed_lsn", &self.flushed_lsn)
            .field("checkpoint_lsn", &self.restart.checkpoint_lsn)
            .finish_non_exhaustive()
    }
}

impl<D: SectorDevice + ?Sized> LogFile<D> {
    // -----------------------------------------------------------------------
    // Format and open
    // -----------------------------------------------------------------------

    /// Initialize an empty log over `region`.
    pub fn format(
        device: Arc<D>,
        region: LogRegion,
        page_size: u32,
        version: RestartVersion,
    ) -> Result<Self> {
        let page = page_size as usize;
        if !page_size.is_power_of_two()
            || page_size < 512
            || page_size % device.bytes_per_sector() != 0
        {
            return Err(NtfsError::InvalidArgument(format!(
                "log page size {page_size}"
            )));
        }
        let record_pages = (region.len() / u64::from(page_size)).saturating_sub(RESTART_PAGES);
        if record_pages < MIN_RECORD_PAGES {
            return Err(NtfsError::InvalidArgument(format!(
                "log of {} bytes holds {record_pages} record pages",
                region.len()
            )));
        }
        let record_page_count = u32::try_from(record_pages).map_err(|_| {
            NtfsError::InvalidArgument(format!("log of {record_pages} record pages"))
        })?;

        let zero = vec![0_u8; page];
        for physical in 0..record_pages {
            write_region(&*device, &region, (RESTART_PAGES + physical) * u64::from(page_size), &zero)?;
        }

        let first_lsn = Lsn(records_offset(page) as u64);
        let restart = RestartArea {
            sequence: 1,
            current_lsn: first_lsn,
            checkpoint_lsn: first_lsn,
            ..RestartArea::new(version, page_size, record_page_count)
        };
        let image = restart.encode_page()?;
        write_region(&*device, &region, 0, &image)?;
        write_region(&*device, &region, u64::from(page_size), &image)?;
        device.flush()?;
        info!(
            target: "fntfs::log",
            page_size,
            record_pages,
            version = ?version,
            "formatted log"
        );

        Ok(Self::assemble(device, region, restart, 0, RestartTable::new(version, 0)))
    }

    fn assemble(
        device: Arc<D>,
        region: LogRegion,
        restart: RestartArea,
        next_stream_page: u64,
        open_attributes: RestartTable<OpenAttributeEntry>,
    ) -> Self {
        let version = restart.version;
        Self {
            device,
            region,
            page_size: restart.log_page_size as usize,
            record_pages: u64::from(restart.record_page_count),
            next_restart_copy: 0,
            tail: None,
            pending: Vec::new(),
            next_stream_page,
            last_lsn: Lsn::ZERO,
            flushed_lsn: Lsn::ZERO,
            transactions: RestartTable::new(version, 0),
            dirty_pages: RestartTable::new(version, DIRTY_PAGE_LCNS),
            open_attributes,
            counters: LogCounters::default(),
            restart,
        }
    }

    /// Read the restart area and every record recovery may need.
    pub fn open(device: Arc<D>, region: LogRegion) -> Result<(Self, LogScan)> {
        let (restart, newest_copy) = read_restart(&*device, &region)?;
        let page_size = restart.log_page_size as usize;
        let record_pages = u64::from(restart.record_page_count);
        let region_pages = region.len() / page_size as u64;
        if record_pages + RESTART_PAGES > region_pages || record_pages == 0 {
            return Err(NtfsError::corrupt(
                "restart page",
                format!("{record_pages} record pages in a {region_pages} page log"),
            ));
        }

        let mut reader = PageReader {
            device: &*device,
            region: &region,
            page_size,
            record_pages,
        };
        let version = restart.version;
        let transaction_table = reader.table_dump(restart.transaction_table_lsn, version)?;
        let dirty_page_table: RestartTable<DirtyPageEntry> =
            reader.table_dump(restart.dirty_page_table_lsn, version)?;
        let open_attribute_table = reader.table_dump(restart.open_attribute_table_lsn, version)?;

        let start = analysis_start(&restart, &transaction_table, &dirty_page_table);
        let (records, end_page) = reader.scan_from(start)?;
        let last_lsn = records.last().map_or(Lsn::ZERO, |record| record.lsn);
        info!(
            target: "fntfs::log",
            checkpoint_lsn = %restart.checkpoint_lsn,
            analysis_start = %start,
            records = records.len(),
            end_page,
            "opened log"
        );

        let mut log = Self::assemble(
            Arc::clone(&device),
            region,
            restart.clone(),
            end_page,
            open_attribute_table.clone(),
        );
        log.next_restart_copy = 1 - newest_copy;
        log.last_lsn = last_lsn;
        log.flushed_lsn = last_lsn;
        let scan = LogScan {
            restart,
            records,
            transaction_table,
            dirty_page_table,
            open_attribute_table,
        };
        Ok((log, scan))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub const fn restart_area(&self) -> &RestartArea {
        &self.restart
    }

    #[must_use]
    pub const fn version(&self) -> RestartVersion {
        self.restart.version
    }

    /// LSN of the newest appended record.
    #[must_use]
    pub const fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    /// Every record at or below this LSN is durable.
    #[must_use]
    pub const fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn
    }

    /// Largest record one page can hold.
    #[must_use]
    pub fn max_record_len(&self) -> usize {
        self.page_size - records_offset(self.page_size)
    }

    #[must_use]
    pub fn open_attributes(&self) -> &RestartTable<OpenAttributeEntry> {
        &self.open_attributes
    }

    #[must_use]
    pub fn dirty_pages(&self) -> &RestartTable<DirtyPageEntry> {
        &self.dirty_pages
    }

    fn oldest_needed_lsn(&self) -> Lsn {
        let mut oldest = self.restart.checkpoint_lsn;
        for (_, entry) in self.transactions.iter() {
            if !entry.first_lsn.is_zero() {
                oldest = oldest.min(entry.first_lsn);
            }
        }
        for (_, entry) in self.dirty_pages.iter() {
            oldest = oldest.min(entry.oldest_lsn);
        }
        oldest
    }

    /// Record pages that can still be started without overwriting needed
    /// log space.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        let limit = self.oldest_needed_lsn().get() / self.page_size as u64 + self.record_pages;
        limit.saturating_sub(self.next_stream_page)
    }

    #[must_use]
    pub const fn record_pages(&self) -> u64 {
        self.record_pages
    }

    #[must_use]
    pub fn statistics(&self) -> LogStatistics {
        LogStatistics {
            current_lsn: self.last_lsn,
            flushed_lsn: self.flushed_lsn,
            checkpoint_lsn: self.restart.checkpoint_lsn,
            open_transactions: self.transactions.len(),
            dirty_pages: self.dirty_pages.len(),
            free_pages: self.free_pages(),
            record_pages: self.record_pages,
            ..LogStatistics::from_counters(&self.counters)
        }
    }

    // -----------------------------------------------------------------------
    // Record writer
    // -----------------------------------------------------------------------

    fn start_page(&mut self) -> Result<()> {
        if self.free_pages() == 0 {
            return Err(NtfsError::out_of_space(format!(
                "log full: stream page {} would overwrite lsn {}",
                self.next_stream_page,
                self.oldest_needed_lsn()
            )));
        }
        let stream_page = self.next_stream_page;
        if stream_page > 0 && stream_page % self.record_pages == 0 {
            self.counters.record_wrap();
            info!(target: "fntfs::log", stream_page, "log wrapped");
        }
        if let Some(full) = self.tail.replace(RecordPage::new(stream_page, self.page_size)) {
            if !full.is_empty() {
                self.pending.push(full);
            }
        }
        self.next_stream_page += 1;
        Ok(())
    }

    fn write_record(&mut self, mut record: LogRecord) -> Result<Lsn> {
        let len = record.encoded_len();
        if len > self.max_record_len() {
            return Err(NtfsError::unsupported(format!(
                "log record of {len} bytes exceeds the {} byte page payload",
                self.max_record_len()
            )));
        }
        if !self.tail.as_ref().is_some_and(|tail| tail.fits(len)) {
            self.start_page()?;
        }
        let tail = self
            .tail
            .as_mut()
            .ok_or_else(|| NtfsError::internal("log tail missing after page start"))?;
        let lsn = Lsn(tail.stream_page * self.page_size as u64 + tail.next_offset() as u64);
        record.lsn = lsn;
        let encoded = record.encode()?;
        tail.push(lsn, &encoded);
        self.last_lsn = lsn;
        self.counters.record_append(encoded.len());
        trace!(
            target: "fntfs::log",
            lsn = %lsn,
            op = record.redo_op.name(),
            transaction = record.transaction_id,
            len,
            "appended log record"
        );
        Ok(lsn)
    }

    /// Write every pending record page and make it durable.
    pub fn flush(&mut self) -> Result<Lsn> {
        if let Some(tail) = self.tail.take() {
            if !tail.is_empty() {
                self.pending.push(tail);
            }
        }
        if self.pending.is_empty() {
            return Ok(self.flushed_lsn);
        }
        let pages = self.pending.len() as u32;
        for page in &self.pending {
            let image = page.encode()?;
            let physical = RESTART_PAGES + page.stream_page % self.record_pages;
            write_region(&*self.device, &self.region, physical * self.page_size as u64, &image)?;
        }
        self.device.flush()?;
        self.pending.clear();
        self.flushed_lsn = self.last_lsn;
        self.counters.record_flush(pages);
        trace!(target: "fntfs::log", through = %self.flushed_lsn, pages, "flushed log");
        Ok(self.flushed_lsn)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Open a transaction; its id is the offset of its table entry.
    pub fn begin(&mut self) -> u32 {
        let id = self.transactions.allocate(TransactionEntry::active());
        debug!(target: "fntfs::log", transaction = id, "transaction begin");
        id
    }

    #[must_use]
    pub fn transaction_status(&self, id: u32) -> Option<TransactionStatus> {
        self.transactions.get(id).map(|entry| match entry.state {
            TransactionEntryState::Committed => TransactionStatus::Committed,
            TransactionEntryState::Active | TransactionEntryState::Prepared => {
                TransactionStatus::Open
            }
        })
    }

    fn open_entry(&mut self, id: u32) -> Result<&mut TransactionEntry> {
        self.transactions
            .get_mut(id)
            .ok_or_else(|| NtfsError::internal(format!("transaction {id:#x} is not open")))
    }

    fn append_for(&mut self, id: u32, mut record: LogRecord) -> Result<Lsn> {
        let entry = self.open_entry(id)?;
        record.transaction_id = id;
        record.client_previous_lsn = entry.previous_lsn;
        record.client_undo_next_lsn = entry.undo_next_lsn;
        let has_undo = !record.undo_data.is_empty();
        let undo_len = record.undo_data.len();
        let lsn = self.write_record(record)?;
        let entry = self.open_entry(id)?;
        if entry.first_lsn.is_zero() {
            entry.first_lsn = lsn;
        }
        entry.previous_lsn = lsn;
        if has_undo {
            entry.undo_next_lsn = lsn;
            entry.undo_records += 1;
            entry.undo_bytes = entry.undo_bytes.saturating_add(undo_len as i32);
        }
        Ok(lsn)
    }

    /// Append a page-changing record to an open transaction.
    pub fn append(&mut self, id: u32, record: LogRecord) -> Result<Lsn> {
        if self.transaction_status(id) != Some(TransactionStatus::Open) {
            return Err(NtfsError::internal(format!(
                "append to transaction {id:#x} that is not open"
            )));
        }
        let target_attribute = u32::from(record.target_attribute);
        let vcn = record.target_vcn;
        let lcns = record.lcns.clone();
        let transfer = record.redo_data.len() as u32;
        let is_page_update = !record.redo_op.is_control() && !lcns.is_empty();
        let lsn = self.append_for(id, record)?;
        if is_page_update {
            self.note_dirty_page(target_attribute, vcn, lcns, transfer, lsn);
        }
        Ok(lsn)
    }

    fn note_dirty_page(&mut self, target_attribute: u32, vcn: u64, lcns: Vec<u64>, transfer: u32, lsn: Lsn) {
        let existing = self
            .dirty_pages
            .iter()
            .find(|(_, entry)| entry.target_attribute == target_attribute && entry.vcn == vcn)
            .map(|(index, _)| index);
        if let Some(index) = existing {
            if let Some(entry) = self.dirty_pages.get_mut(index) {
                entry.length_of_transfer = entry.length_of_transfer.max(transfer);
            }
            return;
        }
        self.dirty_pages.ensure_capacity(lcns.len());
        self.dirty_pages.allocate(DirtyPageEntry {
            target_attribute,
            length_of_transfer: transfer,
            vcn,
            oldest_lsn: lsn,
            lcns,
        });
    }

    /// The page `(target_attribute, vcn)` reached its final location.
    pub fn page_written(&mut self, target_attribute: u16, vcn: u64) {
        let index = self
            .dirty_pages
            .iter()
            .find(|(_, entry)| entry.target_attribute == u32::from(target_attribute) && entry.vcn == vcn)
            .map(|(index, _)| index);
        if let Some(index) = index {
            self.dirty_pages.remove(index);
        }
    }

    /// Append the commit record and flush the log through it.
    pub fn commit(&mut self, id: u32) -> Result<Lsn> {
        if self.transaction_status(id) != Some(TransactionStatus::Open) {
            return Err(NtfsError::internal(format!(
                "commit of transaction {id:#x} that is not open"
            )));
        }
        let lsn = self.append_for(id, LogRecord::control(LogOperation::CommitTransaction, Vec::new()))?;
        self.open_entry(id)?.state = TransactionEntryState::Committed;
        self.flush()?;
        debug!(target: "fntfs::log", transaction = id, lsn = %lsn, "transaction committed");
        Ok(lsn)
    }

    /// Close a transaction. The forget record is the last one it writes.
    pub fn forget(&mut self, id: u32, committed: bool) -> Result<TransactionStatus> {
        let first_lsn = self.open_entry(id)?.first_lsn;
        let current = self.transaction_status(id).unwrap_or(TransactionStatus::Open);
        if committed != (current == TransactionStatus::Committed) {
            return Err(NtfsError::internal(format!(
                "forget of transaction {id:#x} as committed={committed} while {current:?}"
            )));
        }
        let status = current.advance(LogOperation::ForgetTransaction, &forget_payload(committed))?;
        self.append_for(
            id,
            LogRecord::control(LogOperation::ForgetTransaction, forget_payload(committed)),
        )?;
        self.transactions.remove(id);
        if !first_lsn.is_zero() {
            let stale: Vec<u32> = self
                .dirty_pages
                .iter()
                .filter(|(_, entry)| entry.oldest_lsn >= first_lsn)
                .map(|(index, _)| index)
                .collect();
            for index in stale.into_iter().rev() {
                self.dirty_pages.remove(index);
            }
        }
        debug!(target: "fntfs::log", transaction = id, committed, "transaction forgotten");
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Attributes and checkpoints
    // -----------------------------------------------------------------------

    /// Index of the open attribute entry for `(file_reference,
    /// attribute_type)`, registering it on first use.
    pub fn open_attribute(
        &mut self,
        file_reference: SegmentReference,
        attribute_type: u32,
        bytes_per_index_buffer: u32,
    ) -> Result<u16> {
        let existing = self.open_attributes.iter().find(|(_, entry)| {
            entry.file_reference == file_reference && entry.attribute_type == attribute_type
        });
        let index = match existing {
            Some((index, _)) => index,
            None => self.open_attributes.allocate(OpenAttributeEntry {
                file_reference,
                lsn_of_open_record: self.last_lsn,
                dirty_pages_seen: false,
                attribute_type,
                bytes_per_index_buffer,
            }),
        };
        u16::try_from(index)
            .map_err(|_| NtfsError::out_of_space("open attribute table full"))
    }

    /// Drop open attribute entries no dirty page refers to. Callers look
    /// indices up again per transaction, so freed indices may be reused.
    fn prune_open_attributes(&mut self) {
        let unused: Vec<u32> = self
            .open_attributes
            .iter()
            .map(|(index, _)| index)
            .filter(|index| {
                !self
                    .dirty_pages
                    .iter()
                    .any(|(_, page)| page.target_attribute == *index)
            })
            .collect();
        for index in unused {
            self.open_attributes.remove(index);
        }
    }

    /// Dump the restart tables, flush, and write a new restart area.
    pub fn checkpoint(&mut self) -> Result<Lsn> {
        self.prune_open_attributes();
        let open_attribute_dump = self.open_attributes.encode()?;
        let dirty_page_dump = self.dirty_pages.encode()?;
        let transaction_dump = self.transactions.encode()?;
        let open_attribute_lsn = self.write_record(LogRecord::control(
            LogOperation::OpenAttributeTableDump,
            open_attribute_dump,
        ))?;
        let dirty_page_lsn = self.write_record(LogRecord::control(
            LogOperation::DirtyPageTableDump,
            dirty_page_dump,
        ))?;
        let transaction_lsn = self.write_record(LogRecord::control(
            LogOperation::TransactionTableDump,
            transaction_dump,
        ))?;
        self.flush()?;

        let restart = RestartArea {
            sequence: self.restart.sequence + 1,
            current_lsn: self.last_lsn,
            checkpoint_lsn: open_attribute_lsn,
            open_attribute_table_lsn: open_attribute_lsn,
            dirty_page_table_lsn: dirty_page_lsn,
            transaction_table_lsn: transaction_lsn,
            clean: self.transactions.is_empty(),
            ..self.restart.clone()
        };
        let image = restart.encode_page()?;
        let copy = self.next_restart_copy;
        write_region(&*self.device, &self.region, copy * self.page_size as u64, &image)?;
        self.device.flush()?;
        self.next_restart_copy = 1 - copy;
        self.counters.record_checkpoint();
        info!(
            target: "fntfs::log",
            checkpoint_lsn = %open_attribute_lsn,
            sequence = restart.sequence,
            copy,
            free_pages = self.free_pages(),
            "checkpoint written"
        );
        self.restart = restart;
        Ok(open_attribute_lsn)
    }

    pub(crate) fn counters(&self) -> &LogCounters {
        &self.counters
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn write_region<D: SectorDevice + ?Sized>(
    device: &D,
    region: &LogRegion,
    offset: u64,
    data: &[u8],
) -> Result<()> {
    let mut written = 0;
    for (device_offset, len) in region.map(offset, data.len() as u64)? {
        device.write_bytes(device_offset, &data[written..written + len])?;
        written += len;
    }
    Ok(())
}

fn read_region<D: SectorDevice + ?Sized>(
    device: &D,
    region: &LogRegion,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    for (device_offset, piece) in region.map(offset, len as u64)? {
        out.extend_from_slice(&device.read_bytes(device_offset, piece)?);
    }
    Ok(out)
}

/// Page size recorded in a restart page header at `offset`, if it carries
/// the signature and a plausible size.
fn probe_page_size<D: SectorDevice + ?Sized>(device: &D, region: &LogRegion, offset: u64) -> Option<u32> {
    let header = read_region(device, region, offset, 512).ok()?;
    if header.get(0..4) != Some(crate::restart::RSTR_SIGNATURE.as_slice()) {
        return None;
    }
    let page_size = fntfs_types::read_le_u32(&header, 0x14).ok()?;
    (page_size.is_power_of_two() && (512..=65536).contains(&page_size)).then_some(page_size)
}

/// Newest valid restart copy and its index.
fn read_restart<D: SectorDevice + ?Sized>(device: &D, region: &LogRegion) -> Result<(RestartArea, u64)> {
    // A torn first copy still leaves the second one at `page_size`.
    let page_size = probe_page_size(device, region, 0).or_else(|| {
        (9..=16)
            .map(|shift| 1_u32 << shift)
            .find(|&size| probe_page_size(device, region, u64::from(size)) == Some(size))
    });
    let Some(page_size) = page_size else {
        return Err(NtfsError::corrupt("restart page", "no restart page header"));
    };
    let page_size = u64::from(page_size);
    let mut best: Option<(RestartArea, u64)> = None;
    for copy in 0..RESTART_PAGES {
        let raw = match read_region(device, region, copy * page_size, page_size as usize) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "fntfs::log", copy, error = %err, "restart page unreadable");
                continue;
            }
        };
        match RestartArea::decode_page(&raw) {
            Ok(area) => {
                if best.as_ref().is_none_or(|(current, _)| area.sequence > current.sequence) {
                    best = Some((area, copy));
                }
            }
            Err(err) => {
                warn!(target: "fntfs::log", copy, error = %err, "ignoring invalid restart page");
            }
        }
    }
    best.ok_or_else(|| NtfsError::corrupt("restart page", "no valid restart area"))
}

fn analysis_start(
    restart: &RestartArea,
    transactions: &RestartTable<TransactionEntry>,
    dirty_pages: &RestartTable<DirtyPageEntry>,
) -> Lsn {
    let mut start = restart.checkpoint_lsn;
    for (_, entry) in transactions.iter() {
        if !entry.first_lsn.is_zero() {
            start = start.min(entry.first_lsn);
        }
    }
    for (_, entry) in dirty_pages.iter() {
        start = start.min(entry.oldest_lsn);
    }
    start
}

struct PageReader<'a, D: SectorDevice + ?Sized> {
    device: &'a D,
    region: &'a LogRegion,
    page_size: usize,
    record_pages: u64,
}

impl<D: SectorDevice + ?Sized> PageReader<'_, D> {
    fn read_stream_page(&self, stream_page: u64) -> Result<Option<Vec<LogRecord>>> {
        let physical = RESTART_PAGES + stream_page % self.record_pages;
        let raw = read_region(self.device, self.region, physical * self.page_size as u64, self.page_size)?;
        Ok(RecordPage::decode(&raw, stream_page)?.map(|(_, records)| records))
    }

    fn record_at(&self, lsn: Lsn) -> Result<LogRecord> {
        let stream_page = lsn.get() / self.page_size as u64;
        self.read_stream_page(stream_page)?
            .and_then(|records| records.into_iter().find(|record| record.lsn == lsn))
            .ok_or_else(|| NtfsError::corrupt("log record page", format!("no record at lsn {lsn}")))
    }

    fn table_dump<E: crate::table::RestartEntry>(
        &mut self,
        lsn: Lsn,
        version: RestartVersion,
    ) -> Result<RestartTable<E>> {
        if lsn.is_zero() {
            return Ok(RestartTable::new(version, 0));
        }
        let record = self.record_at(lsn)?;
        RestartTable::decode(&record.redo_data, version)
    }

    /// Records at or after `start` up to the end of the log, and the stream
    /// page the writer continues at.
    fn scan_from(&self, start: Lsn) -> Result<(Vec<LogRecord>, u64)> {
        let first_page = start.get() / self.page_size as u64;
        let mut records = Vec::new();
        let mut stream_page = first_page;
        while stream_page < first_page + self.record_pages {
            match self.read_stream_page(stream_page)? {
                Some(page_records) => {
                    records.extend(page_records.into_iter().filter(|record| record.lsn >= start));
                    stream_page += 1;
                }
                None => break,
            }
        }
        Ok((records, stream_page))
    }
}
