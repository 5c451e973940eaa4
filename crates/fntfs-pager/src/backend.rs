//! The log operations the pager needs.
//!
//! Kept as a trait so the pager can be driven by the real circular log
//! (through the volume's adapter) or by an in-memory stand-in in tests.

use fntfs_error::Result;
use fntfs_log::LogRecord;
use fntfs_types::Lsn;

pub trait LogBackend {
    /// Open a log transaction and return its id.
    fn begin(&mut self) -> Result<u32>;

    /// Append a page record to an open transaction.
    fn append(&mut self, transaction: u32, record: LogRecord) -> Result<Lsn>;

    /// Append the commit record and make the log durable through it.
    fn commit(&mut self, transaction: u32) -> Result<Lsn>;

    /// Close a transaction; its forget record is the last it writes.
    fn forget(&mut self, transaction: u32, committed: bool) -> Result<()>;

    /// The page reached its final location.
    fn page_written(&mut self, attribute: u16, vcn: u64);

    /// Every record at or below this LSN is durable.
    fn flushed_lsn(&self) -> Lsn;

    /// Largest encoded record the log accepts.
    fn max_record_len(&self) -> usize;
}
