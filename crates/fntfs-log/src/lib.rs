//! Write-ahead log for metadata changes.
//!
//! Every change to a metadata page is first described by a [`LogRecord`]
//! appended to a transaction. Records become durable on [`LogFile::flush`]
//! (and on commit), and pages may only be written once the log covers
//! them. Periodic checkpoints dump the restart tables and advance the
//! restart area so the circular log can reuse its oldest pages.
//!
//! After a crash, [`LogFile::open`] returns the records from the last
//! checkpoint on and [`analyze`] selects those that must be reapplied.

pub mod entries;
pub mod log_file;
pub mod op;
pub mod page;
pub mod record;
pub mod recovery;
pub mod region;
pub mod restart;
pub mod stats;
pub mod table;
pub mod transaction;

pub use entries::{DirtyPageEntry, OpenAttributeEntry, TransactionEntry, TransactionEntryState};
pub use log_file::{LogFile, LogScan};
pub use op::LogOperation;
pub use page::{RCRD_SIGNATURE, RecordPage, records_offset};
pub use record::{LOG_RECORD_HEADER_LEN, LogRecord};
pub use recovery::{RecoveryMode, RecoveryPlan, analyze};
pub use region::LogRegion;
pub use restart::{RSTR_SIGNATURE, RestartArea};
pub use stats::LogStatistics;
pub use table::{RestartEntry, RestartTable, RestartVersion};
pub use transaction::{TransactionStatus, forget_payload};
