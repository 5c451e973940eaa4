//! Log lifecycle against an in-memory device: append, flush, checkpoint,
//! wrap, reopen, and restart analysis.

use std::sync::Arc;

use fntfs_device::{MemoryDevice, SectorDevice};
use fntfs_error::NtfsError;
use fntfs_log::{
    LogFile, LogOperation, LogRecord, LogRegion, RecoveryMode, RestartVersion, analyze,
};
use fntfs_types::{Lsn, SegmentReference};

const PAGE: u32 = 4096;

fn device(record_pages: u64) -> (Arc<MemoryDevice>, LogRegion) {
    let len = (2 + record_pages) * u64::from(PAGE);
    let device = Arc::new(MemoryDevice::new(512, len / 512));
    (device, LogRegion::contiguous(0, len).unwrap())
}

fn update(vcn: u64, fill: u8, len: usize) -> LogRecord {
    LogRecord::page_update(
        LogOperation::UpdateNonResidentValue,
        0x18,
        vcn,
        vec![100 + vcn],
        0,
        0,
        vec![fill; len],
    )
}

/// Flip one byte. At the last byte of a sector this fails the fixup check
/// the same way a torn write does.
fn flip_byte(device: &MemoryDevice, offset: u64) {
    let sector = offset & !511;
    let mut data = device.read_bytes(sector, 512).unwrap();
    data[(offset - sector) as usize] ^= 0x5A;
    device.write_bytes(sector, &data).unwrap();
}

#[test]
fn committed_unforgotten_transaction_is_redone_after_reopen() {
    let (dev, region) = device(16);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();

    let done = log.begin();
    log.append(done, update(0, 1, 64)).unwrap();
    log.commit(done).unwrap();
    log.page_written(0x18, 0);
    log.forget(done, true).unwrap();

    let crashed = log.begin();
    log.append(crashed, update(1, 2, 64)).unwrap();
    log.append(crashed, update(2, 3, 64)).unwrap();
    log.commit(crashed).unwrap();

    let unfinished = log.begin();
    log.append(unfinished, update(3, 4, 64)).unwrap();
    log.flush().unwrap();
    drop(log);

    let (reopened, scan) = LogFile::open(Arc::clone(&dev), region).unwrap();
    assert!(!scan.records.is_empty());
    let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
    assert_eq!(plan.transactions_redone, 1);
    assert_eq!(plan.transactions_discarded, 1);
    assert_eq!(plan.transactions_completed, 1);
    let vcns: Vec<u64> = plan.redo.iter().map(|record| record.target_vcn).collect();
    assert_eq!(vcns, vec![1, 2], "case=redo_order");
    assert_eq!(reopened.last_lsn(), plan.end_lsn);
}

#[test]
fn finishing_recovery_records_redo_totals() {
    let (dev, region) = device(16);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();
    let crashed = log.begin();
    log.append(crashed, update(1, 2, 64)).unwrap();
    log.append(crashed, update(2, 3, 64)).unwrap();
    log.commit(crashed).unwrap();
    drop(log);

    let (mut reopened, scan) = LogFile::open(Arc::clone(&dev), region.clone()).unwrap();
    let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
    reopened.finish_recovery(&plan).unwrap();
    let stats = reopened.statistics();
    assert_eq!(stats.recoveries, 1, "case=one_recovery");
    assert_eq!(stats.transactions_redone, 1);
    assert_eq!(stats.records_redone, 2);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["records_redone"], 2);
    drop(reopened);

    let (_, scan) = LogFile::open(dev, region).unwrap();
    let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
    assert!(plan.is_empty(), "case=checkpointed_past_redo");
}

#[test]
fn unflushed_records_are_lost_and_flushed_ones_survive() {
    let (dev, region) = device(8);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();
    let id = log.begin();
    log.append(id, update(0, 1, 32)).unwrap();
    log.commit(id).unwrap();
    let durable = log.flushed_lsn();

    let late = log.begin();
    log.append(late, update(1, 2, 32)).unwrap();
    assert!(log.last_lsn() > log.flushed_lsn());
    drop(log);

    let (_, scan) = LogFile::open(dev, region).unwrap();
    assert_eq!(scan.records.last().map(|record| record.lsn), Some(durable));
}

#[test]
fn record_pages_are_never_rewritten_after_flush() {
    let (dev, region) = device(8);
    let mut log = LogFile::format(Arc::clone(&dev), region, PAGE, RestartVersion::V1).unwrap();
    let first = log.begin();
    log.append(first, update(0, 1, 32)).unwrap();
    let first_commit = log.commit(first).unwrap();
    let second = log.begin();
    log.append(second, update(1, 1, 32)).unwrap();
    let second_commit = log.commit(second).unwrap();
    assert_ne!(
        first_commit.get() / u64::from(PAGE),
        second_commit.get() / u64::from(PAGE),
        "case=flush_seals_page"
    );
}

#[test]
fn torn_tail_page_ends_the_log() {
    let (dev, region) = device(8);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();
    let kept = log.begin();
    log.append(kept, update(0, 1, 32)).unwrap();
    log.commit(kept).unwrap();

    let torn = log.begin();
    log.append(torn, update(1, 2, 2000)).unwrap();
    let torn_commit = log.commit(torn).unwrap();
    drop(log);

    let stream_page = torn_commit.get() / u64::from(PAGE);
    let physical = (2 + stream_page % 8) * u64::from(PAGE);
    flip_byte(&dev, physical + 3 * 512 - 1);

    let (_, scan) = LogFile::open(dev, region).unwrap();
    let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
    assert!(scan.records.iter().all(|record| record.transaction_id == kept));
    assert_eq!(plan.redo.len(), 1);
    assert_eq!(plan.redo[0].target_vcn, 0);
}

#[test]
fn checkpoints_alternate_restart_copies() {
    let (dev, region) = device(8);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();
    log.checkpoint().unwrap();
    let newest = log.checkpoint().unwrap();
    assert_eq!(log.restart_area().sequence, 3);
    drop(log);

    // Sequence 2 went to copy 0, sequence 3 to copy 1.
    let intact = dev.snapshot();
    flip_byte(&dev, u64::from(PAGE) + 1023);
    let (log, _) = LogFile::open(Arc::clone(&dev), region.clone()).unwrap();
    assert_eq!(log.restart_area().sequence, 2, "case=fallback_to_older_copy");

    let (log, scan) = LogFile::open(Arc::new(intact), region.clone()).unwrap();
    assert_eq!(log.restart_area().sequence, 3);
    assert_eq!(scan.restart.checkpoint_lsn, newest);

    flip_byte(&dev, 1023);
    let err = LogFile::open(dev, region).unwrap_err();
    assert!(err.is_corruption(), "case=both_copies_bad err={err}");
}

#[test]
fn checkpoint_lets_the_log_wrap() {
    let (dev, region) = device(4);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V1).unwrap();

    for round in 0..20_u64 {
        let id = log.begin();
        log.append(id, update(round, round as u8, 1500)).unwrap();
        log.commit(id).unwrap();
        log.page_written(0x18, round);
        log.forget(id, true).unwrap();
        log.checkpoint().unwrap();
    }
    let stats = log.statistics();
    assert!(stats.wraps >= 1, "case=wrapped stats={stats:?}");
    assert_eq!(stats.open_transactions, 0);
    assert_eq!(stats.dirty_pages, 0);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["checkpoints"], 20);
    drop(log);

    let (_, scan) = LogFile::open(dev, region).unwrap();
    let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
    assert!(plan.is_empty(), "case=clean_after_wrap");
}

#[test]
fn long_open_transaction_fills_the_log() {
    let (dev, region) = device(4);
    let mut log = LogFile::format(dev, region, PAGE, RestartVersion::V1).unwrap();
    let id = log.begin();
    let mut failure = None;
    for vcn in 0..64 {
        if let Err(err) = log.append(id, update(vcn, 7, 1500)) {
            failure = Some(err);
            break;
        }
    }
    assert!(matches!(failure, Some(NtfsError::OutOfSpace(_))), "case=pinned_by_first_lsn");
    assert_eq!(log.free_pages(), 0);
}

#[test]
fn oversized_record_is_unsupported() {
    let (dev, region) = device(4);
    let mut log = LogFile::format(dev, region, PAGE, RestartVersion::V1).unwrap();
    let id = log.begin();
    let too_big = log.max_record_len();
    let err = log.append(id, update(0, 0, too_big)).unwrap_err();
    assert!(matches!(err, NtfsError::UnsupportedFormat(_)), "err={err}");
}

#[test]
fn v0_tables_survive_a_checkpoint_with_open_work() {
    let (dev, region) = device(8);
    let mut log = LogFile::format(Arc::clone(&dev), region.clone(), PAGE, RestartVersion::V0).unwrap();
    let mft = log.open_attribute(SegmentReference::new(0, 1), 0x80, 0).unwrap();
    assert_eq!(log.open_attribute(SegmentReference::new(0, 1), 0x80, 0).unwrap(), mft);

    let id = log.begin();
    let mut record = update(5, 9, 128);
    record.target_attribute = mft;
    let first = log.append(id, record).unwrap();
    log.checkpoint().unwrap();
    assert!(!log.restart_area().clean);
    drop(log);

    let (log, scan) = LogFile::open(dev, region).unwrap();
    assert_eq!(log.version(), RestartVersion::V0);
    assert_eq!(scan.transaction_table.len(), 1);
    let (_, dirty) = scan.dirty_page_table.iter().next().unwrap();
    assert_eq!((dirty.vcn, dirty.oldest_lsn, dirty.lcns.clone()), (5, first, vec![105]));
    assert_eq!(scan.open_attribute_table.len(), 1);
    assert_eq!(scan.records.first().map(|record| record.lsn), Some(first), "case=scan_from_oldest");
    assert_eq!(log.open_attributes().len(), 1);
    assert_ne!(first, Lsn::ZERO);
}

#[test]
fn format_rejects_bad_geometry() {
    let (dev, region) = device(2);
    assert!(matches!(
        LogFile::format(Arc::clone(&dev), region, PAGE, RestartVersion::V1),
        Err(NtfsError::InvalidArgument(_))
    ));
    let (dev, region) = device(8);
    assert!(matches!(
        LogFile::format(dev, region, 3000, RestartVersion::V1),
        Err(NtfsError::InvalidArgument(_))
    ));
}
