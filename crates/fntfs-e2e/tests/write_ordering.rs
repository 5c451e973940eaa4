//! Log records reach stable storage before the metadata pages they describe.

use fntfs_e2e::ordering::{check_write_ahead, log_ranges};
use fntfs_e2e::{E2eError, init_tracing, mount, prepared_device};

#[test]
fn test_metadata_writes_follow_flushed_log() {
    init_tracing();
    let device = prepared_device(|volume| {
        volume.create_file(volume.root(), "seed", true)?;
        Ok(())
    })
    .unwrap();
    let mut volume = mount(&device).unwrap();
    let log = log_ranges(&volume).unwrap();
    assert!(!log.is_empty());

    device.record_history();
    let seed = volume.get_file_record_by_path("/seed").unwrap();
    let mut created = Vec::new();
    for index in 0..200 {
        let name = format!("item-{index:03}");
        created.push(volume.create_file(seed.reference(), &name, index % 10 == 0).unwrap());
    }
    for record in created.iter().step_by(3) {
        volume.delete_file(record).unwrap();
    }
    let moved = volume.get_file_record_by_path("/seed/item-001").unwrap();
    volume.move_file(&moved, volume.root(), "promoted").unwrap();
    volume.checkpoint().unwrap();
    volume.close().unwrap();

    let history = device.take_history();
    let report = check_write_ahead(&history, &log).unwrap();
    assert!(report.log_writes > 0, "case=log_written");
    assert!(report.metadata_writes > 0, "case=pages_written");
    assert!(report.flushes > 0, "case=flushed");
}

#[test]
fn test_checker_flags_page_before_flush() {
    use fntfs::WriteEvent;

    let log = [0..4096];
    let history = [
        WriteEvent::Write { offset: 512, len: 512 },
        WriteEvent::Write { offset: 8192, len: 4096 },
        WriteEvent::Flush,
    ];
    let err = check_write_ahead(&history, &log).unwrap_err();
    assert!(matches!(err, E2eError::Ordering(_)), "err={err}");
}
