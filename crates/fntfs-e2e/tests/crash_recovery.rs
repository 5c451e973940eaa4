//! Crash-point sweeps over namespace operations: every prefix of the
//! operation's device writes must recover to either the old or the new
//! state, and some prefixes must be completed by log redo.

use fntfs::{AttributeType, FileRecord, MemoryDevice, NtfsError, Volume};
use fntfs_e2e::crash::{CrashSweep, classify};
use fntfs_e2e::report::{CRASH_REPORT_SCHEMA_V1, CrashReport, Outcome};
use fntfs_e2e::{
    E2eResult, FIXTURE_SECTORS, fixture_options, formatted_device, init_tracing, mount,
    prepared_device,
};

fn exists(volume: &Volume<MemoryDevice>, path: &str) -> E2eResult<bool> {
    match volume.get_file_record_by_path(path) {
        Ok(_) => Ok(true),
        Err(NtfsError::NotFound(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn entry_count(volume: &Volume<MemoryDevice>, path: &str) -> E2eResult<usize> {
    let directory = volume.get_file_record_by_path(path)?;
    Ok(volume.verify_directory(directory.reference())?)
}

fn listing(volume: &Volume<MemoryDevice>, path: &str) -> Vec<String> {
    let directory = volume.get_file_record_by_path(path).unwrap();
    volume
        .list_directory(directory.reference())
        .unwrap()
        .into_iter()
        .map(|entry| entry.name.name)
        .collect()
}

fn allocation_length(record: &FileRecord) -> u64 {
    record
        .find_attribute(AttributeType::IndexAllocation, "$I30")
        .map_or(0, fntfs::AttributeRecord::data_length)
}

fn assert_crash_redo(report: &CrashReport) {
    assert_eq!(report.schema_version, CRASH_REPORT_SCHEMA_V1);
    assert!(report.count(Outcome::Before) > 0, "case=before_points op={}", report.operation);
    assert!(
        !report.redone_points().is_empty(),
        "case=crash_redo op={} report={}",
        report.operation,
        report.to_json().unwrap()
    );
    assert!(
        report
            .redone_points()
            .iter()
            .any(|point| point.recovery.transactions_redone > 0),
        "case=redo_counted op={}",
        report.operation
    );
}

/// Files a directory needs before the next insert performs the first index
/// change of the kind `grew` detects, measured on a scratch volume.
fn inserts_until(grew: impl Fn(u64, u64) -> bool) -> usize {
    let device = formatted_device(FIXTURE_SECTORS, &fixture_options()).unwrap();
    let mut volume = mount(&device).unwrap();
    let directory = volume.create_file(volume.root(), "d", true).unwrap();
    for count in 0..2000 {
        let before = allocation_length(&volume.get_file_record(directory.reference()).unwrap());
        volume
            .create_file(directory.reference(), &format!("entry-{count:04}"), false)
            .unwrap();
        let after = allocation_length(&volume.get_file_record(directory.reference()).unwrap());
        if grew(before, after) {
            return count;
        }
    }
    panic!("index never changed shape");
}

fn directory_with(entries: usize) -> MemoryDevice {
    prepared_device(|volume| {
        let directory = volume.create_file(volume.root(), "d", true)?;
        for count in 0..entries {
            volume.create_file(directory.reference(), &format!("entry-{count:04}"), false)?;
        }
        Ok(())
    })
    .unwrap()
}

fn create_entry(base: &MemoryDevice, name: &'static str, existing: usize) -> CrashReport {
    let path = format!("/d/{name}");
    CrashSweep::new(base)
        .run(
            name,
            |volume| {
                let directory = volume.get_file_record_by_path("/d")?;
                volume.create_file(directory.reference(), name, false)?;
                Ok(())
            },
            |volume| {
                let present = exists(volume, &path)?;
                let count = entry_count(volume, "/d")?;
                classify(
                    name,
                    !present && count == existing,
                    present && count == existing + 1,
                )
            },
        )
        .unwrap()
}

#[test]
fn test_crash_sweep_create() {
    init_tracing();
    let base = directory_with(3);
    let report = create_entry(&base, "new-file", 3);
    assert_crash_redo(&report);

    // A crash after the operation returned never loses it.
    let last = report.points.last().unwrap();
    assert!(!last.operation_failed);
    assert_eq!(last.outcome, Outcome::After);
}

#[test]
fn test_crash_sweep_root_promotion() {
    init_tracing();
    let existing = inserts_until(|before, after| before == 0 && after > 0);
    let base = directory_with(existing);
    let report = create_entry(&base, "entry-9999", existing);
    assert_crash_redo(&report);
}

#[test]
fn test_crash_sweep_page_split() {
    init_tracing();
    let existing = inserts_until(|before, after| before > 0 && after > before);
    let base = directory_with(existing);
    let report = create_entry(&base, "entry-9999", existing);
    assert_crash_redo(&report);
}

#[test]
fn test_crash_sweep_delete() {
    init_tracing();
    let base = prepared_device(|volume| {
        let directory = volume.create_file(volume.root(), "d", true)?;
        for name in ["keep-a", "victim", "keep-b"] {
            volume.create_file(directory.reference(), name, false)?;
        }
        Ok(())
    })
    .unwrap();
    let report = CrashSweep::new(&base)
        .with_max_points(512)
        .run(
            "delete",
            |volume| {
                let victim = volume.get_file_record_by_path("/d/victim")?;
                volume.delete_file(&victim)
            },
            |volume| {
                let present = exists(volume, "/d/victim")?;
                let count = entry_count(volume, "/d")?;
                let used = volume.statistics()?.used_segments;
                // 16 system segments, the directory and its three files.
                classify(
                    "delete",
                    present && count == 3 && used == 20,
                    !present && count == 2 && used == 19,
                )
            },
        )
        .unwrap();
    assert_crash_redo(&report);
}

#[test]
fn test_crash_sweep_move() {
    init_tracing();
    let base = prepared_device(|volume| {
        let a = volume.create_file(volume.root(), "a", true)?;
        volume.create_file(volume.root(), "b", true)?;
        volume.create_file(a.reference(), "x", false)?;
        Ok(())
    })
    .unwrap();
    let report = CrashSweep::new(&base)
        .run(
            "move",
            |volume| {
                let file = volume.get_file_record_by_path("/a/x")?;
                let target = volume.get_file_record_by_path("/b")?;
                volume.move_file(&file, target.reference(), "y")?;
                Ok(())
            },
            |volume| {
                let old = exists(volume, "/a/x")?;
                let new = exists(volume, "/b/y")?;
                let counts = (entry_count(volume, "/a")?, entry_count(volume, "/b")?);
                classify(
                    "move",
                    old && !new && counts == (1, 0),
                    !old && new && counts == (0, 1),
                )
            },
        )
        .unwrap();
    assert_crash_redo(&report);

    let recovered = mount(&base).unwrap();
    assert!(exists(&recovered, "/a/x").unwrap(), "case=base_untouched");
}

#[test]
fn test_redo_matches_clean_run() {
    init_tracing();
    let existing = inserts_until(|before, after| before > 0 && after > before);
    let base = directory_with(existing);

    let clean = base.snapshot();
    {
        let mut volume = mount(&clean).unwrap();
        let directory = volume.get_file_record_by_path("/d").unwrap();
        volume.create_file(directory.reference(), "entry-9999", false).unwrap();
    }
    let clean_volume = mount(&clean).unwrap();
    let expected = listing(&clean_volume, "/d");

    let report = create_entry(&base, "entry-9999", existing);
    for point in report.redone_points() {
        let crashed = base.snapshot();
        let mut volume = mount(&crashed).unwrap();
        crashed.fail_writes_after(point.writes_allowed);
        let directory = volume.get_file_record_by_path("/d").unwrap();
        assert!(volume.create_file(directory.reference(), "entry-9999", false).is_err());
        crashed.clear_faults();
        drop(volume);

        let recovered = mount(&crashed).unwrap();
        assert_eq!(
            listing(&recovered, "/d"),
            expected,
            "case=redo_listing writes={}",
            point.writes_allowed
        );
        let file = recovered.get_file_record_by_path("/d/entry-9999").unwrap();
        let twin = clean_volume.get_file_record_by_path("/d/entry-9999").unwrap();
        assert_eq!(file.reference(), twin.reference(), "case=redo_reference");
        assert_eq!(
            recovered.statistics().unwrap().free_clusters,
            clean_volume.statistics().unwrap().free_clusters,
            "case=redo_space"
        );
    }
}

#[test]
fn test_crash_report_json() {
    let base = directory_with(1);
    let report = create_entry(&base, "json", 1);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["schema_version"], CRASH_REPORT_SCHEMA_V1);
    assert_eq!(json["operation"], "json");
    assert_eq!(json["points"][0]["writes_allowed"], 0);
    assert_eq!(json["points"][0]["outcome"], "before");
}
