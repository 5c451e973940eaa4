use std::sync::Arc;

use fntfs_core::{FormatOptions, MountOptions, Volume};
use fntfs_device::{MemoryDevice, SectorDevice};
use fntfs_error::NtfsError;
use fntfs_log::RecoveryMode;
use fntfs_record::{FileAttributes, FileRecord};

/// 8 MiB: 2048 clusters of 4 KiB.
const SECTORS: u64 = 16_384;

fn options() -> FormatOptions {
    FormatOptions {
        log_size_bytes: 512 * 1024,
        volume_label: "scratch".to_owned(),
        ..FormatOptions::default()
    }
}

fn fresh_with(options: &FormatOptions) -> (Arc<MemoryDevice>, Volume<MemoryDevice>) {
    let device = Arc::new(MemoryDevice::new(512, SECTORS));
    let volume = Volume::format(Arc::clone(&device), options).unwrap();
    (device, volume)
}

fn fresh() -> (Arc<MemoryDevice>, Volume<MemoryDevice>) {
    fresh_with(&options())
}

fn names(volume: &Volume<MemoryDevice>, directory: &FileRecord) -> Vec<String> {
    volume
        .list_directory(directory.reference())
        .unwrap()
        .into_iter()
        .map(|entry| entry.name.name)
        .collect()
}

#[test]
fn test_format_and_reopen() {
    let (device, volume) = fresh();
    assert_eq!(volume.label().unwrap(), "scratch");
    assert!(volume.get_file_record(volume.root()).unwrap().is_directory());
    assert!(volume.list_directory(volume.root()).unwrap().is_empty());

    let stats = volume.statistics().unwrap();
    assert_eq!(stats.total_clusters, 2048);
    assert_eq!(stats.mft_segments, 64);
    assert_eq!(stats.used_segments, 16, "case=system_segments");
    // boot + MFT + MFT bitmap + log + upcase + bitmap
    assert_eq!(stats.free_clusters, 2048 - (1 + 16 + 1 + 128 + 32 + 1));
    volume.close().unwrap();

    let reopened = Volume::open(Arc::clone(&device), &MountOptions::default()).unwrap();
    assert_eq!(reopened.recovery().transactions_redone, 0, "case=clean_close");
    assert_eq!(reopened.label().unwrap(), "scratch");
    assert_eq!(reopened.boot_sector().mft_lcn, 1);
}

#[test]
fn test_open_rejects_foreign_devices() {
    let blank = Arc::new(MemoryDevice::new(512, SECTORS));
    let err = Volume::open(blank, &MountOptions::default()).unwrap_err();
    assert!(err.is_corruption(), "case=blank err={err}");

    let wide = Arc::new(MemoryDevice::new(4096, SECTORS / 8));
    let err = Volume::format(wide, &options()).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=sector_mismatch err={err}");

    let tiny = Arc::new(MemoryDevice::new(512, 1024));
    let err = Volume::format(tiny, &options()).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=too_small err={err}");
}

#[test]
fn test_roll_back_recovery_is_unsupported() {
    let (device, volume) = fresh();
    volume.close().unwrap();
    let mount = MountOptions {
        recovery: RecoveryMode::RollBack,
        ..MountOptions::default()
    };
    let err = Volume::open(device, &mount).unwrap_err();
    assert!(matches!(err, NtfsError::UnsupportedFormat(_)), "err={err}");
}

#[test]
fn test_create_lookup_and_list() {
    let (_device, mut volume) = fresh();
    let docs = volume.create_file(volume.root(), "docs", true).unwrap();
    assert!(docs.is_directory());
    assert_eq!(docs.segment_number(), 16, "case=first_user_segment");
    let readme = volume.create_file(docs.reference(), "Readme.TXT", false).unwrap();
    assert!(!readme.is_directory());
    assert_eq!(readme.data_length(), 0);
    assert_eq!(readme.file_name().unwrap().unwrap().parent, docs.reference());

    for path in ["/docs/Readme.TXT", "/DOCS/readme.txt", "docs/./README.txt", "/docs/../docs/readme.txt"] {
        let found = volume.get_file_record_by_path(path).unwrap();
        assert_eq!(found.reference(), readme.reference(), "case={path}");
    }
    assert_eq!(
        volume.get_file_record_by_path("/").unwrap().reference(),
        volume.root(),
        "case=root"
    );
    let err = volume.get_file_record_by_path("/docs/missing").unwrap_err();
    assert!(matches!(err, NtfsError::NotFound(_)), "case=missing err={err}");
    let err = volume.get_file_record_by_path("/docs/Readme.TXT/inner").unwrap_err();
    assert!(matches!(err, NtfsError::NotDirectory), "case=through_file err={err}");

    let root = volume.get_file_record(volume.root()).unwrap();
    assert_eq!(names(&volume, &root), vec!["docs".to_owned()]);
    assert_eq!(names(&volume, &docs), vec!["Readme.TXT".to_owned()]);
    assert_eq!(volume.verify_directory(docs.reference()).unwrap(), 1);
}

#[test]
fn test_create_rejects_duplicates_and_bad_parents() {
    let (_device, mut volume) = fresh();
    let root = volume.root();
    let file = volume.create_file(root, "a.txt", false).unwrap();

    let err = volume.create_file(root, "A.TXT", false).unwrap_err();
    assert!(matches!(err, NtfsError::AlreadyExists(_)), "case=case_insensitive err={err}");
    let err = volume.create_file(file.reference(), "child", false).unwrap_err();
    assert!(matches!(err, NtfsError::NotDirectory), "case=file_parent err={err}");
    let err = volume.create_file(root, "a/b", false).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=separator err={err}");

    assert_eq!(volume.list_directory(root).unwrap().len(), 1);
    assert_eq!(volume.statistics().unwrap().used_segments, 17, "case=nothing_leaked");
}

#[test]
fn test_delete_frees_space_and_requires_empty_directories() {
    let (_device, mut volume) = fresh();
    let before = volume.statistics().unwrap();
    let dir = volume.create_file(volume.root(), "d", true).unwrap();
    let file = volume.create_file(dir.reference(), "f", false).unwrap();
    let file = volume.write_data(&file, 0, &vec![0x5A; 40_000]).unwrap();

    let err = volume.delete_file(&dir).unwrap_err();
    assert!(matches!(err, NtfsError::NotEmpty), "err={err}");

    volume.delete_file(&file).unwrap();
    let err = volume.get_file_record(file.reference()).unwrap_err();
    assert!(matches!(err, NtfsError::NotFound(_)), "case=deleted err={err}");
    assert!(volume.list_directory(dir.reference()).unwrap().is_empty());
    volume.delete_file(&dir).unwrap();

    let after = volume.statistics().unwrap();
    assert_eq!(after.used_segments, before.used_segments);
    assert_eq!(after.free_clusters, before.free_clusters, "case=data_clusters_returned");

    let root = volume.get_file_record(volume.root()).unwrap();
    let err = volume.delete_file(&root).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=root err={err}");
}

#[test]
fn test_stale_reference_after_segment_reuse() {
    let (_device, mut volume) = fresh();
    let first = volume.create_file(volume.root(), "first", false).unwrap();
    volume.delete_file(&first).unwrap();
    let second = volume.create_file(volume.root(), "second", false).unwrap();
    assert_eq!(second.segment_number(), first.segment_number(), "case=slot_reused");
    assert_ne!(second.sequence_number(), first.sequence_number());

    let err = volume.get_file_record(first.reference()).unwrap_err();
    match err {
        NtfsError::NotFound(detail) => assert!(detail.contains("stale"), "detail={detail}"),
        other => panic!("expected NotFound, got {other}"),
    }
    let err = volume.write_data(&first, 0, b"late").unwrap_err();
    assert!(matches!(err, NtfsError::NotFound(_)), "case=stale_write err={err}");
}

#[test]
fn test_move_and_rename() {
    let (_device, mut volume) = fresh();
    let root = volume.root();
    let a = volume.create_file(root, "a", true).unwrap();
    let b = volume.create_file(root, "b", true).unwrap();
    let x = volume.create_file(a.reference(), "x", false).unwrap();
    volume.create_file(b.reference(), "taken", false).unwrap();

    let moved = volume.move_file(&x, b.reference(), "y").unwrap();
    assert_eq!(moved.reference(), x.reference());
    assert_eq!(moved.file_name().unwrap().unwrap().parent, b.reference());
    assert!(names(&volume, &a).is_empty());
    assert_eq!(names(&volume, &b), vec!["taken".to_owned(), "y".to_owned()]);
    assert_eq!(volume.get_file_record_by_path("/b/y").unwrap().reference(), x.reference());

    let renamed = volume.move_file(&moved, b.reference(), "Y").unwrap();
    assert_eq!(renamed.file_name().unwrap().unwrap().name, "Y", "case=case_only_rename");

    let err = volume.move_file(&renamed, b.reference(), "TAKEN").unwrap_err();
    assert!(matches!(err, NtfsError::AlreadyExists(_)), "case=collision err={err}");

    let err = volume.move_file(&a, a.reference(), "self").unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=into_itself err={err}");
    let sub = volume.create_file(a.reference(), "sub", true).unwrap();
    let err = volume.move_file(&a, sub.reference(), "loop").unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=into_descendant err={err}");

    let moved_dir = volume.move_file(&a, b.reference(), "a2").unwrap();
    assert_eq!(
        volume.get_file_record_by_path("/b/a2/sub").unwrap().reference(),
        sub.reference(),
        "case=directory_move"
    );
    assert_eq!(moved_dir.reference(), a.reference());
    assert_eq!(volume.verify_directory(b.reference()).unwrap(), 3);
}

#[test]
fn test_data_stream_round_trip() {
    let (_device, mut volume) = fresh();
    let file = volume.create_file(volume.root(), "data.bin", false).unwrap();
    let file = volume.write_data(&file, 0, b"hello").unwrap();
    assert_eq!(volume.read_data(&file, 0, 100).unwrap(), b"hello");
    assert!(file.data_attribute().unwrap().is_resident(), "case=small_stays_resident");

    let payload: Vec<u8> = (0..20_000_u32).map(|i| (i % 251) as u8).collect();
    let file = volume.write_data(&file, 3, &payload).unwrap();
    assert!(!file.data_attribute().unwrap().is_resident(), "case=converted");
    assert_eq!(file.data_length(), 20_003);
    let all = volume.read_data(&file, 0, 30_000).unwrap();
    assert_eq!(&all[..3], b"hel");
    assert_eq!(&all[3..], payload.as_slice());
    assert!(volume.read_data(&file, 20_003, 10).unwrap().is_empty(), "case=at_end");

    let file = volume.set_data_length(&file, 10).unwrap();
    assert_eq!(volume.read_data(&file, 0, 100).unwrap().len(), 10);
    let file = volume.set_data_length(&file, 9_000).unwrap();
    let grown = volume.read_data(&file, 0, 9_000).unwrap();
    assert_eq!(&grown[..3], b"hel");
    assert!(grown[10..].iter().all(|&byte| byte == 0), "case=extension_reads_zero");

    let dir = volume.get_file_record(volume.root()).unwrap();
    let err = volume.read_data(&dir, 0, 1).unwrap_err();
    assert!(matches!(err, NtfsError::IsDirectory), "err={err}");
}

#[test]
fn test_mft_grows_when_full() {
    let options = FormatOptions {
        initial_mft_segments: 32,
        mft_growth_segments: 16,
        ..options()
    };
    let (device, mut volume) = fresh_with(&options);
    let dir = volume.create_file(volume.root(), "many", true).unwrap();
    let mut created = Vec::new();
    for i in 0..40 {
        created.push(volume.create_file(dir.reference(), &format!("file-{i:02}"), false).unwrap());
    }
    let stats = volume.statistics().unwrap();
    assert_eq!(stats.mft_segments, 64, "case=grew_twice");
    assert_eq!(stats.used_segments, 16 + 1 + 40);
    volume.close().unwrap();

    let reopened = Volume::open(device, &MountOptions::default()).unwrap();
    assert_eq!(reopened.statistics().unwrap().mft_segments, 64, "case=persisted");
    for record in &created {
        reopened.get_file_record(record.reference()).unwrap();
    }
    assert_eq!(reopened.verify_directory(dir.reference()).unwrap(), 40);
}

#[test]
fn test_update_file_record() {
    let (_device, mut volume) = fresh();
    let mut file = volume.create_file(volume.root(), "notes", false).unwrap();
    let mut info = file.standard_information().unwrap();
    info.attributes |= FileAttributes::READONLY;
    file.set_standard_information(&info).unwrap();
    let updated = volume.update_file_record(&file).unwrap();
    assert!(updated.standard_information().unwrap().attributes.contains(FileAttributes::READONLY));

    let mut renamed = updated.clone();
    renamed.remove_attribute(fntfs_record::AttributeType::FileName, "");
    let err = volume.update_file_record(&renamed).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "err={err}");
}

#[test]
fn test_update_file_record_keeps_cluster_ownership() {
    let (_device, mut volume) = fresh();
    let owner = volume.create_file(volume.root(), "owner.bin", false).unwrap();
    let owner = volume.write_data(&owner, 0, &[0xab; 65_536]).unwrap();
    let borrowed = owner.data_attribute().unwrap().clone();
    assert!(!borrowed.is_resident());

    let other = volume.create_file(volume.root(), "other.bin", false).unwrap();
    let mut grafted = other.clone();
    let mut stream = borrowed;
    stream.name = "evil".to_owned();
    grafted.add_attribute(stream);
    let err = volume.update_file_record(&grafted).unwrap_err();
    assert!(matches!(err, NtfsError::InvalidArgument(_)), "case=foreign_runs err={err}");

    let err = volume.get_file_record(volume.root()).and_then(|root| volume.update_file_record(&root));
    assert!(matches!(err, Err(NtfsError::InvalidArgument(_))), "case=system_record");

    let before = volume.statistics().unwrap().free_clusters;
    let other = volume.get_file_record(other.reference()).unwrap();
    volume.delete_file(&other).unwrap();
    assert_eq!(volume.statistics().unwrap().free_clusters, before, "case=nothing_freed");

    let later = volume.create_file(volume.root(), "later.bin", false).unwrap();
    volume.write_data(&later, 0, &[0; 65_536]).unwrap();
    let owner = volume.get_file_record(owner.reference()).unwrap();
    assert_eq!(volume.read_data(&owner, 0, 65_536).unwrap(), vec![0xab; 65_536]);
}

#[test]
fn test_changes_survive_remount_without_close() {
    let (device, mut volume) = fresh();
    let dir = volume.create_file(volume.root(), "keep", true).unwrap();
    let file = volume.create_file(dir.reference(), "kept.txt", false).unwrap();
    volume.write_data(&file, 0, b"still here").unwrap();
    drop(volume);

    let reopened = Volume::open(device, &MountOptions::default()).unwrap();
    let file = reopened.get_file_record_by_path("/keep/kept.txt").unwrap();
    assert_eq!(reopened.read_data(&file, 0, 64).unwrap(), b"still here");
}

#[test]
fn test_mutations_wait_for_exclusive_access() {
    let (device, mut volume) = fresh();
    device.lock_exclusive().unwrap();
    let err = volume.create_file(volume.root(), "blocked", false).unwrap_err();
    assert!(matches!(err, NtfsError::Busy), "err={err}");
    device.release().unwrap();
    volume.create_file(volume.root(), "blocked", false).unwrap();
}

#[test]
fn test_statistics_serialize() {
    let (_device, volume) = fresh();
    let stats = volume.statistics().unwrap();
    let json = stats.to_json().unwrap();
    assert!(json.contains("\"free_clusters\""));
    assert!(json.contains("\"log\""));
    assert_eq!(stats.free_bytes(), stats.free_clusters * 4096);
}
