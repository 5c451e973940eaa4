use fntfs::{FormatOptions, MountOptions, NtfsError};
use tempfile::tempdir;

fn small_options() -> FormatOptions {
    FormatOptions {
        log_size_bytes: 256 * 1024,
        volume_label: "image".to_owned(),
        ..FormatOptions::default()
    }
}

#[test]
fn test_image_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("volume.img");
    {
        let mut volume = fntfs::format_image(&path, 8 * 1024 * 1024, &small_options()).unwrap();
        let docs = volume.create_file(volume.root(), "docs", true).unwrap();
        let note = volume.create_file(docs.reference(), "note.txt", false).unwrap();
        volume.write_data(&note, 0, b"persisted through a file").unwrap();
        volume.close().unwrap();
    }
    let volume = fntfs::open_image(&path, 512, &MountOptions::default()).unwrap();
    assert_eq!(volume.label().unwrap(), "image");
    let note = volume.get_file_record_by_path("/docs/note.txt").unwrap();
    assert_eq!(volume.read_data(&note, 0, 64).unwrap(), b"persisted through a file");
}

#[test]
fn test_open_image_rejects_garbage() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage.img");
    std::fs::write(&path, vec![0xA5_u8; 1024 * 1024]).unwrap();
    let err = fntfs::open_image(&path, 512, &MountOptions::default()).unwrap_err();
    assert!(matches!(err, NtfsError::CorruptFormat { .. }), "err={err}");
}
