use fntfs_device::{ExclusiveGuard, FileDevice, SectorDevice};
use fntfs_error::NtfsError;

#[test]
fn test_file_device_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.img");

    let device = FileDevice::create(&path, 512, 64).unwrap();
    assert_eq!(device.total_sectors(), 64);
    device.write_sectors(10, &[0x5A_u8; 1024]).unwrap();
    device.flush().unwrap();
    drop(device);

    let reopened = FileDevice::open(&path, 512).unwrap();
    assert!(reopened.is_writable());
    assert_eq!(reopened.read_sectors(10, 2).unwrap(), vec![0x5A_u8; 1024]);
    assert_eq!(reopened.read_sectors(12, 1).unwrap(), vec![0_u8; 512]);
}

#[test]
fn test_file_device_bounds_and_lock() {
    let dir = tempfile::tempdir().unwrap();
    let device = FileDevice::create(dir.path().join("small.img"), 512, 4).unwrap();
    assert!(device.read_sectors(4, 1).is_err(), "case=read_past_end");
    assert!(device.write_sectors(3, &[0_u8; 1024]).is_err(), "case=write_past_end");

    let guard = ExclusiveGuard::acquire(&device).unwrap();
    let shared = device.clone();
    assert!(matches!(shared.lock_exclusive(), Err(NtfsError::Busy)));
    drop(guard);
    shared.lock_exclusive().unwrap();
    shared.release().unwrap();
}

#[test]
fn test_file_device_rejects_bad_sector_size() {
    let dir = tempfile::tempdir().unwrap();
    assert!(FileDevice::create(dir.path().join("bad.img"), 300, 4).is_err());
}
