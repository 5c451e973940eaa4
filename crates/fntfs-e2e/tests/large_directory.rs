//! A single directory holding 50,000 entries, inserted out of order and then
//! emptied again.

use fntfs::{AttributeType, FormatOptions};
use fntfs_e2e::{formatted_device, init_tracing, mount};

const FILES: u64 = 50_000;
/// Coprime with `FILES`, so `i * STRIDE % FILES` visits every index once.
const STRIDE: u64 = 7919;
/// 128 MiB.
const SECTORS: u64 = 262_144;

/// `File000001` through `File050000`.
fn name(index: u64) -> String {
    format!("File{index:06}")
}

/// The `i`th name in a scattered, repeat-free order.
fn scattered(i: u64, offset: u64) -> u64 {
    (i * STRIDE + offset) % FILES + 1
}

#[test]
fn test_fifty_thousand_entries() {
    init_tracing();
    let options = FormatOptions {
        initial_mft_segments: 1024,
        mft_growth_segments: 4096,
        log_size_bytes: 4 * 1024 * 1024,
        ..FormatOptions::default()
    };
    let device = formatted_device(SECTORS, &options).unwrap();
    let mut volume = mount(&device).unwrap();
    let baseline = volume.statistics().unwrap();
    let directory = volume.create_file(volume.root(), "big", true).unwrap();

    for i in 0..FILES {
        let index = scattered(i, 0);
        volume
            .create_file(directory.reference(), &name(index), false)
            .unwrap_or_else(|err| panic!("case=create index={index} err={err}"));
    }

    let listed: Vec<String> = volume
        .list_directory(directory.reference())
        .unwrap()
        .into_iter()
        .map(|entry| entry.name.name)
        .collect();
    let expected: Vec<String> = (1..=FILES).map(name).collect();
    assert_eq!(listed.len(), expected.len(), "case=listing_len");
    assert!(listed == expected, "case=listing_order");
    assert_eq!(
        volume.verify_directory(directory.reference()).unwrap(),
        FILES as usize,
        "case=verify_full"
    );

    // Survive a remount with the index fully grown.
    volume.close().unwrap();
    let mut volume = mount(&device).unwrap();
    let probe = volume
        .get_file_record_by_path(&format!("/big/{}", name(31_337).to_uppercase()))
        .unwrap();
    assert!(!probe.is_directory());
    let grown = volume.statistics().unwrap();
    assert!(grown.mft_segments >= FILES + 17, "case=mft_grew segments={}", grown.mft_segments);

    for i in 0..FILES {
        let index = scattered(i, 13);
        let record = volume
            .get_file_record_by_path(&format!("/big/{}", name(index)))
            .unwrap();
        volume
            .delete_file(&record)
            .unwrap_or_else(|err| panic!("case=delete index={index} err={err}"));
    }

    assert!(volume.list_directory(directory.reference()).unwrap().is_empty(), "case=emptied");
    assert_eq!(volume.verify_directory(directory.reference()).unwrap(), 0);
    let emptied = volume.get_file_record(directory.reference()).unwrap();
    if let Some(bitmap) = emptied.find_attribute(AttributeType::Bitmap, "$I30") {
        let bits = bitmap.resident_data().unwrap();
        assert!(bits.iter().all(|byte| *byte == 0), "case=index_bitmap_clear");
    }

    let after = volume.statistics().unwrap();
    assert_eq!(after.used_segments, baseline.used_segments + 1, "case=segments_freed");
    volume.close().unwrap();
}
