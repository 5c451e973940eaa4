//! Randomized transaction histories: after reopening, the redo set is
//! exactly the records of transactions that committed but were never
//! forgotten.

use std::sync::Arc;

use fntfs_device::MemoryDevice;
use fntfs_log::{LogFile, LogOperation, LogRecord, LogRegion, RecoveryMode, RestartVersion, analyze};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Forgotten,
    CommittedOnly,
    Abandoned,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Forgotten),
        Just(Outcome::CommittedOnly),
        Just(Outcome::Abandoned),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn redo_set_matches_committed_unforgotten(
        history in prop::collection::vec((outcome(), 1_usize..4), 1..12),
        checkpoint_every in 1_usize..5,
    ) {
        let len = 66 * 4096_u64;
        let dev = Arc::new(MemoryDevice::new(512, len / 512));
        let region = LogRegion::contiguous(0, len).unwrap();
        let mut log = LogFile::format(Arc::clone(&dev), region.clone(), 4096, RestartVersion::V1).unwrap();

        let mut expected = Vec::new();
        let mut vcn = 0_u64;
        for (round, (outcome, updates)) in history.iter().enumerate() {
            let id = log.begin();
            let mut vcns = Vec::new();
            for _ in 0..*updates {
                let record = LogRecord::page_update(
                    LogOperation::UpdateNonResidentValue,
                    0x18,
                    vcn,
                    vec![vcn],
                    0,
                    0,
                    vec![round as u8; 48],
                );
                log.append(id, record).unwrap();
                vcns.push(vcn);
                vcn += 1;
            }
            match outcome {
                Outcome::Forgotten => {
                    log.commit(id).unwrap();
                    for written in &vcns {
                        log.page_written(0x18, *written);
                    }
                    log.forget(id, true).unwrap();
                }
                Outcome::CommittedOnly => {
                    log.commit(id).unwrap();
                    expected.extend(vcns);
                }
                Outcome::Abandoned => {}
            }
            if round % checkpoint_every == 0 {
                log.checkpoint().unwrap();
            }
        }
        log.flush().unwrap();
        drop(log);

        let (_, scan) = LogFile::open(dev, region).unwrap();
        let plan = analyze(&scan, RecoveryMode::RollForward).unwrap();
        let redone: Vec<u64> = plan.redo.iter().map(|record| record.target_vcn).collect();
        prop_assert_eq!(redone, expected);
    }
}
