use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fntfs_record::{DataRun, DataRunSequence};

/// Fragmented mapping: alternating forward/backward jumps with a hole every
/// eighth run, the shape a long-lived MFT data attribute ends up with.
fn fragmented(runs: usize) -> DataRunSequence {
    let mut lcn = 1_000_000_u64;
    let list = (0..runs)
        .map(|index| {
            let length = 1 + (index as u64 * 37) % 300;
            if index % 8 == 7 {
                return DataRun::sparse(length);
            }
            lcn = if index % 2 == 0 {
                lcn + 5_000 + index as u64
            } else {
                lcn.saturating_sub(2_000)
            };
            DataRun::new(length, lcn)
        })
        .collect();
    DataRunSequence::from_runs(list).expect("runs are non-empty")
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_run_codec");
    for runs in [16_usize, 256, 4096] {
        let sequence = fragmented(runs);
        let encoded = sequence.encode();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", runs), &sequence, |b, seq| {
            b.iter(|| seq.encode());
        });
        group.bench_with_input(BenchmarkId::new("decode", runs), &encoded, |b, bytes| {
            b.iter(|| DataRunSequence::decode(bytes).expect("valid encoding"));
        });
        let total = sequence.cluster_count();
        group.bench_with_input(BenchmarkId::new("translate", runs), &sequence, |b, seq| {
            b.iter(|| seq.translate_to_lcn(total / 3, total / 3));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
