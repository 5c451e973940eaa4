use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use fntfs_e2e::{mount, prepared_device};

fn populated(entries: usize) -> fntfs::MemoryDevice {
    prepared_device(|volume| {
        let directory = volume.create_file(volume.root(), "d", true)?;
        for index in 0..entries {
            volume.create_file(directory.reference(), &format!("entry-{index:05}"), false)?;
        }
        Ok(())
    })
    .expect("populate bench volume")
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("directory_create");
    for entries in [0_usize, 500, 2000] {
        let base = populated(entries);
        group.bench_with_input(BenchmarkId::from_parameter(entries), &base, |b, base| {
            b.iter_batched(
                || {
                    let device = base.snapshot();
                    let volume = mount(&device).expect("mount");
                    (device, volume)
                },
                |(_device, mut volume)| {
                    let directory = volume.get_file_record_by_path("/d").expect("lookup");
                    volume
                        .create_file(directory.reference(), "bench-new", false)
                        .expect("create");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let base = populated(2000);
    let volume = mount(&base).expect("mount");
    c.bench_function("directory_lookup_2000", |b| {
        b.iter(|| {
            volume
                .get_file_record_by_path("/d/ENTRY-01234")
                .expect("lookup")
        });
    });
}

criterion_group!(benches, bench_create, bench_lookup);
criterion_main!(benches);
