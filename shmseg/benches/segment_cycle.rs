//! Segment lifecycle and payload access benchmarks

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use shmseg::{SharedMemory, ShmConfig};
use std::hint::black_box;

fn bench_key(tag: &str) -> String {
    format!("bench_{tag}_{}", std::process::id())
}

/// Full create / open / drop / remove cycle for several payload sizes
fn bench_lifecycle(c: &mut Criterion) {
    let shm = SharedMemory::new(&ShmConfig::default());
    let mut group = c.benchmark_group("lifecycle");

    for size in [64usize, 4096, 1 << 20] {
        let key = bench_key(&format!("cycle_{size}"));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let created = shm.create(&key, size).unwrap();
                let opened = shm.open(&key).unwrap();
                black_box(opened.len());
                drop((created, opened));
                black_box(shm.remove(&key).unwrap());
            });
        });
    }
    group.finish();
}

/// Open of an existing segment, which is header validation plus a mapping
fn bench_open(c: &mut Criterion) {
    let shm = SharedMemory::new(&ShmConfig::default());
    let key = bench_key("open");
    let _owner = shm.create(&key, 4096).unwrap();

    c.bench_function("open_4k", |b| {
        b.iter(|| black_box(shm.open(&key).unwrap().len()));
    });

    let _ = shm.remove(&key);
}

/// Bounds-checked payload copies through a view
fn bench_view_access(c: &mut Criterion) {
    let shm = SharedMemory::new(&ShmConfig::default());
    let key = bench_key("access");
    let view = shm.create(&key, 65536).unwrap();

    let data_1k = vec![0xAAu8; 1024];
    let mut buf = vec![0u8; 1024];

    c.bench_function("write_at_1k", |b| {
        b.iter(|| view.write_at(black_box(512), &data_1k).unwrap());
    });
    c.bench_function("read_at_1k", |b| {
        b.iter(|| {
            view.read_at(black_box(512), &mut buf).unwrap();
            black_box(buf[0]);
        });
    });

    drop(view);
    let _ = shm.remove(&key);
}

criterion_group!(benches, bench_lifecycle, bench_open, bench_view_access);
criterion_main!(benches);
