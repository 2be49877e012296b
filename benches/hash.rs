//! 内容哈希吞吐量

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mediasync::core::{hash_file, hash_reader, HashAlgorithm};
use std::fs;

fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn hash_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let data = content(size);
        group.throughput(Throughput::Bytes(size as u64));

        for (label, algorithm) in [("md5", HashAlgorithm::Md5), ("sha1", HashAlgorithm::Sha1)] {
            group.bench_with_input(BenchmarkId::new(label, size), &data, |b, data| {
                b.iter(|| black_box(hash_reader(&data[..], algorithm).unwrap()));
            });
        }
    }

    group.finish();
}

fn file_benchmarks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    let size = 4 * 1024 * 1024;
    fs::write(&path, content(size)).unwrap();

    let mut group = c.benchmark_group("file_hash");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("md5", |b| {
        b.iter(|| black_box(hash_file(&path, HashAlgorithm::Md5).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, hash_benchmarks, file_benchmarks);
criterion_main!(benches);
