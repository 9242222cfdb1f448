//! Database operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sealdb_bench::{generate_records, Record};
use sealdb_core::{Config, Database, KeyMaterial};
use tempfile::tempdir;

/// Benchmark committing one object per transaction.
fn bench_single_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_commit");
    let key = KeyMaterial::generate();

    for size in [64, 1024, 8192].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = Database::open_in_memory(Some(key.as_bytes())).unwrap();
            let record = generate_records(1, size).remove(0);

            b.iter(|| {
                db.transaction(|txn| txn.add(black_box(&record))).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark committing batches of objects in one transaction.
fn bench_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_commit");
    let key = KeyMaterial::generate();

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let db = Database::open_in_memory(Some(key.as_bytes())).unwrap();
                let records = generate_records(batch_size, 128);

                b.iter(|| {
                    db.transaction(|txn| {
                        for record in &records {
                            txn.add(record)?;
                        }
                        Ok(())
                    })
                    .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a full scan of stored objects, with and without the page cache.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    let key = KeyMaterial::generate();

    for (name, cache) in [("cached", 256), ("uncached", 0)] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.sealdb");
        let config = Config::default().page_cache_capacity(cache);
        let db = Database::open_with_config(&path, Some(key.as_bytes()), config).unwrap();
        db.transaction(|txn| {
            for record in generate_records(1000, 256) {
                txn.add(&record)?;
            }
            Ok(())
        })
        .unwrap();

        group.throughput(Throughput::Elements(1000));
        group.bench_function(name, |b| {
            b.iter(|| {
                let count = db.all_of::<Record>().filter(Result::is_ok).count();
                black_box(count);
            });
        });
    }
    group.finish();
}

/// Benchmark opening an encrypted file, which verifies the key.
fn bench_open(c: &mut Criterion) {
    let key = KeyMaterial::generate();
    let dir = tempdir().unwrap();
    let path = dir.path().join("open.sealdb");
    Database::open(&path, Some(key.as_bytes()))
        .unwrap()
        .close()
        .unwrap();

    c.bench_function("open_encrypted", |b| {
        b.iter(|| {
            let db = Database::open(black_box(&path), Some(key.as_bytes())).unwrap();
            db.close().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_single_commit,
    bench_batch_commit,
    bench_scan,
    bench_open
);
criterion_main!(benches);
