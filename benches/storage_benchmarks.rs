//! Shard storage benchmarks
//!
//! Benchmarks for the dense loading path:
//! - Footer-only shape reads
//! - Pre-sized parallel dense load
//! - Accumulating read without declared counts
//! - Fold complement gathering

use bathyshard::inventory::{Cruise, ShardLocator, ShardRef};
use bathyshard::split::make_k_folds;
use bathyshard::storage::shard::{shard_shape, write_cruise_shards};
use bathyshard::storage::{read_data, DenseLoader};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use tempfile::TempDir;

const WIDTH: usize = 4;
const CHUNK: u64 = 10_000;

/// Write one cruise of `rows` records split into `CHUNK`-sized shards.
#[allow(clippy::cast_precision_loss)]
fn create_cruise(dir: &TempDir, rows: usize) -> (ShardLocator, Cruise) {
    let locator = ShardLocator::new(dir.path(), "parquet", CHUNK);
    let features = Array2::from_shape_fn((rows, WIDTH), |(r, c)| (r * WIDTH + c) as f64 * 0.5);
    let labels: Vec<i32> = (0..rows).map(|r| i32::from(r % 50 != 0)).collect();
    let cruise = write_cruise_shards(&locator, "NGDC", "bench", features.view(), &labels).unwrap();
    (locator, cruise)
}

fn shards_of(locator: &ShardLocator, cruise: &Cruise) -> Vec<ShardRef> {
    locator.locate(cruise).unwrap().shards
}

/// Benchmark footer-only shape reads
fn bench_shard_shape(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let (locator, cruise) = create_cruise(&dir, 10_000);
    let path = locator.shard_path(cruise.region(), cruise.name(), 0);

    c.bench_function("shard_shape", |b| {
        b.iter(|| black_box(shard_shape(&path).unwrap()));
    });
}

/// Benchmark the pre-sized dense load
fn bench_dense_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_load");
    group.sample_size(20);

    for rows in [10_000, 100_000, 500_000] {
        let dir = TempDir::new().unwrap();
        let (locator, cruise) = create_cruise(&dir, rows);
        let shards = shards_of(&locator, &cruise);
        let loader = DenseLoader::new(WIDTH);

        group.bench_with_input(BenchmarkId::from_parameter(rows), &shards, |b, shards| {
            b.iter(|| black_box(loader.load(shards).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the accumulating read for comparison
fn bench_accumulating_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulating_read");
    group.sample_size(20);

    for rows in [10_000, 100_000] {
        let dir = TempDir::new().unwrap();
        let (locator, cruise) = create_cruise(&dir, rows);
        let paths: Vec<_> = shards_of(&locator, &cruise)
            .iter()
            .map(|s| s.path().to_path_buf())
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(rows), &paths, |b, paths| {
            b.iter(|| black_box(read_data(paths, WIDTH).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark gathering the training rows of each fold
fn bench_fold_gather(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let (locator, cruise) = create_cruise(&dir, 200_000);
    let shards = shards_of(&locator, &cruise);
    let dataset = DenseLoader::new(WIDTH).load(&shards).unwrap();
    let counts: Vec<(u64, u64)> = shards.iter().map(|s| (s.count(), 0)).collect();
    let kfolds = make_k_folds(&counts, 10).unwrap();

    c.bench_function("fold_gather", |b| {
        b.iter(|| {
            for fold in &kfolds.folds {
                let ranges: Vec<_> = fold
                    .complement(kfolds.total)
                    .into_iter()
                    .map(|r| usize::try_from(r.start).unwrap()..usize::try_from(r.end).unwrap())
                    .collect();
                black_box(dataset.gather_rows(&ranges));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_shard_shape,
    bench_dense_load,
    bench_accumulating_read,
    bench_fold_gather
);
criterion_main!(benches);
