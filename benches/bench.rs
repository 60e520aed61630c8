//! Criterion benchmarks for the reverse word index.
//!
//! Covers:
//! - Posting encode and decode
//! - Join and exclude with both algorithms
//! - RAM cache inserts and segment flushes

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rwindex::codec::posting::PostingEntry;
use rwindex::codec::hash_from_u64;
use rwindex::config::IndexConfig;
use rwindex::order::KeyOrder;
use rwindex::rwi::{Container, ContainerCache, IndexCell, JoinCost, SetOps};
use std::hint::black_box;
use tempfile::TempDir;

/// Build a container of `size` postings whose URLs are multiples of `step`.
fn generate_container(word: u64, size: u64, step: u64) -> Container {
    Container::from_entries(
        hash_from_u64(word),
        KeyOrder::Base64,
        (0..size).map(|i| {
            let url = i * step;
            PostingEntry::new(hash_from_u64(url))
                .with_position((url % 97) as u32 + 1, 1, 1)
                .with_hit_count((url % 5) as u32 + 1)
        }),
    )
}

/// Benchmark posting codec operations.
fn bench_posting_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("posting_codec");

    let entry = PostingEntry::new(hash_from_u64(42))
        .with_text_stats(12, 800, 40)
        .with_position(17, 3, 2)
        .with_language("en");
    let row = entry.encode();

    group.bench_function("encode", |b| b.iter(|| black_box(black_box(&entry).encode())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(PostingEntry::decode(black_box(&row)).unwrap()))
    });

    group.finish();
}

/// Benchmark joins of a small list against lists of growing size.
fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    let small = generate_container(1, 100, 7);
    for size in [1_000u64, 10_000, 100_000] {
        let large = generate_container(2, size, 1);
        group.throughput(Throughput::Elements(size));

        for (name, cost) in [
            ("enumeration", JoinCost { enumeration_factor: 0, probe_factor: 1 }),
            ("probe", JoinCost { enumeration_factor: 1000, probe_factor: 1 }),
        ] {
            let ops = SetOps::new(cost);
            group.bench_with_input(BenchmarkId::new(name, size), &large, |b, large| {
                b.iter(|| black_box(ops.join_constructive(black_box(&small), large, None, u32::MAX)))
            });
        }
    }

    group.finish();
}

/// Benchmark exclusion with the default cost model.
fn bench_exclude(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclude");

    let ops = SetOps::default();
    let pivot = generate_container(1, 10_000, 1);
    let exclude = generate_container(2, 1_000, 3);

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("exclude_destructive", |b| {
        b.iter_with_setup(
            || pivot.clone(),
            |mut pivot| {
                let removed = ops.exclude_destructive(&mut pivot, black_box(&exclude), None);
                black_box(removed)
            },
        )
    });

    group.finish();
}

/// Benchmark RAM inserts and flushes to segment files.
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sample_size(20); // Each iteration touches the file system

    let words = 100u64;
    let per_word = 50u64;
    group.throughput(Throughput::Elements(words * per_word));

    group.bench_function("cache_add_entry", |b| {
        b.iter(|| {
            let cache = ContainerCache::new(KeyOrder::Base64);
            for w in 0..words {
                for u in 0..per_word {
                    cache.add_entry(&hash_from_u64(w), &PostingEntry::new(hash_from_u64(u)), 0);
                }
            }
            black_box(cache.posting_count())
        })
    });

    group.bench_function("cell_add_and_flush", |b| {
        b.iter_with_setup(
            || TempDir::new().unwrap(),
            |dir| {
                let config = IndexConfig::default().with_max_ram_entries(1_000);
                let cell = IndexCell::open(dir.path(), &config).unwrap();
                for w in 0..words {
                    cell.add_entries(&generate_container(w, per_word, 1)).unwrap();
                }
                cell.close().unwrap();
                black_box(cell.segment_count())
            },
        )
    });

    group.finish();
}

criterion_group!(benches, bench_posting_codec, bench_join, bench_exclude);
criterion_group!(slow_benches, bench_ingest);

criterion_main!(benches, slow_benches);
