//! Throughput of the main read and write paths.

use std::sync::Arc;

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use leveled_lsm::env::MemEnv;
use leveled_lsm::{Db, Options, ReadOptions, StorageIterator, WriteBatch, WriteOptions};

const VALUE_SIZE: usize = 100;
const NUM_KEYS: u64 = 10_000;

fn key(i: u64) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[..3].copy_from_slice(b"key");
    buf[8..].copy_from_slice(&i.to_be_bytes());
    buf
}

fn open_mem() -> Db {
    let options = Options::new()
        .env(Arc::new(MemEnv::new()))
        .create_if_missing(true);
    Db::open(options, "/bench").unwrap()
}

fn filled_db() -> Db {
    let db = open_mem();
    let value = vec![b'v'; VALUE_SIZE];
    for i in 0..NUM_KEYS {
        db.put(&WriteOptions::new(), &key(i), &value).unwrap();
    }
    db.compact_range(None, None).unwrap();
    db
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(1));
    let value = vec![b'v'; VALUE_SIZE];

    let db = open_mem();
    let mut i = 0u64;
    group.bench_function("put_sequential", |b| {
        b.iter(|| {
            db.put(&WriteOptions::new(), &key(i), &value).unwrap();
            i += 1;
        })
    });

    let db = open_mem();
    let mut rng_state = 0x9e3779b97f4a7c15u64;
    group.bench_function("put_random", |b| {
        b.iter(|| {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            db.put(&WriteOptions::new(), &key(rng_state % 1_000_000), &value)
                .unwrap();
        })
    });

    group.throughput(Throughput::Elements(100));
    let db = open_mem();
    let mut next = 0u64;
    group.bench_function("write_batch_100", |b| {
        b.iter_batched(
            || {
                let mut batch = WriteBatch::new();
                for _ in 0..100 {
                    batch.put(&key(next), &value);
                    next += 1;
                }
                batch
            },
            |batch| db.write(&WriteOptions::new(), batch).unwrap(),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_reads(c: &mut Criterion) {
    let db = filled_db();
    let mut group = c.benchmark_group("read");

    let mut i = 0u64;
    group.bench_function("get_hit", |b| {
        b.iter(|| {
            let found = db.get(&ReadOptions::new(), &key(i % NUM_KEYS)).unwrap();
            i = i.wrapping_add(7919);
            black_box(found)
        })
    });

    let mut j = 0u64;
    group.bench_function("get_miss", |b| {
        b.iter(|| {
            let found = db.get(&ReadOptions::new(), &key(NUM_KEYS + j)).unwrap();
            j += 1;
            black_box(found)
        })
    });

    group.throughput(Throughput::Elements(NUM_KEYS));
    group.bench_function("scan_all", |b| {
        b.iter(|| {
            let mut iter = db.iter(&ReadOptions::new());
            iter.seek_to_first().unwrap();
            let mut n = 0u64;
            while iter.is_valid() {
                n += 1;
                iter.next().unwrap();
            }
            assert_eq!(n, NUM_KEYS);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_writes, bench_reads);
criterion_main!(benches);
