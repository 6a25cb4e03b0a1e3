// Tables: data blocks, filter, metaindex, index and footer.
// Tests for building a table file and reading it back.

use std::path::Path;
use std::sync::Arc;

use leveled_lsm::comparator::BytewiseComparator;
use leveled_lsm::env::{Env, MemEnv};
use leveled_lsm::iterator::StorageIterator;
use leveled_lsm::options::{BlockCache, ReadOptions};
use leveled_lsm::sstable::format::TABLE_MAGIC_NUMBER;
use leveled_lsm::sstable::{BlockHandle, Footer, Table, TableBuilder, TableOptions};

const TABLE: &str = "/db/000007.ldb";

fn options() -> TableOptions {
    let mut opts = TableOptions::new(Arc::new(BytewiseComparator));
    // Small blocks so a few hundred entries span many of them
    opts.block_size = 256;
    opts
}

fn entry(i: usize) -> (Vec<u8>, Vec<u8>) {
    (format!("key_{i:05}").into_bytes(), format!("val_{i:05}").into_bytes())
}

fn build_table(env: &MemEnv, opts: &TableOptions, n: usize) -> u64 {
    let file = env.new_writable_file(Path::new(TABLE)).unwrap();
    let mut builder = TableBuilder::new(opts.clone(), file);
    for i in 0..n {
        let (k, v) = entry(i);
        builder.add(&k, &v).unwrap();
    }
    assert_eq!(builder.num_entries(), n as u64);
    let size = builder.finish().unwrap();
    assert_eq!(size, env.file_size(Path::new(TABLE)).unwrap());
    size
}

fn open_table(env: &MemEnv, opts: &TableOptions, size: u64) -> Arc<Table> {
    let file = env.new_random_access_file(Path::new(TABLE)).unwrap();
    Arc::new(Table::open(opts.clone(), file, size).unwrap())
}

// =============================================================================
// Test 1: Every entry comes back, in order
// =============================================================================
#[test]
fn iterate_all_entries() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 500);
    let table = open_table(&env, &opts, size);

    let mut iter = table.iter(ReadOptions::new());
    iter.seek_to_first().unwrap();
    for i in 0..500 {
        let (k, v) = entry(i);
        assert!(iter.is_valid());
        assert_eq!(iter.key(), k.as_slice());
        assert_eq!(iter.value(), v.as_slice());
        iter.next().unwrap();
    }
    assert!(!iter.is_valid());

    iter.seek_to_last().unwrap();
    assert_eq!(iter.key(), entry(499).0.as_slice());
    iter.prev().unwrap();
    assert_eq!(iter.key(), entry(498).0.as_slice());
}

// =============================================================================
// Test 2: Seeks cross block boundaries
// =============================================================================
#[test]
fn seek_lands_in_the_right_block() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 500);
    let table = open_table(&env, &opts, size);

    let mut iter = table.iter(ReadOptions::new());
    iter.seek(b"key_00250").unwrap();
    assert_eq!(iter.key(), b"key_00250");

    // Between two keys
    iter.seek(b"key_00250x").unwrap();
    assert_eq!(iter.key(), b"key_00251");

    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"key_00000");

    iter.seek(b"z").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 3: Point lookups return the first entry at or after the key
// =============================================================================
#[test]
fn internal_get_finds_present_keys() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 300);
    let table = open_table(&env, &opts, size);
    assert!(table.has_filter());

    let read = ReadOptions::new();
    for i in (0..300).step_by(7) {
        let (k, v) = entry(i);
        let (found_key, found_value) = table.internal_get(&read, &k).unwrap().unwrap();
        assert_eq!(found_key, k);
        assert_eq!(found_value, v);
    }
}

// =============================================================================
// Test 4: The filter answers most misses without touching a data block
// =============================================================================
#[test]
fn filter_rejects_absent_keys() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 300);
    let table = open_table(&env, &opts, size);

    let read = ReadOptions::new();
    let misses = (0..1000)
        .filter(|i| {
            let key = format!("absent_{i}");
            table.internal_get(&read, key.as_bytes()).unwrap().is_none()
        })
        .count();
    // Absent keys sort before every stored key, so only a filter false
    // positive can produce a hit.
    assert!(misses > 950, "only {misses} misses");
}

// =============================================================================
// Test 5: Without a filter, lookups still work
// =============================================================================
#[test]
fn table_without_filter() {
    let env = MemEnv::new();
    let mut opts = options();
    opts.bloom_false_positive_rate = None;
    let size = build_table(&env, &opts, 100);
    let table = open_table(&env, &opts, size);
    assert!(!table.has_filter());

    let read = ReadOptions::new();
    let (k, v) = entry(42);
    assert_eq!(table.internal_get(&read, &k).unwrap(), Some((k, v)));
}

// =============================================================================
// Test 6: A flipped bit in a data block is detected
// =============================================================================
#[test]
fn corrupted_data_block_is_detected() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 200);
    env.corrupt(Path::new(TABLE), 10, |bytes| bytes[0] ^= 0x01).unwrap();

    // The index and footer are intact, so the table still opens
    let table = open_table(&env, &opts, size);
    let mut iter = table.iter(ReadOptions::new());
    let err = iter.seek_to_first().unwrap_err();
    assert!(err.is_corruption());
}

// =============================================================================
// Test 7: Footer carries the magic number; anything else is rejected
// =============================================================================
#[test]
fn footer_magic_checked_on_open() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 10);

    let data = leveled_lsm::env::read_file_to_vec(&env, Path::new(TABLE)).unwrap();
    let tail = &data[data.len() - 8..];
    assert_eq!(u64::from_le_bytes(tail.try_into().unwrap()), TABLE_MAGIC_NUMBER);

    env.corrupt(Path::new(TABLE), data.len() - 1, |bytes| bytes[0] ^= 0xff).unwrap();
    let file = env.new_random_access_file(Path::new(TABLE)).unwrap();
    assert!(Table::open(opts.clone(), file, size).is_err());

    // Too short to hold a footer
    let file = env.new_random_access_file(Path::new(TABLE)).unwrap();
    let err = Table::open(opts, file, Footer::ENCODED_LENGTH as u64 - 1).err().unwrap();
    assert!(err.is_corruption());
}

// =============================================================================
// Test 8: Offsets grow with the key and stay within the file
// =============================================================================
#[test]
fn approximate_offsets_are_monotonic() {
    let env = MemEnv::new();
    let opts = options();
    let size = build_table(&env, &opts, 500);
    let table = open_table(&env, &opts, size);

    let first = table.approximate_offset_of(b"a");
    let middle = table.approximate_offset_of(b"key_00250");
    let last = table.approximate_offset_of(b"z");
    assert_eq!(first, 0);
    assert!(middle > first);
    assert!(last > middle);
    assert!(last <= size);
}

// =============================================================================
// Test 9: Blocks go through the shared cache, unless asked not to
// =============================================================================
#[test]
fn block_cache_is_filled_on_read() {
    let env = MemEnv::new();
    let mut opts = options();
    let cache = Arc::new(BlockCache::new(1 << 20));
    opts.block_cache = Some(Arc::clone(&cache));
    let size = build_table(&env, &opts, 500);
    let table = open_table(&env, &opts, size);

    let mut iter = table.iter(ReadOptions::new().fill_cache(false));
    iter.seek_to_first().unwrap();
    while iter.is_valid() {
        iter.next().unwrap();
    }
    assert!(cache.is_empty());

    let mut iter = table.iter(ReadOptions::new());
    iter.seek_to_first().unwrap();
    while iter.is_valid() {
        iter.next().unwrap();
    }
    assert!(!cache.is_empty());
    assert!(cache.total_charge() > 0);

    // Cached blocks answer lookups just the same
    let (k, v) = entry(123);
    assert_eq!(table.internal_get(&ReadOptions::new(), &k).unwrap(), Some((k, v)));
}

// =============================================================================
// Test 10: Footer handles pointing outside the file are corruption
// =============================================================================
#[test]
fn footer_handle_past_end_of_file() {
    let env = MemEnv::new();
    let opts = options();

    for index_handle in [
        BlockHandle::new(0, u64::MAX - 2),
        BlockHandle::new(u64::MAX - 1, 8),
        BlockHandle::new(0, 1 << 40),
    ] {
        let mut data = vec![0u8; 16];
        Footer {
            metaindex_handle: BlockHandle::new(0, 0),
            index_handle,
        }
        .encode_to(&mut data);
        leveled_lsm::env::write_string_to_file(&env, &data, Path::new(TABLE), true).unwrap();

        let file = env.new_random_access_file(Path::new(TABLE)).unwrap();
        let err = Table::open(opts.clone(), file, data.len() as u64).err().unwrap();
        assert!(err.is_corruption(), "{index_handle:?}");
    }
}
