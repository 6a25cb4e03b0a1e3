// Blocks: prefix-compressed entries with a restart array.
// Tests for building a block and iterating and seeking in it.

use std::sync::Arc;

use bytes::Bytes;
use leveled_lsm::comparator::{BytewiseComparator, Comparator};
use leveled_lsm::iterator::StorageIterator;
use leveled_lsm::sstable::{Block, BlockBuilder};

fn bytewise() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

fn build(entries: &[(&[u8], &[u8])], restart_interval: usize) -> Block {
    let mut builder = BlockBuilder::new(restart_interval);
    for (k, v) in entries {
        builder.add(k, v);
    }
    Block::new(Bytes::from(builder.build())).unwrap()
}

fn numbered(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| (format!("key{i:05}").into_bytes(), format!("value{i}").into_bytes()))
        .collect()
}

fn build_numbered(n: usize, restart_interval: usize) -> Block {
    let entries = numbered(n);
    let refs: Vec<(&[u8], &[u8])> = entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
    build(&refs, restart_interval)
}

// =============================================================================
// Test 1: Empty block has just the restart array
// =============================================================================
#[test]
fn empty_block_layout() {
    let builder = BlockBuilder::new(16);
    assert!(builder.is_empty());
    assert_eq!(builder.estimated_size(), 8);
    let data = builder.build();
    // One restart point (offset 0) plus the count
    assert_eq!(data, vec![0, 0, 0, 0, 1, 0, 0, 0]);

    let block = Block::new(Bytes::from(data)).unwrap();
    let mut iter = block.iter(bytewise());
    iter.seek_to_first().unwrap();
    assert!(!iter.is_valid());
    iter.seek(b"anything").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 2: Shared prefixes are not stored twice
// =============================================================================
#[test]
fn prefix_compression_shrinks_block() {
    let mut compressed = BlockBuilder::new(16);
    let mut uncompressed = BlockBuilder::new(1);
    for i in 0..16 {
        let key = format!("a_long_common_prefix_{i:02}");
        compressed.add(key.as_bytes(), b"v");
        uncompressed.add(key.as_bytes(), b"v");
    }
    assert!(compressed.estimated_size() < uncompressed.estimated_size());
    let estimated = compressed.estimated_size();
    assert_eq!(compressed.build().len(), estimated);
}

// =============================================================================
// Test 3: Iterate forward over every entry
// =============================================================================
#[test]
fn iterate_all_entries_forward() {
    let entries = numbered(100);
    for restart_interval in [1, 2, 16, 1000] {
        let block = build_numbered(100, restart_interval);
        let mut iter = block.iter(bytewise());
        iter.seek_to_first().unwrap();
        for (k, v) in &entries {
            assert!(iter.is_valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), v.as_slice());
            iter.next().unwrap();
        }
        assert!(!iter.is_valid());
    }
}

// =============================================================================
// Test 4: Iterate backward over every entry
// =============================================================================
#[test]
fn iterate_all_entries_backward() {
    let entries = numbered(100);
    let block = build_numbered(100, 16);
    let mut iter = block.iter(bytewise());
    iter.seek_to_last().unwrap();
    for (k, v) in entries.iter().rev() {
        assert!(iter.is_valid());
        assert_eq!(iter.key(), k.as_slice());
        assert_eq!(iter.value(), v.as_slice());
        iter.prev().unwrap();
    }
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 5: Seek lands on the first key >= target
// =============================================================================
#[test]
fn seek_finds_first_key_at_or_after_target() {
    let entries: [(&[u8], &[u8]); 4] = [(b"apple", b"1"), (b"banana", b"2"), (b"cherry", b"3"), (b"date", b"4")];
    let block = build(&entries, 2);
    let mut iter = block.iter(bytewise());

    iter.seek(b"banana").unwrap();
    assert_eq!(iter.key(), b"banana");

    iter.seek(b"blueberry").unwrap();
    assert_eq!(iter.key(), b"cherry");
    assert_eq!(iter.value(), b"3");

    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"apple");

    iter.seek(b"zucchini").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 6: Direction changes mid-block
// =============================================================================
#[test]
fn next_then_prev() {
    let block = build_numbered(50, 4);
    let mut iter = block.iter(bytewise());
    iter.seek(b"key00020").unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key(), b"key00021");
    iter.prev().unwrap();
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"key00019");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"key00020");
}

// =============================================================================
// Test 7: Malformed blocks are rejected
// =============================================================================
#[test]
fn malformed_block_is_corruption() {
    // Shorter than the restart count
    assert!(matches!(Block::new(Bytes::from_static(&[1, 0])), Err(e) if e.is_corruption()));
    // Claims more restart points than fit
    assert!(matches!(
        Block::new(Bytes::from_static(&[0, 0, 0, 0, 9, 0, 0, 0])),
        Err(e) if e.is_corruption()
    ));
}

// =============================================================================
// Test 8: An entry running past the data is reported, not read
// =============================================================================
#[test]
fn truncated_entry_reports_corruption() {
    let mut builder = BlockBuilder::new(16);
    builder.add(b"key", b"a value of some length");
    let mut data = builder.build();
    // Entry header: shared=0, non_shared=3, value_len. Inflate value_len.
    data[2] = 200;

    let block = Block::new(Bytes::from(data)).unwrap();
    let mut iter = block.iter(bytewise());
    let result = iter.seek_to_first();
    assert!(result.is_err() || !iter.is_valid());
}

// =============================================================================
// Test 9: A restart point outside the entries fails the seek
// =============================================================================
#[test]
fn restart_point_past_entries_is_corruption() {
    let mut builder = BlockBuilder::new(1);
    builder.add(b"apple", b"1");
    builder.add(b"banana", b"2");
    builder.add(b"cherry", b"3");
    let mut data = builder.build();
    // Layout tail: restart[0..3] then the count, all fixed32 LE
    let second_restart = data.len() - 12;
    data[second_restart..second_restart + 4].copy_from_slice(&0xffffu32.to_le_bytes());

    let block = Block::new(Bytes::from(data)).unwrap();
    let mut iter = block.iter(bytewise());
    let err = iter.seek(b"banana").unwrap_err();
    assert!(err.is_corruption());
    assert!(!iter.is_valid());
}
