// Log format: block framing, fragmentation and recovery from damage.
// Tests for writing records and reading them back after a crash.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use leveled_lsm::env::{Env, MemEnv};
use leveled_lsm::wal::{BLOCK_SIZE, HEADER_SIZE, LogReader, LogWriter, Reporter};

const LOG: &str = "/wal/000003.log";

/// Counts the bytes the reader reports as dropped.
#[derive(Clone, Default)]
struct CountingReporter {
    dropped: Arc<AtomicUsize>,
    reports: Arc<AtomicUsize>,
}

impl Reporter for CountingReporter {
    fn corruption(&mut self, bytes: usize, _reason: &str) {
        self.dropped.fetch_add(bytes, Ordering::SeqCst);
        self.reports.fetch_add(1, Ordering::SeqCst);
    }
}

fn write_log(env: &MemEnv, records: &[Vec<u8>]) {
    let mut writer = LogWriter::new(env.new_writable_file(Path::new(LOG)).unwrap());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.sync().unwrap();
}

fn read_log(env: &MemEnv) -> (Vec<Vec<u8>>, CountingReporter) {
    let reporter = CountingReporter::default();
    let file = env.new_sequential_file(Path::new(LOG)).unwrap();
    let mut reader = LogReader::new(file, Some(Box::new(reporter.clone())), true);
    let mut records = Vec::new();
    while let Some(record) = reader.read_record() {
        records.push(record);
    }
    (records, reporter)
}

fn file_size(env: &MemEnv) -> u64 {
    env.file_size(Path::new(LOG)).unwrap()
}

/// `n` bytes built by repeating `partial`.
fn big(partial: &str, n: usize) -> Vec<u8> {
    partial.bytes().cycle().take(n).collect()
}

// =============================================================================
// Test 1: An empty log reads as end of file
// =============================================================================
#[test]
fn empty_log_has_no_records() {
    let env = MemEnv::new();
    write_log(&env, &[]);
    let (records, reporter) = read_log(&env);
    assert!(records.is_empty());
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 2: Small records round trip, including an empty one
// =============================================================================
#[test]
fn small_records_read_back_in_order() {
    let env = MemEnv::new();
    let written = vec![b"foo".to_vec(), b"bar".to_vec(), Vec::new(), b"xxxx".to_vec()];
    write_log(&env, &written);

    let (records, reporter) = read_log(&env);
    assert_eq!(records, written);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 3: Records larger than a block are fragmented and reassembled
// =============================================================================
#[test]
fn fragmented_records_reassemble() {
    let env = MemEnv::new();
    let written = vec![
        b"small".to_vec(),
        big("medium", 50_000),
        big("large", 100_000),
        b"tail".to_vec(),
    ];
    write_log(&env, &written);

    let (records, reporter) = read_log(&env);
    assert_eq!(records, written);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 4: A record that exactly fills a block leaves no padding
// =============================================================================
#[test]
fn record_filling_block_exactly() {
    let env = MemEnv::new();
    let n = BLOCK_SIZE - HEADER_SIZE;
    write_log(&env, &[big("foo", n), b"bar".to_vec()]);

    assert_eq!(file_size(&env), (BLOCK_SIZE + HEADER_SIZE + 3) as u64);
    let (records, _) = read_log(&env);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1], b"bar");
}

// =============================================================================
// Test 5: A block tail shorter than a header is zero-padded
// =============================================================================
#[test]
fn short_block_trailer_is_padded() {
    let env = MemEnv::new();
    // Leaves 3 bytes in the first block: too few for a header.
    let n = BLOCK_SIZE - 2 * HEADER_SIZE + 4;
    let mut writer = LogWriter::new(env.new_writable_file(Path::new(LOG)).unwrap());
    writer.add_record(&big("foo", n)).unwrap();
    assert_eq!(file_size(&env), (BLOCK_SIZE - HEADER_SIZE + 4) as u64);
    writer.add_record(b"").unwrap();
    writer.add_record(b"bar").unwrap();
    assert_eq!(file_size(&env), (BLOCK_SIZE + 2 * HEADER_SIZE + 3) as u64);
    writer.sync().unwrap();

    let (records, reporter) = read_log(&env);
    assert_eq!(records, vec![big("foo", n), Vec::new(), b"bar".to_vec()]);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 6: A checksum mismatch drops the rest of its block, then resyncs
// =============================================================================
// Six 10 000-byte records: records 0-2 and the first fragment of record 3
// sit in block 0. Corrupting record 0 loses all of block 0, the orphaned
// tail of record 3 is reported, and records 4 and 5 are read normally.
#[test]
fn checksum_mismatch_resyncs_at_next_block() {
    let env = MemEnv::new();
    let written: Vec<Vec<u8>> = (0..6u8).map(|i| vec![b'a' + i; 10_000]).collect();
    write_log(&env, &written);

    env.corrupt(Path::new(LOG), HEADER_SIZE + 10, |bytes| bytes[0] ^= 0x01)
        .unwrap();

    let (records, reporter) = read_log(&env);
    assert_eq!(records, written[4..].to_vec());
    assert!(reporter.dropped.load(Ordering::SeqCst) >= BLOCK_SIZE);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Test 7: A torn final record is dropped silently
// =============================================================================
// A crash mid-write leaves a partial record at the end. That is expected,
// not corruption.
#[test]
fn truncated_last_record_yields_preceding() {
    let env = MemEnv::new();
    let written: Vec<Vec<u8>> = (0..5).map(|i| format!("record{i}").into_bytes()).collect();
    write_log(&env, &written);

    let len = file_size(&env) as usize;
    env.truncate(Path::new(LOG), len - 3).unwrap();

    let (records, reporter) = read_log(&env);
    assert_eq!(records, written[..4].to_vec());
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 8: A torn fragmented record is dropped silently too
// =============================================================================
#[test]
fn truncated_fragmented_record_is_dropped() {
    let env = MemEnv::new();
    write_log(&env, &[b"first".to_vec(), big("x", 3 * BLOCK_SIZE)]);

    // Cut inside the second block: First and part of Middle survive.
    env.truncate(Path::new(LOG), BLOCK_SIZE + 100).unwrap();

    let (records, reporter) = read_log(&env);
    assert_eq!(records, vec![b"first".to_vec()]);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 9: Unsynced records vanish in a simulated crash
// =============================================================================
#[test]
fn unsynced_records_lost_on_crash() {
    let env = MemEnv::new();
    let mut writer = LogWriter::new(env.new_writable_file(Path::new(LOG)).unwrap());
    writer.add_record(b"durable").unwrap();
    writer.sync().unwrap();
    writer.add_record(b"volatile").unwrap();
    drop(writer);

    env.drop_unsynced_data();

    let (records, _) = read_log(&env);
    assert_eq!(records, vec![b"durable".to_vec()]);
}

// =============================================================================
// Test 10: Appending to an existing log continues its block layout
// =============================================================================
#[test]
fn append_to_existing_log() {
    let env = MemEnv::new();
    write_log(&env, &[big("a", 20_000)]);
    let existing = file_size(&env);

    let file = env.new_appendable_file(Path::new(LOG)).unwrap();
    let mut writer = LogWriter::with_offset(file, existing);
    writer.add_record(&big("b", 20_000)).unwrap();
    writer.sync().unwrap();

    let (records, reporter) = read_log(&env);
    assert_eq!(records, vec![big("a", 20_000), big("b", 20_000)]);
    assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 11: Record offsets point at each record's first header
// =============================================================================
#[test]
fn last_record_offset_tracks_block_boundaries() {
    let env = MemEnv::new();
    // Leaves 3 bytes of trailer padding, so the next record opens block 1
    let first = big("a", BLOCK_SIZE - HEADER_SIZE - 3);
    let second = b"x".to_vec();
    // Fragmented across blocks 1 and 2
    let third = big("c", BLOCK_SIZE);
    write_log(&env, &[first.clone(), second.clone(), third.clone()]);

    let file = env.new_sequential_file(Path::new(LOG)).unwrap();
    let mut reader = LogReader::new(file, None, true);

    assert_eq!(reader.read_record(), Some(first));
    assert_eq!(reader.last_record_offset(), 0);

    assert_eq!(reader.read_record(), Some(second));
    assert_eq!(reader.last_record_offset(), BLOCK_SIZE as u64);

    assert_eq!(reader.read_record(), Some(third));
    assert_eq!(reader.last_record_offset(), (BLOCK_SIZE + HEADER_SIZE + 1) as u64);

    assert_eq!(reader.read_record(), None);
}
