// Compaction: what a merge writes to its output tables.
// Tests that read the compacted files back as internal keys.

use std::path::Path;
use std::sync::Arc;

use leveled_lsm::comparator::{BytewiseComparator, InternalKeyComparator};
use leveled_lsm::env::{Env, MemEnv};
use leveled_lsm::filename::{FileType, parse_file_name};
use leveled_lsm::iterator::StorageIterator;
use leveled_lsm::sstable::{Table, TableOptions};
use leveled_lsm::types::{SequenceNumber, ValueType, parse_internal_key};
use leveled_lsm::{Db, Options, ReadOptions, WriteOptions};

const DB: &str = "/db";

/// One decoded table entry: user key, sequence, type and value.
type Entry = (String, SequenceNumber, ValueType, String);

fn open(env: &Arc<MemEnv>) -> Db {
    let options = Options::new().env(env.clone()).create_if_missing(true);
    Db::open(options, DB).unwrap()
}

fn put(db: &Db, key: &str, value: &str) -> SequenceNumber {
    db.put(&WriteOptions::new(), key.as_bytes(), value.as_bytes())
        .unwrap();
    db.snapshot().sequence()
}

fn delete(db: &Db, key: &str) -> SequenceNumber {
    db.delete(&WriteOptions::new(), key.as_bytes()).unwrap();
    db.snapshot().sequence()
}

fn level_counts(db: &Db) -> Vec<usize> {
    (0..7)
        .map(|level| {
            db.property(&format!("leveldb.num-files-at-level{level}"))
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect()
}

/// Flush the memtable into a single table, then compact that table's level
/// into the one below. Returns the level the output landed on.
fn flush_and_compact(db: &Db) -> usize {
    db.flush_memtable().unwrap();
    let counts = level_counts(db);
    assert_eq!(counts.iter().sum::<usize>(), 1, "{counts:?}");
    let level = counts.iter().position(|&n| n == 1).unwrap();

    db.compact_level(level, None, None).unwrap();
    let counts = level_counts(db);
    assert_eq!(counts[level], 0, "{counts:?}");
    assert_eq!(counts[level + 1], 1, "{counts:?}");
    level + 1
}

/// Every entry of every table file in the database, in file order.
fn table_entries(env: &MemEnv) -> Vec<Entry> {
    let mut names: Vec<String> = env
        .children(Path::new(DB))
        .unwrap()
        .into_iter()
        .filter(|name| parse_file_name(name).is_some_and(|(_, t)| t == FileType::Table))
        .collect();
    names.sort();
    // The compaction input was deleted as obsolete
    assert_eq!(names.len(), 1, "{names:?}");

    let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
    let opts = TableOptions::new(Arc::new(icmp));
    let mut out = Vec::new();
    for name in names {
        let path = Path::new(DB).join(&name);
        let size = env.file_size(&path).unwrap();
        let file = env.new_random_access_file(&path).unwrap();
        let table = Arc::new(Table::open(opts.clone(), file, size).unwrap());

        let mut iter = table.iter(ReadOptions::new());
        iter.seek_to_first().unwrap();
        while iter.is_valid() {
            let parsed = parse_internal_key(iter.key()).unwrap();
            out.push((
                String::from_utf8(parsed.user_key.to_vec()).unwrap(),
                parsed.sequence,
                parsed.value_type,
                String::from_utf8(iter.value().to_vec()).unwrap(),
            ));
            iter.next().unwrap();
        }
    }
    out
}

// =============================================================================
// Test 1: Without snapshots only the newest value per key is written
// =============================================================================
#[test]
fn newest_entry_survives_and_deletions_are_dropped() {
    let env = Arc::new(MemEnv::new());
    let db = open(&env);

    put(&db, "apple", "v1");
    let apple = put(&db, "apple", "v2");
    put(&db, "banana", "yellow");
    delete(&db, "banana");
    let cherry = put(&db, "cherry", "red");
    // A deletion of a key that was never written
    delete(&db, "durian");

    let level = flush_and_compact(&db);
    assert!(level >= 1);

    // Nothing deeper holds these keys, so the output level is their base
    // level and tombstones have nothing left to hide.
    assert_eq!(
        table_entries(&env),
        vec![
            ("apple".to_string(), apple, ValueType::Value, "v2".to_string()),
            ("cherry".to_string(), cherry, ValueType::Value, "red".to_string()),
        ]
    );
}

// =============================================================================
// Test 2: A live snapshot keeps what it can still see
// =============================================================================
#[test]
fn snapshot_keeps_shadowed_entries_and_tombstones() {
    let env = Arc::new(MemEnv::new());
    let db = open(&env);

    put(&db, "apple", "v1");
    let apple = put(&db, "apple", "v2");
    let banana = put(&db, "banana", "yellow");
    let snapshot = db.snapshot();
    assert_eq!(snapshot.sequence(), banana);

    let banana_deleted = delete(&db, "banana");
    let cherry_old = put(&db, "cherry", "old");
    let cherry_new = put(&db, "cherry", "new");

    flush_and_compact(&db);

    assert_eq!(
        table_entries(&env),
        vec![
            // Both apple writes predate the snapshot; v1 is invisible to it
            ("apple".to_string(), apple, ValueType::Value, "v2".to_string()),
            // The snapshot still reads "yellow" under the newer tombstone
            ("banana".to_string(), banana_deleted, ValueType::Deletion, String::new()),
            ("banana".to_string(), banana, ValueType::Value, "yellow".to_string()),
            // Shadowing newer than the oldest snapshot is not collapsed
            ("cherry".to_string(), cherry_new, ValueType::Value, "new".to_string()),
            ("cherry".to_string(), cherry_old, ValueType::Value, "old".to_string()),
        ]
    );

    let at_snapshot = ReadOptions::new().snapshot(snapshot.clone());
    assert_eq!(db.get(&at_snapshot, b"banana").unwrap(), Some(b"yellow".to_vec()));
    assert_eq!(db.get(&ReadOptions::new(), b"banana").unwrap(), None);
}
