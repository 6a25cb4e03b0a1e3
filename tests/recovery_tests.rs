// Recovery: reopening after shutdown or crash, repair and destroy.
// Tests for log replay, manifest recovery and the offline tools.

use std::path::Path;
use std::sync::Arc;

use leveled_lsm::env::{Env, MemEnv};
use leveled_lsm::error::Error;
use leveled_lsm::filename::{FileType, parse_file_name};
use leveled_lsm::wal::HEADER_SIZE;
use leveled_lsm::{Db, Options, ReadOptions, WriteOptions, destroy_db, repair_db};
use tracing_subscriber::EnvFilter;

const DB: &str = "/db";

/// Engine logs, shown with `RUST_LOG=leveled_lsm=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options(env: &Arc<MemEnv>) -> Options {
    init_tracing();
    Options::new().env(env.clone()).create_if_missing(true)
}

fn open(env: &Arc<MemEnv>) -> Db {
    Db::open(options(env), DB).unwrap()
}

fn put(db: &Db, key: &str, value: &str) {
    db.put(&WriteOptions::new(), key.as_bytes(), value.as_bytes())
        .unwrap();
}

fn get(db: &Db, key: &str) -> Option<String> {
    db.get(&ReadOptions::new(), key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

/// Names of the database files of one type.
fn files_of_type(env: &MemEnv, wanted: FileType) -> Vec<String> {
    let mut names: Vec<String> = env
        .children(Path::new(DB))
        .unwrap()
        .into_iter()
        .filter(|name| parse_file_name(name).is_some_and(|(_, t)| t == wanted))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Test 1: Unflushed writes are replayed from the log on reopen
// =============================================================================
#[test]
fn reopen_replays_log() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        put(&db, "foo", "v1");
        put(&db, "baz", "v5");
    }
    {
        let db = open(&env);
        assert_eq!(get(&db, "foo").as_deref(), Some("v1"));
        assert_eq!(get(&db, "baz").as_deref(), Some("v5"));
        put(&db, "bar", "v2");
        put(&db, "foo", "v3");
    }
    let db = open(&env);
    assert_eq!(get(&db, "foo").as_deref(), Some("v3"));
    assert_eq!(get(&db, "bar").as_deref(), Some("v2"));
    assert_eq!(get(&db, "baz").as_deref(), Some("v5"));
}

// =============================================================================
// Test 2: Tables and logs are both picked up
// =============================================================================
#[test]
fn reopen_with_tables_and_log() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        for i in 0..100 {
            put(&db, &format!("key{i:03}"), "table");
        }
        db.flush_memtable().unwrap();
        for i in 50..150 {
            put(&db, &format!("key{i:03}"), "log");
        }
        db.delete(&WriteOptions::new(), b"key000").unwrap();
    }

    let db = open(&env);
    assert_eq!(get(&db, "key000"), None);
    assert_eq!(get(&db, "key001").as_deref(), Some("table"));
    assert_eq!(get(&db, "key075").as_deref(), Some("log"));
    assert_eq!(get(&db, "key149").as_deref(), Some("log"));

    // Sequence numbers continue past the recovered ones
    put(&db, "key001", "after");
    assert_eq!(get(&db, "key001").as_deref(), Some("after"));
}

// =============================================================================
// Test 3: Synced writes survive a crash; earlier unsynced ones may not
// =============================================================================
#[test]
fn synced_writes_survive_crash() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        put(&db, "early", "v");
        db.put(&WriteOptions::new().sync(true), b"durable", b"v")
            .unwrap();
        put(&db, "volatile", "v");
        // The handle is leaked the way a crash would leave it
        std::mem::forget(db);
    }
    env.drop_unsynced_data();
    // The leaked handle still holds the lock: restart on a copy of the files
    assert!(env.lock_file(&Path::new(DB).join("LOCK")).is_err());
    let fresh = Arc::new(MemEnv::new());
    for name in env.children(Path::new(DB)).unwrap() {
        if name == "LOCK" {
            continue;
        }
        let path = Path::new(DB).join(&name);
        let data = leveled_lsm::env::read_file_to_vec(env.as_ref(), &path).unwrap();
        leveled_lsm::env::write_string_to_file(fresh.as_ref(), &data, &path, true).unwrap();
    }

    let db = open(&fresh);
    // A sync covers everything logged before it
    assert_eq!(get(&db, "early").as_deref(), Some("v"));
    assert_eq!(get(&db, "durable").as_deref(), Some("v"));
    assert_eq!(get(&db, "volatile"), None);
}

// =============================================================================
// Test 4: A damaged log loses its block, or fails the open when paranoid
// =============================================================================
#[test]
fn corrupted_log_is_skipped_unless_paranoid() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        put(&db, "a", "1");
        put(&db, "b", "2");
    }
    let logs = files_of_type(&env, FileType::Log);
    assert_eq!(logs.len(), 1);
    let log = Path::new(DB).join(&logs[0]);
    env.corrupt(&log, HEADER_SIZE + 2, |bytes| bytes[0] ^= 0x80).unwrap();

    let strict = Db::open(options(&env).paranoid_checks(true), DB);
    assert!(matches!(strict, Err(Error::Corruption(_))));

    let db = open(&env);
    // Both records sat in the damaged block
    assert_eq!(get(&db, "a"), None);
    assert_eq!(get(&db, "b"), None);
    put(&db, "c", "3");
    assert_eq!(get(&db, "c").as_deref(), Some("3"));
}

// =============================================================================
// Test 5: Repair rebuilds a lost MANIFEST from tables and logs
// =============================================================================
#[test]
fn repair_after_losing_manifest() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        for i in 0..100 {
            put(&db, &format!("key{i:03}"), "flushed");
        }
        db.flush_memtable().unwrap();
        put(&db, "key100", "logged");
        put(&db, "key000", "overwritten");
    }

    for name in files_of_type(&env, FileType::Descriptor) {
        env.remove_file(&Path::new(DB).join(name)).unwrap();
    }
    assert!(Db::open(options(&env), DB).is_err());

    repair_db(&options(&env), DB).unwrap();
    assert_eq!(files_of_type(&env, FileType::Log).len(), 0);

    let db = open(&env);
    assert_eq!(get(&db, "key000").as_deref(), Some("overwritten"));
    assert_eq!(get(&db, "key050").as_deref(), Some("flushed"));
    assert_eq!(get(&db, "key100").as_deref(), Some("logged"));

    put(&db, "key101", "new");
    drop(db);
    let db = open(&env);
    assert_eq!(get(&db, "key101").as_deref(), Some("new"));
}

// =============================================================================
// Test 6: Repair of an empty directory finds nothing to do
// =============================================================================
#[test]
fn repair_empty_directory() {
    let env = Arc::new(MemEnv::new());
    let err = repair_db(&options(&env), DB).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

// =============================================================================
// Test 7: Destroy removes every database file
// =============================================================================
#[test]
fn destroy_removes_database() {
    let env = Arc::new(MemEnv::new());
    {
        let db = open(&env);
        put(&db, "k", "v");
        db.flush_memtable().unwrap();

        // Not while it is open
        assert!(destroy_db(&options(&env), DB).is_err());
    }

    destroy_db(&options(&env), DB).unwrap();
    assert!(env.children(Path::new(DB)).unwrap().is_empty());

    let reopened = Db::open(Options::new().env(env.clone()), DB);
    assert!(matches!(reopened, Err(Error::InvalidArgument(_))));

    // Destroying what is not there succeeds
    destroy_db(&options(&env), "/nowhere").unwrap();
}

// =============================================================================
// Test 8: Round trip through the real filesystem
// =============================================================================
#[test]
fn disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let opts = || Options::new().create_if_missing(true);
    {
        let db = Db::open(opts(), &path).unwrap();
        for i in 0..500 {
            db.put(&WriteOptions::new(), format!("k{i:04}").as_bytes(), b"disk")
                .unwrap();
        }
        db.flush_memtable().unwrap();
        db.put(&WriteOptions::new().sync(true), b"last", b"synced")
            .unwrap();
    }
    {
        let db = Db::open(opts(), &path).unwrap();
        assert_eq!(db.get(&ReadOptions::new(), b"k0250").unwrap(), Some(b"disk".to_vec()));
        assert_eq!(db.get(&ReadOptions::new(), b"last").unwrap(), Some(b"synced".to_vec()));
    }

    destroy_db(&opts(), &path).unwrap();
    assert!(!path.exists());
}
