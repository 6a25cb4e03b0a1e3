//! # Leveled LSM-Tree Storage Engine
//!
//! A persistent, ordered key-value store built on a log-structured merge
//! tree with leveled compaction.
//!
//! ## Core idea
//! Writes are appended to a log and inserted into an in-memory sorted
//! table. When that fills up it is written out as an immutable sorted table
//! file at level 0. A background thread merges files down through levels
//! 1..6, each holding non-overlapping files and about ten times the bytes
//! of the level above, so a point lookup reads at most one file per level
//! below 0.
//!
//! The set of files making up the database at any moment is a *version*.
//! Every change to it is appended to the MANIFEST as a *version edit*, so a
//! restart replays the MANIFEST and then any logs newer than the last
//! flush.
//!
//! ## Layout
//! - [`types`], [`coding`], [`comparator`]: internal key format and byte
//!   encodings
//! - [`memtable`]: arena-backed skip list holding recent writes
//! - [`wal`]: log record framing, used for both logs and the MANIFEST
//! - [`sstable`], [`bloom`], [`cache`], [`table_cache`]: the table file
//!   format and the caches in front of it
//! - [`version`], [`compaction`]: the file set, its history and merging
//! - [`db`]: the database itself
//! - [`env`]: filesystem abstraction, with an in-memory implementation for
//!   tests

pub mod bloom;
pub mod cache;
pub mod coding;
pub mod comparator;
pub mod compaction;
pub mod config;
pub mod crc;
pub mod db;
pub mod env;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod memtable;
pub mod options;
pub mod sstable;
pub mod table_cache;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use comparator::{BytewiseComparator, Comparator};
pub use db::{Db, DbIterator, Handler, Snapshot, WriteBatch, destroy_db, repair_db};
pub use env::{DiskEnv, Env, MemEnv};
pub use error::{Error, Result};
pub use iterator::StorageIterator;
pub use options::{BlockCache, Options, ReadOptions, WriteOptions};
