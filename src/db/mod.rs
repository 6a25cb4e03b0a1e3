//! The database: write path, read path, recovery and the background worker
//! that flushes memtables and runs compactions.
//!
//! ```text
//!   write ──► log ──► memtable ──(full)──► immutable memtable
//!                                               │ flush
//!                                               ▼
//!                        level 0 ──► level 1 ──► ... ──► level 6
//!                              compactions, one level at a time
//! ```
//!
//! One mutex guards the mutable state (memtables, version set, compaction
//! bookkeeping). Writers are serialized by a second lock and append to the
//! log without holding the state lock. The background thread drops the
//! state lock while it merges tables and retakes it to install the result.

mod builder;
mod iter;
mod repair;
mod snapshot;
mod write_batch;

pub use iter::DbIterator;
pub use repair::{destroy_db, repair_db};
pub use snapshot::Snapshot;
pub use write_batch::{Handler, WriteBatch};

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::compaction::{Compaction, CompactionHost, CompactionState, CompactionStats};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::NUM_LEVELS;
use crate::env::{Env, FileLock};
use crate::error::{Error, Result};
use crate::filename::{
    FileType, current_file_name, lock_file_name, log_file_name, parse_file_name, table_file_name,
};
use crate::iterator::{BoxedIterator, MergingIterator};
use crate::memtable::{MemTable, MemTableGet};
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::sstable::TableOptions;
use crate::table_cache::TableCache;
use crate::types::{InternalKey, LookupKey, MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType};
use crate::version::set::create_new_db;
use crate::version::{GetStats, Version, VersionContext, VersionEdit, VersionGet, VersionSet};
use crate::wal::{LogReader, LogWriter, Reporter};

use self::builder::build_table;
use self::snapshot::SnapshotList;

/// Table cache slots left for files that are not tables (logs, MANIFEST,
/// CURRENT, LOCK).
const NUM_NON_TABLE_CACHE_FILES: usize = 10;

enum Task {
    Compact,
    Shutdown,
}

/// A requested compaction of one level over a key range.
struct ManualCompaction {
    level: usize,
    done: bool,
    /// `None` means the start of the key space.
    begin: Option<InternalKey>,
    /// `None` means the end of the key space.
    end: Option<InternalKey>,
}

/// State guarded by the core mutex.
struct DbState {
    mem: Arc<MemTable>,
    /// Memtable being flushed.
    imm: Option<Arc<MemTable>>,
    /// Taken out by the active writer while it appends.
    log: Option<LogWriter>,
    log_file_number: u64,
    versions: VersionSet,
    /// Table files being written that no version references yet.
    pending_outputs: HashSet<u64>,
    background_compaction_scheduled: bool,
    manual_compaction: Option<ManualCompaction>,
    /// First error hit by a background task or a log write. Once set every
    /// write fails with it.
    bg_error: Option<Error>,
    /// Compaction work done per output level.
    stats: [CompactionStats; NUM_LEVELS],
    db_lock: Option<FileLock>,
}

pub(crate) struct DbInner {
    dbname: PathBuf,
    options: Options,
    env: Arc<dyn Env>,
    icmp: InternalKeyComparator,
    table_options: TableOptions,
    table_cache: Arc<TableCache>,

    state: Mutex<DbState>,
    /// Signalled when a background task finishes or fails.
    background_work_finished: Condvar,
    /// Held by the one writer allowed to append to the log.
    writer: Mutex<()>,
    snapshots: Arc<Mutex<SnapshotList>>,
    shutting_down: AtomicBool,
    /// Mirrors `imm.is_some()` so compactions can check it without the
    /// lock.
    has_imm: AtomicBool,
    scheduler: Sender<Task>,
}

/// A persistent ordered key-value store.
///
/// # Example
///
/// ```no_run
/// use leveled_lsm::{Db, Options, ReadOptions, WriteOptions};
///
/// let db = Db::open(Options::new().create_if_missing(true), "/tmp/testdb")?;
/// db.put(&WriteOptions::new(), b"key", b"value")?;
/// assert_eq!(db.get(&ReadOptions::new(), b"key")?, Some(b"value".to_vec()));
/// # Ok::<(), leveled_lsm::Error>(())
/// ```
pub struct Db {
    inner: Arc<DbInner>,
    worker: Option<JoinHandle<()>>,
}

impl Db {
    /// Open the database at `path`, replaying any logs left by a previous
    /// run.
    pub fn open(options: Options, path: impl AsRef<Path>) -> Result<Db> {
        let options = options.sanitized();
        let dbname = path.as_ref().to_path_buf();
        let env = Arc::clone(&options.env);
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let table_options = TableOptions::for_internal_keys(&options, &icmp);
        let table_cache = Arc::new(TableCache::new(
            dbname.clone(),
            Arc::clone(&env),
            table_options.clone(),
            options.max_open_files - NUM_NON_TABLE_CACHE_FILES,
        ));
        let ctx = Arc::new(VersionContext::new(
            options.clone(),
            icmp.clone(),
            Arc::clone(&table_cache),
        ));
        let versions = VersionSet::new(&dbname, ctx);
        let (scheduler, tasks) = crossbeam_channel::unbounded();

        let inner = Arc::new(DbInner {
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp.clone())),
                imm: None,
                log: None,
                log_file_number: 0,
                versions,
                pending_outputs: HashSet::new(),
                background_compaction_scheduled: false,
                manual_compaction: None,
                bg_error: None,
                stats: Default::default(),
                db_lock: None,
            }),
            dbname,
            options,
            env,
            icmp,
            table_options,
            table_cache,
            background_work_finished: Condvar::new(),
            writer: Mutex::new(()),
            snapshots: Arc::new(Mutex::new(SnapshotList::default())),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            scheduler,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("lsm-background".to_string())
            .spawn(move || background_loop(worker_inner, tasks))?;

        // On failure, dropping `db` stops the worker and releases the lock.
        let db = Db {
            inner,
            worker: Some(worker),
        };
        db.inner.initialize()?;
        Ok(db)
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Remove `key`. Not an error if it does not exist.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply every update in `batch` atomically.
    pub fn write(&self, options: &WriteOptions, mut batch: WriteBatch) -> Result<()> {
        let inner = &self.inner;
        let _writer = inner.writer.lock();
        let mut state = inner.state.lock();
        inner.make_room_for_write(&mut state, false)?;

        let last_sequence = state.versions.last_sequence();
        batch.set_sequence(last_sequence + 1);
        let mem = Arc::clone(&state.mem);
        let Some(mut log) = state.log.take() else {
            return Err(Error::Io(std::io::Error::other("database has no open log")));
        };

        // Holding the writer lock keeps other writers away from the log and
        // the memtable; readers and the background thread proceed.
        let (logged, inserted) = MutexGuard::unlocked(&mut state, || {
            let logged = log
                .add_record(batch.contents())
                .and_then(|()| if options.sync { log.sync() } else { Ok(()) });
            let inserted = match logged {
                Ok(()) => batch.insert_into(&mem),
                Err(_) => Ok(()),
            };
            (logged, inserted)
        });
        state.log = Some(log);

        if let Err(e) = logged {
            // The log may now end in part of this batch; replaying it after
            // more writes would be wrong, so refuse further writes.
            inner.record_background_error(&mut state, &e);
            return Err(e);
        }
        inserted?;
        state
            .versions
            .set_last_sequence(last_sequence + u64::from(batch.count()));
        Ok(())
    }

    /// The value stored for `key`, or `None` if there is none.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = &self.inner;
        let (sequence, mem, imm, current) = {
            let state = inner.state.lock();
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                sequence,
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
            )
        };

        let lookup = LookupKey::new(key, sequence);
        for mem in std::iter::once(&mem).chain(imm.as_ref()) {
            match mem.get(&lookup) {
                MemTableGet::Found(value) => return Ok(Some(value)),
                MemTableGet::Deleted => return Ok(None),
                MemTableGet::NotPresent => {}
            }
        }

        let mut stats = GetStats::default();
        let result = current.get(options, &lookup, &mut stats);
        if current.update_stats(&stats) {
            let mut state = inner.state.lock();
            inner.maybe_schedule_compaction(&mut state);
        }
        match result? {
            VersionGet::Found(value) => Ok(Some(value)),
            VersionGet::Deleted | VersionGet::NotFound => Ok(None),
        }
    }

    /// Iterator over the database as of now, or as of `options.snapshot`.
    /// The iterator starts unpositioned.
    pub fn iter(&self, options: &ReadOptions) -> DbIterator {
        let inner = &self.inner;
        let state = inner.state.lock();
        let sequence = match &options.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => state.versions.last_sequence(),
        };

        let mut children: Vec<BoxedIterator> = vec![Box::new(state.mem.iter())];
        if let Some(imm) = &state.imm {
            children.push(Box::new(imm.iter()));
        }
        let current = state.versions.current();
        current.add_iterators(options, &mut children);
        drop(state);

        let merged = MergingIterator::new(Arc::new(inner.icmp.clone()), children);
        DbIterator::new(
            Arc::clone(inner),
            Arc::clone(inner.icmp.user_comparator()),
            Box::new(merged),
            sequence,
            current,
        )
    }

    /// A handle to the current state. Reads through it keep seeing that
    /// state until it is dropped.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        Snapshot::new(&self.inner.snapshots, state.versions.last_sequence())
    }

    /// Compact the key range `[begin, end]` (`None` is unbounded) down the
    /// levels, dropping overwritten and deleted data. Returns once done.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let state = self.inner.state.lock();
            let current = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| current.overlap_in_level(level, begin, end))
                .max()
                .unwrap_or(1)
        };
        self.flush_memtable()?;
        for level in 0..max_level_with_files {
            self.compact_level(level, begin, end)?;
        }
        Ok(())
    }

    /// Compact the files of `level` overlapping `[begin, end]` into the next
    /// level.
    pub fn compact_level(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        if level + 1 >= NUM_LEVELS {
            return Err(Error::invalid_argument(format!("cannot compact level {level}")));
        }
        let inner = &self.inner;
        let begin = begin.map(|k| InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));
        let end = end.map(|k| InternalKey::new(k, 0, ValueType::Deletion));

        let mut state = inner.state.lock();
        while state.manual_compaction.is_some() {
            inner.background_work_finished.wait(&mut state);
        }
        state.manual_compaction = Some(ManualCompaction {
            level,
            done: false,
            begin,
            end,
        });
        inner.maybe_schedule_compaction(&mut state);

        loop {
            let done = state.manual_compaction.as_ref().is_none_or(|m| m.done);
            if done || inner.shutting_down.load(Ordering::Acquire) || state.bg_error.is_some() {
                break;
            }
            inner.background_work_finished.wait(&mut state);
        }
        state.manual_compaction = None;
        inner.background_work_finished.notify_all();

        match &state.bg_error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    /// Flush the memtable to a table file and wait for it to finish.
    pub fn flush_memtable(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let _writer = inner.writer.lock();
            let mut state = inner.state.lock();
            if !state.mem.is_empty() {
                inner.make_room_for_write(&mut state, true)?;
            }
        }

        let mut state = inner.state.lock();
        while state.imm.is_some()
            && state.bg_error.is_none()
            && !inner.shutting_down.load(Ordering::Acquire)
        {
            inner.background_work_finished.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    /// Approximate bytes of table data used by each `[start, limit)` user
    /// key range. Data still in memtables is not counted.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        // Table reads happen outside the core mutex.
        let current = self.inner.state.lock().versions.current();
        ranges
            .iter()
            .map(|(start, limit)| {
                let k1 = InternalKey::new(start, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                let k2 = InternalKey::new(limit, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                let start = current.approximate_offset_of(k1.encode());
                let limit = current.approximate_offset_of(k2.encode());
                limit.saturating_sub(start)
            })
            .collect()
    }

    /// Internal statistics by name:
    ///
    /// - `leveldb.num-files-at-level<N>`: number of files at level N
    /// - `leveldb.stats`: per-level file counts, sizes and compaction work
    /// - `leveldb.sstables`: every table file, by level
    /// - `leveldb.approximate-memory-usage`: bytes held by memtables and
    ///   the block cache
    pub fn property(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix("leveldb.")?;
        let state = self.inner.state.lock();

        if let Some(level) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(state.versions.num_level_files(level).to_string());
        }

        match rest {
            "stats" => {
                let mut out = String::new();
                out.push_str("                               Compactions\n");
                out.push_str("Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n");
                out.push_str("--------------------------------------------------\n");
                for level in 0..NUM_LEVELS {
                    let files = state.versions.num_level_files(level);
                    let stats = &state.stats[level];
                    if stats.micros > 0 || files > 0 {
                        let _ = writeln!(
                            out,
                            "{:3} {:8} {:8.0} {:9.0} {:8.0} {:9.0}",
                            level,
                            files,
                            state.versions.num_level_bytes(level) as f64 / 1048576.0,
                            stats.micros as f64 / 1e6,
                            stats.bytes_read as f64 / 1048576.0,
                            stats.bytes_written as f64 / 1048576.0
                        );
                    }
                }
                Some(out)
            }
            "sstables" => Some(state.versions.current().debug_string()),
            "approximate-memory-usage" => {
                let mut total = self
                    .inner
                    .options
                    .block_cache
                    .as_ref()
                    .map_or(0, |cache| cache.total_charge());
                total += state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_memory_usage();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::Release);
        {
            let mut state = inner.state.lock();
            while state.background_compaction_scheduled {
                inner.background_work_finished.wait(&mut state);
            }
        }
        let _ = inner.scheduler.send(Task::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let mut state = inner.state.lock();
        if let Some(mut log) = state.log.take() {
            let _ = log.close();
        }
        if let Some(lock) = state.db_lock.take() {
            let _ = inner.env.unlock_file(lock);
        }
    }
}

fn background_loop(inner: Arc<DbInner>, tasks: Receiver<Task>) {
    for task in tasks {
        match task {
            Task::Compact => inner.background_call(),
            Task::Shutdown => break,
        }
    }
    debug!("background worker stopped");
}

/// Warns about dropped log bytes during recovery, remembering the first
/// report when corruption should be fatal.
struct LogReporter {
    log_number: u64,
    error: Option<Arc<Mutex<Option<String>>>>,
}

impl Reporter for LogReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        warn!(log = self.log_number, bytes, reason, "dropping corrupted log bytes");
        if let Some(slot) = &self.error {
            let mut slot = slot.lock();
            if slot.is_none() {
                *slot = Some(format!("log #{}: {reason}", self.log_number));
            }
        }
    }
}

/// Compaction callbacks into the database.
struct Host<'a> {
    db: &'a DbInner,
}

impl CompactionHost for Host<'_> {
    fn new_output_number(&self) -> u64 {
        let mut state = self.db.state.lock();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        number
    }

    fn between_keys(&self) {
        // Memtable flushes take priority: writers may be stalled on them.
        if self.db.has_imm.load(Ordering::Acquire) {
            let mut state = self.db.state.lock();
            if state.imm.is_some() {
                self.db.compact_mem_table(&mut state);
                self.db.background_work_finished.notify_all();
            }
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.db.shutting_down.load(Ordering::Acquire)
    }
}

impl DbInner {
    /// Recover the database and open a fresh log.
    fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut edit = VersionEdit::new();
        self.recover(&mut state, &mut edit)?;

        let log_number = state.versions.new_file_number();
        let file = self
            .env
            .new_writable_file(&log_file_name(&self.dbname, log_number))?;
        state.log = Some(LogWriter::new(file));
        state.log_file_number = log_number;

        edit.set_prev_log_number(0);
        edit.set_log_number(log_number);
        state.versions.log_and_apply(&mut edit)?;
        self.delete_obsolete_files(&mut state);
        self.maybe_schedule_compaction(&mut state);
        Ok(())
    }

    fn recover(&self, state: &mut MutexGuard<'_, DbState>, edit: &mut VersionEdit) -> Result<()> {
        // The directory may already exist.
        let _ = self.env.create_dir(&self.dbname);
        state.db_lock = Some(self.env.lock_file(&lock_file_name(&self.dbname))?);

        if !self.env.file_exists(&current_file_name(&self.dbname)) {
            if !self.options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    self.dbname.display()
                )));
            }
            info!(db = %self.dbname.display(), "creating database");
            create_new_db(
                self.env.as_ref(),
                &self.dbname,
                self.icmp.user_comparator().name(),
            )?;
        } else if self.options.error_if_exists {
            return Err(Error::invalid_argument(format!(
                "{}: exists (error_if_exists is true)",
                self.dbname.display()
            )));
        }

        state.versions.recover()?;

        // Logs newer than the one the MANIFEST names were written after
        // its last edit and hold updates not yet in any table.
        let min_log = state.versions.log_number();
        let prev_log = state.versions.prev_log_number();
        let mut expected = HashSet::new();
        state.versions.add_live_files(&mut expected);
        let mut logs = Vec::new();
        for name in self.env.children(&self.dbname)? {
            if let Some((number, file_type)) = parse_file_name(&name) {
                expected.remove(&number);
                if file_type == FileType::Log && (number >= min_log || number == prev_log) {
                    logs.push(number);
                }
            }
        }
        if let Some(missing) = expected.iter().next() {
            return Err(Error::corruption(format!(
                "{} missing files; e.g. {}",
                expected.len(),
                table_file_name(&self.dbname, *missing).display()
            )));
        }

        logs.sort_unstable();
        let mut max_sequence = 0;
        for &number in &logs {
            self.recover_log_file(state, number, edit, &mut max_sequence)?;
            // A log that was never recorded in the MANIFEST may carry a
            // number past next_file.
            state.versions.mark_file_number_used(number);
        }
        if state.versions.last_sequence() < max_sequence {
            state.versions.set_last_sequence(max_sequence);
        }
        Ok(())
    }

    /// Replay one log file into memtables, flushing each to a level-0 table
    /// as it fills and at the end.
    fn recover_log_file(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        log_number: u64,
        edit: &mut VersionEdit,
        max_sequence: &mut SequenceNumber,
    ) -> Result<()> {
        let path = log_file_name(&self.dbname, log_number);
        let file = self.env.new_sequential_file(&path)?;
        info!(log = log_number, "recovering log");

        let paranoid = self.options.paranoid_checks;
        let reported = Arc::new(Mutex::new(None));
        let reporter = LogReporter {
            log_number,
            error: paranoid.then(|| Arc::clone(&reported)),
        };
        let mut reader = LogReader::new(file, Some(Box::new(reporter)), true);

        let mut mem: Option<Arc<MemTable>> = None;
        let mut flushes = 0;
        loop {
            let record = reader.read_record();
            if let Some(reason) = reported.lock().take() {
                return Err(Error::corruption(reason));
            }
            let Some(record) = record else { break };

            let batch = match WriteBatch::from_contents(record) {
                Ok(batch) => batch,
                Err(e) if paranoid => return Err(e),
                Err(e) => {
                    warn!(log = log_number, error = %e, "skipping log record");
                    continue;
                }
            };
            let table = mem.get_or_insert_with(|| Arc::new(MemTable::new(self.icmp.clone())));
            if let Err(e) = batch.insert_into(table) {
                if paranoid {
                    return Err(e);
                }
                warn!(log = log_number, error = %e, "ignoring malformed batch");
                continue;
            }
            if batch.count() > 0 {
                let last = batch.sequence() + u64::from(batch.count()) - 1;
                *max_sequence = (*max_sequence).max(last);
            }

            if table.approximate_memory_usage() > self.options.write_buffer_size {
                flushes += 1;
                let full = Arc::clone(table);
                mem = None;
                self.write_level0_table(state, &full, edit, None)?;
            }
        }

        if let Some(table) = mem {
            self.write_level0_table(state, &table, edit, None)?;
            flushes += 1;
        }
        debug!(log = log_number, flushes, "log recovered");
        Ok(())
    }

    fn make_room_for_write(&self, state: &mut MutexGuard<'_, DbState>, mut force: bool) -> Result<()> {
        let mut allow_delay = !force;
        loop {
            let level0_files = state.versions.num_level_files(0);
            if let Some(e) = &state.bg_error {
                return Err(e.duplicate());
            } else if allow_delay && level0_files >= self.options.level0_slowdown_writes_trigger {
                // Close to the hard limit. Delay each write a little rather
                // than stalling one write for seconds later, and give the
                // compaction thread some CPU.
                MutexGuard::unlocked(state, || thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
            } else if !force && state.mem.approximate_memory_usage() <= self.options.write_buffer_size {
                return Ok(());
            } else if state.imm.is_some() {
                info!("current memtable full; waiting...");
                self.background_work_finished.wait(state);
            } else if level0_files >= self.options.level0_stop_writes_trigger {
                info!(level0_files, "too many level-0 files; waiting...");
                self.background_work_finished.wait(state);
            } else {
                // Switch to a new memtable and log, and flush the old one.
                debug_assert_eq!(state.versions.prev_log_number(), 0);
                let log_number = state.versions.new_file_number();
                let file = match self.env.new_writable_file(&log_file_name(&self.dbname, log_number)) {
                    Ok(file) => file,
                    Err(e) => {
                        state.versions.reuse_file_number(log_number);
                        return Err(e);
                    }
                };
                if let Some(mut old) = state.log.replace(LogWriter::new(file)) {
                    if let Err(e) = old.close() {
                        self.record_background_error(state, &e);
                    }
                }
                state.log_file_number = log_number;
                let full = std::mem::replace(&mut state.mem, Arc::new(MemTable::new(self.icmp.clone())));
                state.imm = Some(full);
                self.has_imm.store(true, Ordering::Release);
                force = false;
                self.maybe_schedule_compaction(state);
            }
        }
    }

    fn record_background_error(&self, state: &mut DbState, e: &Error) {
        if state.bg_error.is_none() {
            error!(error = %e, "background error; database is now read-only");
            state.bg_error = Some(e.duplicate());
            self.background_work_finished.notify_all();
        }
    }

    fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.background_compaction_scheduled
            || self.shutting_down.load(Ordering::Acquire)
            || state.bg_error.is_some()
        {
            return;
        }
        // A finished manual compaction stays installed until its caller
        // wakes up; it needs no more work.
        let manual_pending = state.manual_compaction.as_ref().is_some_and(|m| !m.done);
        if state.imm.is_none() && !manual_pending && !state.versions.needs_compaction() {
            return;
        }
        if self.scheduler.send(Task::Compact).is_ok() {
            state.background_compaction_scheduled = true;
        }
    }

    fn background_call(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.background_compaction_scheduled);
        if !self.shutting_down.load(Ordering::Acquire) && state.bg_error.is_none() {
            self.background_compaction(&mut state);
        }
        state.background_compaction_scheduled = false;

        // The previous compaction may have produced too many files in a
        // level, so schedule another if needed.
        self.maybe_schedule_compaction(&mut state);
        self.background_work_finished.notify_all();
    }

    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) {
        if state.imm.is_some() {
            self.compact_mem_table(state);
            return;
        }

        let mut manual_end: Option<InternalKey> = None;
        let (compaction, is_manual) = {
            let st: &mut DbState = state;
            match st.manual_compaction.as_mut().filter(|m| !m.done) {
                Some(m) => {
                    let c = st.versions.compact_range(m.level, m.begin.as_ref(), m.end.as_ref());
                    m.done = c.is_none();
                    if let Some(c) = &c {
                        let n = c.num_input_files(0);
                        manual_end = Some(c.input(0, n - 1).largest.clone());
                    }
                    info!(
                        level = m.level,
                        begin = ?m.begin,
                        end = ?m.end,
                        stop_at = ?manual_end,
                        "manual compaction"
                    );
                    (c, true)
                }
                None => (st.versions.pick_compaction(), false),
            }
        };

        let result = match compaction {
            None => Ok(()),
            Some(c) if !is_manual && c.is_trivial_move() => self.move_file_down(state, c),
            Some(c) => {
                let result = self.do_compaction_work(state, c);
                self.delete_obsolete_files(state);
                result
            }
        };

        if let Err(e) = &result {
            if self.shutting_down.load(Ordering::Acquire) {
                // Expected while shutting down.
            } else {
                error!(error = %e, "compaction error");
                self.record_background_error(state, e);
            }
        }

        if is_manual {
            if let Some(m) = state.manual_compaction.as_mut().filter(|m| !m.done) {
                if result.is_err() {
                    m.done = true;
                }
                if !m.done {
                    // Only part of the range was compacted; resume after it.
                    m.begin = manual_end;
                }
            }
        }
    }

    /// Move a single file to the next level by editing the manifest.
    fn move_file_down(&self, state: &mut DbState, mut c: Compaction) -> Result<()> {
        let level = c.level();
        let f = Arc::clone(c.input(0, 0));
        c.edit().delete_file(level, f.number);
        c.edit()
            .add_file(level + 1, f.number, f.file_size, f.smallest.clone(), f.largest.clone());
        let mut edit = c.into_edit();
        state.versions.log_and_apply(&mut edit)?;
        info!(
            "Moved #{} to level-{} {} bytes: {}",
            f.number,
            level + 1,
            f.file_size,
            state.versions.level_summary()
        );
        Ok(())
    }

    fn do_compaction_work(&self, state: &mut MutexGuard<'_, DbState>, c: Compaction) -> Result<()> {
        let level = c.level();
        let smallest_snapshot = self
            .snapshots
            .lock()
            .oldest()
            .unwrap_or_else(|| state.versions.last_sequence());

        let mut compact = CompactionState::new(c, self.dbname.clone(), smallest_snapshot);
        let host = Host { db: self };
        let result = MutexGuard::unlocked(state, || compact.run(&host));

        let stats = compact.stats();
        state.stats[level + 1].add(&stats);
        let outputs: Vec<u64> = compact.outputs().iter().map(|o| o.number).collect();

        let result = result.and_then(|()| {
            let mut edit = compact.into_edit();
            state.versions.log_and_apply(&mut edit)
        });
        for number in outputs {
            state.pending_outputs.remove(&number);
        }

        if result.is_ok() {
            info!(
                "compacted to: {} ({} bytes read, {} bytes written)",
                state.versions.level_summary(),
                stats.bytes_read,
                stats.bytes_written
            );
        }
        result
    }

    /// Flush the immutable memtable to a table and drop the log it came
    /// from.
    fn compact_mem_table(&self, state: &mut MutexGuard<'_, DbState>) {
        let Some(imm) = state.imm.clone() else {
            return;
        };

        let mut edit = VersionEdit::new();
        let base = state.versions.current();
        let mut result = self.write_level0_table(state, &imm, &mut edit, Some(base.as_ref()));
        if result.is_ok() && self.shutting_down.load(Ordering::Acquire) {
            result = Err(Error::Io(std::io::Error::other(
                "deleting database during memtable compaction",
            )));
        }

        let result = result.and_then(|()| {
            // Earlier logs are no longer needed.
            edit.set_prev_log_number(0);
            edit.set_log_number(state.log_file_number);
            state.versions.log_and_apply(&mut edit)
        });

        match result {
            Ok(()) => {
                state.imm = None;
                self.has_imm.store(false, Ordering::Release);
                self.delete_obsolete_files(state);
            }
            Err(e) => self.record_background_error(state, &e),
        }
    }

    /// Write `mem` to a new table and record it in `edit`. With a `base`
    /// version the table may be placed below level 0.
    fn write_level0_table(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
        base: Option<&Version>,
    ) -> Result<()> {
        let start = Instant::now();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        info!("Level-0 table #{number}: started");

        let iter: BoxedIterator = Box::new(mem.iter());
        let result = MutexGuard::unlocked(state, || {
            build_table(
                &self.dbname,
                self.env.as_ref(),
                &self.table_cache,
                self.table_options.clone(),
                iter,
                number,
            )
        });
        state.pending_outputs.remove(&number);
        let meta = result?;

        let mut stats = CompactionStats {
            micros: start.elapsed().as_micros() as u64,
            ..Default::default()
        };
        let mut level = 0;
        match meta {
            Some(meta) => {
                info!("Level-0 table #{}: {} bytes", number, meta.file_size);
                if let Some(base) = base {
                    level = base.pick_level_for_memtable_output(meta.smallest.user_key(), meta.largest.user_key());
                }
                stats.bytes_written = meta.file_size;
                edit.add_file(level, meta.number, meta.file_size, meta.smallest, meta.largest);
            }
            None => info!("Level-0 table #{number}: empty"),
        }
        state.stats[level].add(&stats);
        Ok(())
    }

    /// Delete every file no live version, pending output or current log
    /// needs.
    fn delete_obsolete_files(&self, state: &mut MutexGuard<'_, DbState>) {
        if state.bg_error.is_some() {
            // After a background error it is unknown whether the latest
            // version was committed, so its files may still be needed.
            return;
        }

        let mut live = state.pending_outputs.clone();
        state.versions.add_live_files(&mut live);
        let Ok(children) = self.env.children(&self.dbname) else {
            return;
        };

        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();
        let mut doomed = Vec::new();
        for name in children {
            let Some((number, file_type)) = parse_file_name(&name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                // Newer descriptors may be in the middle of being written.
                FileType::Descriptor => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::DbLock | FileType::InfoLog => true,
            };
            if !keep {
                if file_type == FileType::Table {
                    self.table_cache.evict(number);
                }
                info!(file_type = ?file_type, number, "deleting obsolete file");
                doomed.push(name);
            }
        }

        // The files are unreachable, so deleting them needs no lock.
        MutexGuard::unlocked(state, || {
            for name in doomed {
                if let Err(e) = self.env.remove_file(&self.dbname.join(&name)) {
                    warn!(file = %name, error = %e, "failed to delete obsolete file");
                }
            }
        });
    }

    /// Charge a read sample to the current version, scheduling a compaction
    /// if a file ran out of seeks.
    pub(crate) fn record_read_sample(&self, internal_key: &[u8]) {
        let mut state = self.state.lock();
        if state.versions.current().record_read_sample(internal_key) {
            self.maybe_schedule_compaction(&mut state);
        }
    }
}
