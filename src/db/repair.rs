//! Destroying a database, and rebuilding one whose MANIFEST is lost or
//! corrupt.
//!
//! Repair works from the files alone:
//!
//! 1. Every log file is replayed into a fresh table. The log is then
//!    moved to `lost/`.
//! 2. Every table is scanned for its key range and largest sequence number.
//!    Tables that cannot be read are moved to `lost/`.
//! 3. A new MANIFEST names every surviving table at level 0, and CURRENT is
//!    pointed at it. Old MANIFESTs are moved to `lost/`.
//!
//! Level 0 tolerates overlapping files, so the result is always valid. The
//! next compactions sort it back into levels.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::filename::{
    FileType, descriptor_file_name, lock_file_name, log_file_name, parse_file_name, set_current_file,
    table_file_name, temp_file_name,
};
use crate::iterator::{BoxedIterator, StorageIterator};
use crate::memtable::MemTable;
use crate::options::{Options, ReadOptions};
use crate::sstable::TableOptions;
use crate::table_cache::TableCache;
use crate::types::{InternalKey, SequenceNumber, parse_internal_key};
use crate::version::{FileMetaData, VersionEdit};
use crate::wal::{LogReader, LogWriter, Reporter};

use super::builder::build_table;
use super::write_batch::WriteBatch;

/// Delete the database at `path` and everything in it. Fails if the
/// database is open.
pub fn destroy_db(options: &Options, path: impl AsRef<Path>) -> Result<()> {
    let env = options.env.as_ref();
    let dbname = path.as_ref();
    let Ok(children) = env.children(dbname) else {
        // Nothing to destroy.
        return Ok(());
    };

    let lock_path = lock_file_name(dbname);
    let lock = env.lock_file(&lock_path)?;
    let mut result = Ok(());
    for name in children {
        let Some((_, file_type)) = parse_file_name(&name) else {
            continue;
        };
        if file_type == FileType::DbLock {
            continue;
        }
        if let Err(e) = env.remove_file(&dbname.join(&name)) {
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    let _ = env.unlock_file(lock);
    let _ = env.remove_file(&lock_path);
    // Fails if the directory still holds files not ours.
    let _ = env.remove_dir(dbname);
    result
}

/// Rebuild the MANIFEST of the database at `path` from its table and log
/// files. Some data may be lost; what is recovered is consistent.
pub fn repair_db(options: &Options, path: impl AsRef<Path>) -> Result<()> {
    let mut repairer = Repairer::new(options, path.as_ref());
    let lock = repairer.env.lock_file(&lock_file_name(&repairer.dbname))?;
    let result = repairer.run();
    let _ = repairer.env.unlock_file(lock);
    result
}

struct TableInfo {
    meta: FileMetaData,
    max_sequence: SequenceNumber,
}

struct Repairer {
    dbname: PathBuf,
    env: Arc<dyn Env>,
    icmp: InternalKeyComparator,
    table_options: TableOptions,
    table_cache: TableCache,

    manifests: Vec<String>,
    logs: Vec<u64>,
    table_numbers: Vec<u64>,
    tables: Vec<TableInfo>,
    next_file_number: u64,
}

struct RepairReporter {
    log_number: u64,
}

impl Reporter for RepairReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        warn!(log = self.log_number, bytes, reason, "dropping corrupted log bytes");
    }
}

impl Repairer {
    fn new(options: &Options, dbname: &Path) -> Self {
        let options = options.sanitized();
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let table_options = TableOptions::for_internal_keys(&options, &icmp);
        let env = Arc::clone(&options.env);
        let table_cache = TableCache::new(dbname.to_path_buf(), Arc::clone(&env), table_options.clone(), 10);
        Repairer {
            dbname: dbname.to_path_buf(),
            env,
            icmp,
            table_options,
            table_cache,
            manifests: Vec::new(),
            logs: Vec::new(),
            table_numbers: Vec::new(),
            tables: Vec::new(),
            next_file_number: 1,
        }
    }

    fn run(&mut self) -> Result<()> {
        self.find_files()?;
        self.convert_logs_to_tables();
        self.extract_metadata();
        self.write_descriptor()?;

        let bytes: u64 = self.tables.iter().map(|t| t.meta.file_size).sum();
        info!(
            db = %self.dbname.display(),
            files = self.tables.len(),
            bytes,
            "repaired database; some data may have been lost"
        );
        Ok(())
    }

    fn find_files(&mut self) -> Result<()> {
        let children = self.env.children(&self.dbname)?;
        for name in children {
            let Some((number, file_type)) = parse_file_name(&name) else {
                continue;
            };
            match file_type {
                FileType::Descriptor => self.manifests.push(name),
                FileType::Log => self.logs.push(number),
                FileType::Table => self.table_numbers.push(number),
                _ => {}
            }
            self.next_file_number = self.next_file_number.max(number + 1);
        }
        // The LOCK we hold does not count.
        if self.manifests.is_empty() && self.logs.is_empty() && self.table_numbers.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{}: repair found no files",
                self.dbname.display()
            )));
        }
        self.logs.sort_unstable();
        Ok(())
    }

    fn convert_logs_to_tables(&mut self) {
        for log in std::mem::take(&mut self.logs) {
            if let Err(e) = self.convert_log_to_table(log) {
                warn!(log, error = %e, "log ignored");
            }
            self.archive_file(&log_file_name(&self.dbname, log));
        }
    }

    /// Replay every readable batch of one log into a table. Unreadable
    /// records are skipped.
    fn convert_log_to_table(&mut self, log: u64) -> Result<()> {
        let file = self.env.new_sequential_file(&log_file_name(&self.dbname, log))?;
        // Checksums are still verified so a corrupt record cannot inject
        // garbage keys.
        let mut reader = LogReader::new(file, Some(Box::new(RepairReporter { log_number: log })), true);

        let mem = Arc::new(MemTable::new(self.icmp.clone()));
        let mut counter = 0;
        while let Some(record) = reader.read_record() {
            let batch = match WriteBatch::from_contents(record) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(log, error = %e, "skipping log record");
                    continue;
                }
            };
            match batch.insert_into(&mem) {
                Ok(()) => counter += batch.count(),
                Err(e) => warn!(log, error = %e, "skipping log record"),
            }
        }

        let number = self.next_file_number;
        self.next_file_number += 1;
        let iter: BoxedIterator = Box::new(mem.iter());
        let meta = build_table(
            &self.dbname,
            self.env.as_ref(),
            &self.table_cache,
            self.table_options.clone(),
            iter,
            number,
        )?;
        if meta.is_some() {
            self.table_numbers.push(number);
        }
        info!(log, entries = counter, table = number, "log converted to table");
        Ok(())
    }

    fn extract_metadata(&mut self) {
        for number in std::mem::take(&mut self.table_numbers) {
            match self.scan_table(number) {
                Ok(Some(info)) => self.tables.push(info),
                Ok(None) => {
                    warn!(table = number, "table holds no entries; archiving");
                    self.archive_file(&table_file_name(&self.dbname, number));
                }
                Err(e) => {
                    warn!(table = number, error = %e, "table unreadable; archiving");
                    self.archive_file(&table_file_name(&self.dbname, number));
                }
            }
        }
    }

    /// Key range and largest sequence number of one table.
    fn scan_table(&self, number: u64) -> Result<Option<TableInfo>> {
        let path = table_file_name(&self.dbname, number);
        let file_size = self.env.file_size(&path)?;
        let read_options = ReadOptions::new().verify_checksums(true).fill_cache(false);
        let mut iter = self.table_cache.new_iterator(&read_options, number, file_size);

        let mut smallest: Option<InternalKey> = None;
        let mut largest: Option<InternalKey> = None;
        let mut max_sequence = 0;
        let mut bad_keys = 0;
        iter.seek_to_first()?;
        while iter.is_valid() {
            let key = iter.key();
            match parse_internal_key(key) {
                Some(parsed) => {
                    max_sequence = max_sequence.max(parsed.sequence);
                    if smallest.is_none() {
                        smallest = Some(InternalKey::decode_from(key));
                    }
                    largest = Some(InternalKey::decode_from(key));
                }
                None => bad_keys += 1,
            }
            iter.next()?;
        }
        if bad_keys > 0 {
            warn!(table = number, bad_keys, "table has unparsable keys");
        }

        Ok(smallest.zip(largest).map(|(smallest, largest)| TableInfo {
            meta: FileMetaData::new(number, file_size, smallest, largest),
            max_sequence,
        }))
    }

    fn write_descriptor(&mut self) -> Result<()> {
        let tmp = temp_file_name(&self.dbname, 1);
        let max_sequence = self.tables.iter().map(|t| t.max_sequence).max().unwrap_or(0);

        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file(self.next_file_number.max(2));
        edit.set_last_sequence(max_sequence);
        for table in &self.tables {
            let meta = &table.meta;
            edit.add_file(0, meta.number, meta.file_size, meta.smallest.clone(), meta.largest.clone());
        }

        let written = (|| -> Result<()> {
            let mut log = LogWriter::new(self.env.new_writable_file(&tmp)?);
            log.add_record(&edit.encode())?;
            log.sync()?;
            log.close()
        })();
        if let Err(e) = written {
            let _ = self.env.remove_file(&tmp);
            return Err(e);
        }

        for name in std::mem::take(&mut self.manifests) {
            self.archive_file(&self.dbname.join(name));
        }
        self.env.rename_file(&tmp, &descriptor_file_name(&self.dbname, 1))?;
        set_current_file(self.env.as_ref(), &self.dbname, 1)
    }

    /// Move `path` into the `lost/` subdirectory.
    fn archive_file(&self, path: &Path) {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let lost = dir.join("lost");
        let _ = self.env.create_dir(&lost);
        let target = lost.join(name);
        match self.env.rename_file(path, &target) {
            Ok(()) => info!(from = %path.display(), to = %target.display(), "archived file"),
            Err(e) => warn!(file = %path.display(), error = %e, "failed to archive file"),
        }
    }
}
