use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::LruCache;
use crate::env::Env;
use crate::error::Result;
use crate::filename::table_file_name;
use crate::iterator::{BoxedIterator, EmptyIterator};
use crate::options::ReadOptions;
use crate::sstable::{Table, TableOptions};

/// Cache of open tables, keyed by file number.
///
/// Each entry holds an open file and the table's index block, so the cache
/// is sized in entries (every entry has charge 1) to bound the number of
/// open file descriptors.
pub struct TableCache {
    env: Arc<dyn Env>,
    dbname: PathBuf,
    options: TableOptions,
    cache: LruCache<Arc<Table>>,
}

impl TableCache {
    pub fn new(dbname: PathBuf, env: Arc<dyn Env>, options: TableOptions, entries: usize) -> Self {
        TableCache {
            env,
            dbname,
            options,
            cache: LruCache::new(entries),
        }
    }

    /// Fixed64 encoding of the file number.
    fn cache_key(file_number: u64) -> [u8; 8] {
        file_number.to_le_bytes()
    }

    /// The open table for `file_number`, opening it on a miss. The file
    /// must be exactly `file_size` bytes long.
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        let key = Self::cache_key(file_number);
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let path = table_file_name(&self.dbname, file_number);
        let file = self.env.new_random_access_file(&path)?;
        // Open failures are not cached: a transient error or a repaired
        // file should be retried on the next access.
        let table = Arc::new(Table::open(self.options.clone(), file, file_size)?);
        let handle = self.cache.insert(&key, Arc::clone(&table), 1);
        self.cache.release(handle);
        Ok(table)
    }

    /// Iterator over the table for `file_number`. Errors opening the table
    /// surface on the iterator's first positioning call.
    pub fn new_iterator(&self, read_options: &ReadOptions, file_number: u64, file_size: u64) -> BoxedIterator {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(table.iter(read_options.clone())),
            Err(e) => Box::new(EmptyIterator::with_error(e)),
        }
    }

    /// Look up `key` in one table: the first entry at or after it within
    /// the block that would hold it.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.find_table(file_number, file_size)?;
        table.internal_get(read_options, key)
    }

    /// Drop any cached entry for `file_number`. Called once the file is
    /// deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&Self::cache_key(file_number));
    }
}
