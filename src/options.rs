use std::fmt;
use std::sync::Arc;

use crate::cache::LruCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::config;
use crate::db::Snapshot;
use crate::env::{Env, default_env};
use crate::sstable::Block;

/// Shared cache of uncompressed data blocks.
pub type BlockCache = LruCache<Block>;

/// Options controlling database behavior. Passed to `Db::open`.
#[derive(Clone)]
pub struct Options {
    /// Filesystem and clock (default: the local disk)
    pub env: Arc<dyn Env>,

    /// Order of user keys. Must match the comparator the database was
    /// created with (default: bytewise)
    pub comparator: Arc<dyn Comparator>,

    /// Create the database if it is missing (default: false)
    pub create_if_missing: bool,

    /// Fail if the database already exists (default: false)
    pub error_if_exists: bool,

    /// Stop on any detected corruption instead of skipping it
    /// (default: false)
    pub paranoid_checks: bool,

    /// Memtable size before it is converted to a table (default: 4MB)
    pub write_buffer_size: usize,

    /// Number of open tables kept in the table cache (default: 1000)
    pub max_open_files: usize,

    /// Cache for data blocks. `None` creates a private 8MB cache.
    pub block_cache: Option<Arc<BlockCache>>,

    /// Target uncompressed size of a data block (default: 4KB)
    pub block_size: usize,

    /// Keys between restart points in a block (default: 16)
    pub block_restart_interval: usize,

    /// Target false positive rate of per-table Bloom filters. `None`
    /// disables filters (default: 1%)
    pub bloom_false_positive_rate: Option<f64>,

    /// Size at which a compaction output file is cut (default: 2MB)
    pub max_file_size: u64,

    /// Level-0 file count that triggers a compaction (default: 4)
    pub level0_compaction_trigger: usize,

    /// Level-0 file count at which writes are delayed (default: 8)
    pub level0_slowdown_writes_trigger: usize,

    /// Level-0 file count at which writes stop (default: 12)
    pub level0_stop_writes_trigger: usize,

    /// Deepest level a non-overlapping memtable flush may land on
    /// (default: 2)
    pub max_mem_compact_level: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: default_env(),
            comparator: Arc::new(BytewiseComparator),
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_cache: None,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            bloom_false_positive_rate: Some(0.01),
            max_file_size: 2 * 1024 * 1024,
            level0_compaction_trigger: config::DEFAULT_L0_COMPACTION_TRIGGER,
            level0_slowdown_writes_trigger: config::DEFAULT_L0_SLOWDOWN_WRITES_TRIGGER,
            level0_stop_writes_trigger: config::DEFAULT_L0_STOP_WRITES_TRIGGER,
            max_mem_compact_level: config::DEFAULT_MAX_MEM_COMPACT_LEVEL,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }

    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    pub fn error_if_exists(mut self, enabled: bool) -> Self {
        self.error_if_exists = enabled;
        self
    }

    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn max_open_files(mut self, n: usize) -> Self {
        self.max_open_files = n;
        self
    }

    pub fn block_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.block_cache = Some(cache);
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    pub fn bloom_false_positive_rate(mut self, rate: Option<f64>) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn level0_compaction_trigger(mut self, n: usize) -> Self {
        self.level0_compaction_trigger = n;
        self
    }

    pub fn level0_slowdown_writes_trigger(mut self, n: usize) -> Self {
        self.level0_slowdown_writes_trigger = n;
        self
    }

    pub fn level0_stop_writes_trigger(mut self, n: usize) -> Self {
        self.level0_stop_writes_trigger = n;
        self
    }

    pub fn max_mem_compact_level(mut self, level: usize) -> Self {
        self.max_mem_compact_level = level;
        self
    }

    /// Copy with out-of-range values clamped into sane bounds.
    pub(crate) fn sanitized(&self) -> Options {
        let mut opts = self.clone();
        opts.max_open_files = opts.max_open_files.clamp(64 + 10, 50000);
        opts.write_buffer_size = opts.write_buffer_size.clamp(64 << 10, 1 << 30);
        opts.max_file_size = opts.max_file_size.clamp(1 << 20, 1 << 30);
        opts.block_size = opts.block_size.clamp(1 << 10, 4 << 20);
        opts.block_restart_interval = opts.block_restart_interval.max(1);
        opts.max_mem_compact_level = opts.max_mem_compact_level.min(config::NUM_LEVELS - 1);
        if opts.block_cache.is_none() {
            opts.block_cache = Some(Arc::new(BlockCache::new(8 << 20)));
        }
        opts
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("bloom_false_positive_rate", &self.bloom_false_positive_rate)
            .field("max_file_size", &self.max_file_size)
            .finish_non_exhaustive()
    }
}

/// Options for reads.
#[derive(Clone)]
pub struct ReadOptions {
    /// Skip cached blocks and re-read them from the file, so every block
    /// this call sees is checked against its stored checksum
    /// (default: false)
    pub verify_checksums: bool,

    /// Add blocks read by this call to the block cache (default: true)
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the latest state
    pub snapshot: Option<Snapshot>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn fill_cache(mut self, enabled: bool) -> Self {
        self.fill_cache = enabled;
        self
    }

    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Options for writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the log before acknowledging the write. Without it a machine
    /// crash may lose recent writes, though a process crash will not
    /// (default: false)
    pub sync: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(mut self, enabled: bool) -> Self {
        self.sync = enabled;
        self
    }
}
