//! Immutable sorted tables: the on-disk home of every flushed memtable and
//! every compaction output.

pub mod block;
pub mod builder;
pub mod format;
pub mod reader;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::TableBuilder;
pub use format::{BlockHandle, Footer};
pub use reader::Table;

use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::options::{BlockCache, Options};
use crate::types::extract_user_key;

/// Everything the table builder and reader need to know about the keys
/// they store and how blocks are laid out and cached.
#[derive(Clone)]
pub struct TableOptions {
    /// Order of the keys stored in the table.
    pub comparator: Arc<dyn Comparator>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    /// `None` writes no filter.
    pub bloom_false_positive_rate: Option<f64>,
    /// Maps a stored key to the key recorded in the filter.
    pub filter_key: fn(&[u8]) -> &[u8],
    pub block_cache: Option<Arc<BlockCache>>,
    /// Fail `Table::open` on an unreadable filter instead of ignoring it.
    pub paranoid_checks: bool,
}

fn whole_key(key: &[u8]) -> &[u8] {
    key
}

impl TableOptions {
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        TableOptions {
            comparator,
            block_size: 4096,
            block_restart_interval: 16,
            bloom_false_positive_rate: Some(0.01),
            filter_key: whole_key,
            block_cache: None,
            paranoid_checks: false,
        }
    }

    /// Options for tables holding internal keys. The filter covers user
    /// keys so lookups at any sequence number can consult it.
    pub(crate) fn for_internal_keys(options: &Options, icmp: &InternalKeyComparator) -> Self {
        TableOptions {
            comparator: Arc::new(icmp.clone()),
            block_size: options.block_size,
            block_restart_interval: options.block_restart_interval,
            bloom_false_positive_rate: options.bloom_false_positive_rate,
            filter_key: extract_user_key,
            block_cache: options.block_cache.clone(),
            paranoid_checks: options.paranoid_checks,
        }
    }
}
