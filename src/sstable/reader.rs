use std::sync::Arc;

use crate::bloom::{BloomFilter, FILTER_META_BLOCK_NAME};
use crate::coding::put_fixed64;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator, TwoLevelIterator};
use crate::options::ReadOptions;
use crate::sstable::TableOptions;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::format::{BlockHandle, Footer, read_block, read_fully};

/// An opened table file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 48 bytes) → find index and metaindex blocks
/// 2. Read the index block and keep it in memory
/// 3. Read the Bloom filter, if the table has one
/// 4. Ready for queries (data blocks read on demand, through the block cache)
///
/// Safe to share between threads.
pub struct Table {
    options: TableOptions,
    file: Arc<dyn RandomAccessFile>,
    file_size: u64,
    /// Prefix for this table's block cache keys.
    cache_id: u64,
    index_block: Block,
    filter: Option<BloomFilter>,
    metaindex_handle: BlockHandle,
}

impl Table {
    /// Open the table stored in the first `size` bytes of `file`.
    pub fn open(options: TableOptions, file: Arc<dyn RandomAccessFile>, size: u64) -> Result<Self> {
        if size < Footer::ENCODED_LENGTH as u64 {
            return Err(Error::corruption("file is too short to be an sstable"));
        }

        let mut footer_buf = [0u8; Footer::ENCODED_LENGTH];
        let got = read_fully(
            file.as_ref(),
            size - Footer::ENCODED_LENGTH as u64,
            &mut footer_buf,
        )?;
        if got != footer_buf.len() {
            return Err(Error::corruption("truncated table footer"));
        }
        let footer = Footer::decode(&footer_buf)?;

        let index_block = Block::new(read_block(file.as_ref(), &footer.index_handle, size)?)?;
        let cache_id = options.block_cache.as_ref().map_or(0, |c| c.new_id());

        let mut table = Table {
            options,
            file,
            file_size: size,
            cache_id,
            index_block,
            filter: None,
            metaindex_handle: footer.metaindex_handle,
        };
        match table.read_filter() {
            Ok(filter) => table.filter = filter,
            Err(e) if table.options.paranoid_checks => return Err(e),
            // The filter only speeds up lookups; the table is usable without it.
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable table filter"),
        }
        Ok(table)
    }

    fn read_filter(&self) -> Result<Option<BloomFilter>> {
        if self.options.bloom_false_positive_rate.is_none() {
            return Ok(None);
        }
        let metaindex = Block::new(read_block(self.file.as_ref(), &self.metaindex_handle, self.file_size)?)?;
        let mut iter = metaindex.iter(Arc::new(crate::comparator::BytewiseComparator));
        iter.seek(FILTER_META_BLOCK_NAME.as_bytes())?;
        if !iter.is_valid() || iter.key() != FILTER_META_BLOCK_NAME.as_bytes() {
            return Ok(None);
        }
        let handle = BlockHandle::decode(iter.value())?;
        let contents = read_block(self.file.as_ref(), &handle, self.file_size)?;
        BloomFilter::deserialize(&contents).map(Some)
    }

    /// Iterator over the data block an index entry points to, going
    /// through the block cache when there is one.
    pub fn block_reader(&self, read_options: &ReadOptions, index_value: &[u8]) -> Result<BlockIterator> {
        let handle = BlockHandle::decode(index_value)?;
        let comparator = Arc::clone(&self.options.comparator);

        let Some(cache) = self.options.block_cache.as_ref() else {
            let block = Block::new(read_block(self.file.as_ref(), &handle, self.file_size)?)?;
            return Ok(block.iter(comparator));
        };

        let mut cache_key = Vec::with_capacity(16);
        put_fixed64(&mut cache_key, self.cache_id);
        put_fixed64(&mut cache_key, handle.offset);

        if !read_options.verify_checksums {
            if let Some(cached) = cache.lookup(&cache_key) {
                return Ok(cached.value().iter(comparator));
            }
        }

        let block = Block::new(read_block(self.file.as_ref(), &handle, self.file_size)?)?;
        if read_options.fill_cache {
            let charge = block.size();
            cache.insert(&cache_key, block.clone(), charge);
        }
        Ok(block.iter(comparator))
    }

    /// Two-level iterator over every entry of the table.
    pub fn iter(self: &Arc<Self>, read_options: ReadOptions) -> TwoLevelIterator {
        let table = Arc::clone(self);
        let index_iter = self.index_block.iter(Arc::clone(&self.options.comparator));
        TwoLevelIterator::new(
            Box::new(index_iter),
            Box::new(move |opts: &ReadOptions, index_value: &[u8]| {
                table
                    .block_reader(opts, index_value)
                    .map(|it| Box::new(it) as BoxedIterator)
            }),
            read_options,
        )
    }

    /// Find the first entry at or after `key`, within the block that would
    /// hold `key`. Returns `None` without reading a data block when the
    /// filter rules the key out.
    pub fn internal_get(&self, read_options: &ReadOptions, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(filter) = &self.filter {
            if !filter.may_contain((self.options.filter_key)(key)) {
                return Ok(None);
            }
        }

        let mut index_iter = self.index_block.iter(Arc::clone(&self.options.comparator));
        index_iter.seek(key)?;
        if !index_iter.is_valid() {
            return Ok(None);
        }
        let mut block_iter = self.block_reader(read_options, index_iter.value())?;
        block_iter.seek(key)?;
        if !block_iter.is_valid() {
            return Ok(None);
        }
        Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())))
    }

    /// Approximate file offset where data for `key` begins (or would
    /// begin). Keys past the last one map to roughly the file size.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(Arc::clone(&self.options.comparator));
        if index_iter.seek(key).is_ok() && index_iter.is_valid() {
            if let Ok(handle) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past the last key, or the index entry is unreadable: the
        // metaindex sits just after the data blocks.
        self.metaindex_handle.offset
    }

    /// Whether a Bloom filter was loaded for this table.
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}
