use std::cmp::Ordering;

use crate::bloom::{BloomFilterBuilder, FILTER_META_BLOCK_NAME};
use crate::crc;
use crate::env::WritableFile;
use crate::error::Result;
use crate::sstable::TableOptions;
use crate::sstable::block::BlockBuilder;
use crate::sstable::format::{BLOCK_TRAILER_SIZE, BlockHandle, CompressionType, Footer};

/// Builds a table file from a sorted stream of key-value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → table)
/// - Compaction (merged iterators → new tables)
///
/// Build process:
/// 1. Add entries one by one (must be in strictly increasing order)
/// 2. Entries fill up data blocks; a full block is written out right away
/// 3. `finish` writes the filter, metaindex, index and footer, then syncs
pub struct TableBuilder {
    options: TableOptions,
    file: Box<dyn WritableFile>,
    /// Bytes written so far.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    num_entries: u64,
    filter: Option<BloomFilterBuilder>,
    /// A data block was just flushed and its index entry is not written yet.
    /// The entry waits for the next key so the separator can be shortened
    /// to something between the two blocks.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl TableBuilder {
    pub fn new(options: TableOptions, file: Box<dyn WritableFile>) -> Self {
        let filter = options.bloom_false_positive_rate.map(BloomFilterBuilder::new);
        TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index keys are looked up by binary search only.
            index_block: BlockBuilder::new(1),
            options,
            file,
            offset: 0,
            last_key: Vec::new(),
            num_entries: 0,
            filter,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        }
    }

    /// Add a key-value pair.
    ///
    /// # Panics
    /// Panics if `key` is not greater than every key added before it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0 {
            assert_eq!(
                self.options.comparator.compare(key, &self.last_key),
                Ordering::Greater,
                "table keys must be added in strictly increasing order"
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            self.index_block
                .add(&self.last_key, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }

        if let Some(filter) = self.filter.as_mut() {
            filter.add_key((self.options.filter_key)(key));
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.estimated_size() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out the current data block, if it holds anything.
    pub fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.options.block_restart_interval),
        )
        .build();
        self.pending_handle = self.write_raw_block(&block)?;
        self.pending_index_entry = true;
        self.file.flush()
    }

    fn write_raw_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.file.append(contents)?;

        let compression = CompressionType::None as u8;
        let crc = crc::extend(crc::value(contents), &[compression]);
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compression;
        trailer[1..].copy_from_slice(&crc::mask(crc).to_le_bytes());
        self.file.append(&trailer)?;

        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    /// Finish the table: write the remaining blocks and the footer, then
    /// sync and close the file. Returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;

        let filter_handle = match self.filter.take() {
            Some(filter) => Some(self.write_raw_block(&filter.build().serialize())?),
            None => None,
        };

        let mut metaindex = BlockBuilder::new(self.options.block_restart_interval);
        if let Some(handle) = filter_handle {
            metaindex.add(FILTER_META_BLOCK_NAME.as_bytes(), &handle.encoded());
        }
        let metaindex_handle = self.write_raw_block(&metaindex.build())?;

        if self.pending_index_entry {
            self.options
                .comparator
                .find_short_successor(&mut self.last_key);
            self.index_block
                .add(&self.last_key, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }
        let index = std::mem::replace(&mut self.index_block, BlockBuilder::new(1)).build();
        let index_handle = self.write_raw_block(&index)?;

        let mut footer = Vec::with_capacity(Footer::ENCODED_LENGTH);
        Footer {
            metaindex_handle,
            index_handle,
        }
        .encode_to(&mut footer);
        self.file.append(&footer)?;
        self.offset += footer.len() as u64;

        self.file.flush()?;
        self.file.sync()?;
        self.file.close()?;
        Ok(self.offset)
    }

    /// Give up on the table. The caller deletes the partial file.
    pub fn abandon(self) {}

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the final size once `finish` has run.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
