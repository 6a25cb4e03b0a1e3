use crate::error::Result;
use crate::iterator::{BoxedIterator, StorageIterator};
use crate::options::ReadOptions;

/// Opens the second-level iterator named by an index entry's value.
pub type BlockFunction = Box<dyn Fn(&ReadOptions, &[u8]) -> Result<BoxedIterator> + Send>;

/// Iterates a sequence of sorted runs through an index over them.
///
/// The index iterator yields one entry per run, whose value `block_function`
/// turns into an iterator over that run. Used for table index → data
/// blocks, and for a level's file list → tables.
pub struct TwoLevelIterator {
    index_iter: BoxedIterator,
    block_function: BlockFunction,
    read_options: ReadOptions,
    data_iter: Option<BoxedIterator>,
    /// Index value `data_iter` was opened from, to skip reopening it.
    data_block_handle: Vec<u8>,
}

impl TwoLevelIterator {
    pub fn new(index_iter: BoxedIterator, block_function: BlockFunction, read_options: ReadOptions) -> Self {
        TwoLevelIterator {
            index_iter,
            block_function,
            read_options,
            data_iter: None,
            data_block_handle: Vec::new(),
        }
    }

    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.is_valid() {
            self.data_iter = None;
            return Ok(());
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_block_handle.as_slice() {
            return Ok(());
        }
        self.data_iter = None;
        let iter = (self.block_function)(&self.read_options, handle)?;
        self.data_block_handle.clear();
        self.data_block_handle.extend_from_slice(handle);
        self.data_iter = Some(iter);
        Ok(())
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.is_valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_data_blocks_backward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.prev()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for TwoLevelIterator {
    fn is_valid(&self) -> bool {
        self.data_valid()
    }

    fn key(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.key(),
            None => panic!("key() on invalid two-level iterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.value(),
            None => panic!("value() on invalid two-level iterator"),
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index_iter.seek_to_last()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last()?;
        }
        self.skip_empty_data_blocks_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target)?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        if let Some(it) = self.data_iter.as_mut() {
            it.next()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        if let Some(it) = self.data_iter.as_mut() {
            it.prev()?;
        }
        self.skip_empty_data_blocks_backward()
    }
}
