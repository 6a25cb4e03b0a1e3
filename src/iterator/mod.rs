pub mod merge;
pub mod two_level;

pub use merge::MergingIterator;
pub use two_level::{BlockFunction, TwoLevelIterator};

use crate::error::Result;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable, block, table, level, merged view)
/// implements this trait. This enables composability: `MergingIterator`
/// takes `Vec<BoxedIterator>` and merges them.
///
/// Positioning methods return `Err` on IO failure or corruption; after an
/// error the iterator is left invalid.
pub trait StorageIterator: Send {
    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Positions the iterator at the first entry of the source.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Positions the iterator at the last entry of the source.
    fn seek_to_last(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Advances to the next entry. Requires is_valid().
    fn next(&mut self) -> Result<()>;

    /// Moves to the previous entry. Requires is_valid().
    fn prev(&mut self) -> Result<()>;
}

pub type BoxedIterator = Box<dyn StorageIterator>;

/// An iterator over nothing. Optionally carries an error that is reported on
/// the first positioning call, used where building the real iterator failed.
#[derive(Default)]
pub struct EmptyIterator {
    error: Option<crate::error::Error>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        EmptyIterator { error: None }
    }

    pub fn with_error(error: crate::error::Error) -> Self {
        EmptyIterator { error: Some(error) }
    }

    fn check(&mut self) -> Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl StorageIterator for EmptyIterator {
    fn is_valid(&self) -> bool {
        false
    }

    fn key(&self) -> &[u8] {
        panic!("key() on empty iterator")
    }

    fn value(&self) -> &[u8] {
        panic!("value() on empty iterator")
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.check()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.check()
    }

    fn seek(&mut self, _target: &[u8]) -> Result<()> {
        self.check()
    }

    fn next(&mut self) -> Result<()> {
        self.check()
    }

    fn prev(&mut self) -> Result<()> {
        self.check()
    }
}
