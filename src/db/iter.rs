use std::cmp::Ordering;
use std::sync::Arc;

use rand::Rng;

use crate::comparator::Comparator;
use crate::config::READ_BYTES_PERIOD;
use crate::db::DbInner;
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator};
use crate::types::{
    LookupKey, SequenceNumber, ValueType, extract_user_key, parse_internal_key,
};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The inner iterator is at the entry that yields `key()`.
    Forward,
    /// The inner iterator is before all entries whose user key is `key()`,
    /// and the current entry is held in `saved_key` / `saved_value`.
    Reverse,
}

/// Iterator over the user-visible state of the database: one entry per
/// live user key, as of a sequence number.
///
/// Wraps a merge of the memtables and tables, whose entries are internal
/// keys with every version and deletion marker, and collapses them to the
/// newest version per user key at or below the sequence, skipping deleted
/// keys. Holds the version it reads so the tables it needs stay on disk.
pub struct DbIterator {
    db: Arc<DbInner>,
    ucmp: Arc<dyn Comparator>,
    iter: BoxedIterator,
    sequence: SequenceNumber,
    _version: Arc<Version>,

    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,

    bytes_until_read_sampling: usize,
}

fn corrupted_key() -> Error {
    Error::corruption("corrupted internal key in DbIterator")
}

fn random_compaction_period() -> usize {
    rand::thread_rng().gen_range(0..2 * READ_BYTES_PERIOD)
}

impl DbIterator {
    pub(crate) fn new(
        db: Arc<DbInner>,
        ucmp: Arc<dyn Comparator>,
        iter: BoxedIterator,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Self {
        DbIterator {
            db,
            ucmp,
            iter,
            sequence,
            _version: version,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            bytes_until_read_sampling: random_compaction_period(),
        }
    }

    /// Account for reading the entry under the inner iterator, sampling it
    /// for compaction now and then.
    fn sample_current(&mut self) {
        let bytes_read = self.iter.key().len() + self.iter.value().len();
        while self.bytes_until_read_sampling < bytes_read {
            self.bytes_until_read_sampling += random_compaction_period();
            self.db.record_read_sample(self.iter.key());
        }
        self.bytes_until_read_sampling -= bytes_read;
    }

    fn invalidate(&mut self) {
        self.valid = false;
        self.saved_key.clear();
        self.saved_value.clear();
    }

    /// Move forward to the first visible entry at or after the inner
    /// iterator. With `skipping`, entries for user keys up to `saved_key`
    /// are hidden.
    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        debug_assert!(self.iter.is_valid());
        debug_assert_eq!(self.direction, Direction::Forward);
        loop {
            self.sample_current();
            let Some(ikey) = parse_internal_key(self.iter.key()) else {
                self.valid = false;
                return Err(corrupted_key());
            };
            if ikey.sequence <= self.sequence {
                match ikey.value_type {
                    ValueType::Deletion => {
                        // Hide every older entry for this user key.
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(ikey.user_key);
                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self.ucmp.compare(ikey.user_key, &self.saved_key) != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return Ok(());
                        }
                    }
                }
            }
            self.iter.next()?;
            if !self.iter.is_valid() {
                break;
            }
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    /// Move backward to the newest visible entry of the previous user key,
    /// leaving the inner iterator before all of its entries.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        while self.iter.is_valid() {
            self.sample_current();
            let Some(ikey) = parse_internal_key(self.iter.key()) else {
                self.valid = false;
                return Err(corrupted_key());
            };
            if ikey.sequence <= self.sequence {
                if value_type != ValueType::Deletion
                    && self.ucmp.compare(ikey.user_key, &self.saved_key) == Ordering::Less
                {
                    // A live value for a later user key is already saved.
                    break;
                }
                value_type = ikey.value_type;
                if value_type == ValueType::Deletion {
                    self.saved_key.clear();
                    self.saved_value.clear();
                } else {
                    self.saved_key.clear();
                    self.saved_key.extend_from_slice(ikey.user_key);
                    self.saved_value.clear();
                    self.saved_value.extend_from_slice(self.iter.value());
                }
            }
            self.iter.prev()?;
        }

        if value_type == ValueType::Deletion {
            // End of the data.
            self.invalidate();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }
}

impl StorageIterator for DbIterator {
    fn is_valid(&self) -> bool {
        self.valid
    }

    /// The current user key.
    fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.iter.seek_to_first()?;
        if self.iter.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.iter.seek_to_last()?;
        self.find_prev_user_entry()
    }

    /// Position at the first user key at or after `target`.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.saved_key.clear();
        let lookup = LookupKey::new(target, self.sequence);
        self.iter.seek(lookup.internal_key())?;
        if self.iter.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid);
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // The inner iterator is just before the entries for key(); step
            // into them and skip past with the forward logic below.
            if self.iter.is_valid() {
                self.iter.next()?;
            } else {
                self.iter.seek_to_first()?;
            }
            if !self.iter.is_valid() {
                self.invalidate();
                return Ok(());
            }
            // `saved_key` already holds the key to skip.
        } else {
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.iter.key()));
            self.iter.next()?;
            if !self.iter.is_valid() {
                self.invalidate();
                return Ok(());
            }
        }
        self.find_next_user_entry(true)
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid);
        if self.direction == Direction::Forward {
            // The inner iterator is at the current entry. Back up until the
            // user key changes, then scan backwards as usual.
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.iter.key()));
            loop {
                self.iter.prev()?;
                if !self.iter.is_valid() {
                    self.invalidate();
                    return Ok(());
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.iter.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }
}
