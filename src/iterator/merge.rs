use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{BoxedIterator, StorageIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + every table that may hold the range
/// - Compaction (merging the input tables)
///
/// Duplicates are not collapsed: every child entry is yielded, in comparator
/// order. On equal keys the child listed first wins going forward, so list
/// the newest source first.
///
/// Children are few (one per level-0 file plus one per deeper level), so
/// the smallest child is found by a linear scan rather than a heap.
pub struct MergingIterator {
    comparator: Arc<dyn Comparator>,
    children: Vec<BoxedIterator>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(comparator: Arc<dyn Comparator>, children: Vec<BoxedIterator>) -> Self {
        MergingIterator {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.is_valid() {
                continue;
            }
            match smallest {
                Some(s) if self.comparator.compare(child.key(), self.children[s].key()) != Ordering::Less => {}
                _ => smallest = Some(i),
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.is_valid() {
                continue;
            }
            match largest {
                Some(l) if self.comparator.compare(child.key(), self.children[l].key()) != Ordering::Greater => {}
                _ => largest = Some(i),
            }
        }
        self.current = largest;
    }

    fn current_child(&self) -> &BoxedIterator {
        match self.current {
            Some(i) => &self.children[i],
            None => panic!("merging iterator is not positioned"),
        }
    }
}

impl StorageIterator for MergingIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current_child().key()
    }

    fn value(&self) -> &[u8] {
        self.current_child().value()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.find_largest();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // Coming from reverse, the other children sit before key(). Move
        // each to the first entry after it. The current child is already
        // there.
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() && self.comparator.compare(&key, child.key()) == Ordering::Equal {
                    child.next()?;
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next()?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // Coming from forward, the other children sit after key(). Move each
        // to the last entry before it.
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() {
                    // First entry >= key: step back once.
                    child.prev()?;
                } else {
                    // Nothing >= key: the last entry is the one before.
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev()?;
        self.find_largest();
        Ok(())
    }
}
