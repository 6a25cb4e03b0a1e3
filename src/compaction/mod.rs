//! Compaction: merge files from level L and L+1 into new L+1 files.
//!
//! `VersionSet::pick_compaction` / `compact_range` choose the inputs and
//! return a `Compaction`; `job::run` merges them into new tables without
//! holding the database lock; the caller then installs the result through
//! `VersionSet::log_and_apply`.

pub mod job;

pub use job::{CompactionHost, CompactionOutput, CompactionState, CompactionStats};

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::config::{NUM_LEVELS, max_grandparent_overlap_bytes};
use crate::iterator::{BoxedIterator, MergingIterator};
use crate::options::ReadOptions;
use crate::version::{FileMetaData, Version, VersionEdit, concatenating_iterator, total_file_size};

/// A compaction of `level` into `level + 1`.
pub struct Compaction {
    level: usize,
    max_output_file_size: u64,
    input_version: Arc<Version>,
    edit: VersionEdit,
    /// `inputs[0]` from `level`, `inputs[1]` from `level + 1`.
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files in `level + 2` overlapping the compaction range.
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    /// Position in `grandparents` reached by `should_stop_before`.
    grandparent_index: usize,
    /// Some output key has been seen.
    seen_key: bool,
    /// Bytes of overlap between the current output and grandparents.
    overlapped_bytes: u64,
    /// Per-level cursors for `is_base_level_for_key`. Keys are fed in
    /// increasing order, so each cursor only moves forward.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(level: usize, input_version: Arc<Version>) -> Self {
        let max_output_file_size = input_version.context().options.max_file_size;
        Compaction {
            level,
            max_output_file_size,
            input_version,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    /// Level being compacted. Outputs go to `level() + 1`.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn edit(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    pub fn into_edit(self) -> VersionEdit {
        self.edit
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][i]
    }

    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    /// Cut an output file at this size.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    fn max_grandparent_overlap(&self) -> u64 {
        max_grandparent_overlap_bytes(self.max_output_file_size)
    }

    /// A single input file with nothing to merge against can be moved to
    /// the next level by editing the manifest alone. Not when it overlaps
    /// a lot of grandparent data: the moved file would then make a very
    /// expensive merge later.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap()
    }

    /// Record the deletion of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for f in &self.inputs[which] {
                self.edit.delete_file(self.level + which, f.number);
            }
        }
    }

    /// Whether no level below the output level holds data for `user_key`,
    /// so a deletion marker for it has nothing left to hide.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = Arc::clone(self.input_version.context().icmp.user_comparator());
        for level in self.level + 2..NUM_LEVELS {
            let files = self.input_version.files(level);
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater {
                    // The key falls at or before this file's end.
                    if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Whether the current output should be closed before `internal_key`
    /// is added, to keep its grandparent overlap bounded.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let icmp = &self.input_version.context().icmp;
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.encode(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap() {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }

    /// One iterator over every input entry in internal-key order.
    pub fn make_input_iterator(&self) -> BoxedIterator {
        let ctx = self.input_version.context();
        let read_options = ReadOptions {
            verify_checksums: ctx.options.paranoid_checks,
            fill_cache: false,
            snapshot: None,
        };

        let mut children: Vec<BoxedIterator> = Vec::new();
        for which in 0..2 {
            let files = &self.inputs[which];
            if files.is_empty() {
                continue;
            }
            if self.level + which == 0 {
                for f in files {
                    children.push(ctx.table_cache.new_iterator(&read_options, f.number, f.file_size));
                }
            } else {
                children.push(Box::new(concatenating_iterator(
                    ctx,
                    files.clone(),
                    read_options.clone(),
                )));
            }
        }
        Box::new(MergingIterator::new(Arc::new(ctx.icmp.clone()), children))
    }
}
