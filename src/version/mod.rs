//! Versions: immutable snapshots of which table files make up each level.
//!
//! A `Version` never changes once built. `VersionSet` produces new ones by
//! applying `VersionEdit`s, and readers keep whichever `Arc<Version>` they
//! started with, so a compaction swapping files never disturbs a running
//! lookup or scan.

pub mod edit;
pub mod set;

pub use edit::{FileMetaData, VersionEdit};
pub use set::VersionSet;

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;

use parking_lot::Mutex;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::{NUM_LEVELS, max_grandparent_overlap_bytes};
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator, TwoLevelIterator};
use crate::options::{Options, ReadOptions};
use crate::table_cache::TableCache;
use crate::types::{
    InternalKey, LookupKey, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK, ValueType, parse_internal_key,
};

/// State shared by every version of one database.
pub struct VersionContext {
    pub options: Options,
    pub icmp: InternalKeyComparator,
    pub table_cache: Arc<TableCache>,
}

impl VersionContext {
    pub fn new(options: Options, icmp: InternalKeyComparator, table_cache: Arc<TableCache>) -> Self {
        VersionContext {
            options,
            icmp,
            table_cache,
        }
    }
}

/// The file a lookup read first without finding its key, charged a seek.
#[derive(Default)]
pub struct GetStats {
    pub seek_file: Option<(Arc<FileMetaData>, usize)>,
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Smallest index `i` such that `files[i].largest >= key`, or `files.len()`
/// if there is none. `files` must be sorted and non-overlapping.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

fn after_file(ucmp: &dyn Comparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    // `None` is before all keys, so never after a file.
    user_key.is_some_and(|k| ucmp.compare(k, f.largest.user_key()) == Ordering::Greater)
}

fn before_file(ucmp: &dyn Comparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    // `None` is after all keys, so never before a file.
    user_key.is_some_and(|k| ucmp.compare(k, f.smallest.user_key()) == Ordering::Less)
}

/// Whether some file in `files` overlaps the user key range
/// `[smallest, largest]`. `None` bounds are open. `disjoint_sorted_files`
/// allows a binary search instead of a scan.
pub fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator().as_ref();
    if !disjoint_sorted_files {
        return files.iter().any(|f| {
            !(after_file(ucmp, smallest_user_key, f) || before_file(ucmp, largest_user_key, f))
        });
    }

    let index = match smallest_user_key {
        Some(k) => {
            let small = InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, small.encode())
        }
        None => 0,
    };
    match files.get(index) {
        Some(f) => !before_file(ucmp, largest_user_key, f),
        None => false,
    }
}

/// Result of a lookup in the table files of a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionGet {
    Found(Vec<u8>),
    Deleted,
    NotFound,
}

pub struct Version {
    ctx: Arc<VersionContext>,
    /// Files per level. Level 0 files may overlap; deeper levels are sorted
    /// by smallest key and disjoint.
    pub(crate) files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
    /// Next file to compact based on seek stats.
    file_to_compact: Mutex<Option<(Arc<FileMetaData>, usize)>>,
    /// Level that should be compacted next and its score. A score below 1
    /// means compaction is not strictly needed. Set by `finalize`.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: usize,
}

impl Version {
    pub(crate) fn new(ctx: Arc<VersionContext>) -> Self {
        Version {
            ctx,
            files: Default::default(),
            file_to_compact: Mutex::new(None),
            compaction_score: -1.0,
            compaction_level: 0,
        }
    }

    pub(crate) fn context(&self) -> &Arc<VersionContext> {
        &self.ctx
    }

    fn icmp(&self) -> &InternalKeyComparator {
        &self.ctx.icmp
    }

    fn ucmp(&self) -> &dyn Comparator {
        self.ctx.icmp.user_comparator().as_ref()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    pub(crate) fn file_to_compact(&self) -> Option<(Arc<FileMetaData>, usize)> {
        self.file_to_compact.lock().clone()
    }

    /// Look up `key` in the table files, newest first. Fills `stats` with
    /// the first file read that did not answer the lookup.
    pub fn get(&self, read_options: &ReadOptions, key: &LookupKey, stats: &mut GetStats) -> Result<VersionGet> {
        let ikey = key.internal_key();
        let user_key = key.user_key();
        let ucmp = self.ucmp();

        stats.seek_file = None;
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let candidates: Vec<Arc<FileMetaData>> = if level == 0 {
                // Level-0 files may overlap: check every file that covers
                // the key, newest first.
                let mut tmp: Vec<_> = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                            && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
                    })
                    .cloned()
                    .collect();
                tmp.sort_by(|a, b| b.number.cmp(&a.number));
                tmp
            } else {
                let index = find_file(self.icmp(), files, ikey);
                match files.get(index) {
                    Some(f) if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less => {
                        vec![Arc::clone(f)]
                    }
                    _ => Vec::new(),
                }
            };

            for f in candidates {
                if last_file_read.is_some() && stats.seek_file.is_none() {
                    // More than one seek for this read: charge the first
                    // file.
                    stats.seek_file = last_file_read.take();
                }
                last_file_read = Some((Arc::clone(&f), level));

                let Some((found_key, value)) =
                    self.ctx
                        .table_cache
                        .get(read_options, f.number, f.file_size, ikey)?
                else {
                    continue;
                };
                let Some(parsed) = parse_internal_key(&found_key) else {
                    return Err(Error::corruption(format!(
                        "corrupted key in table {}",
                        f.number
                    )));
                };
                if ucmp.compare(parsed.user_key, user_key) != Ordering::Equal {
                    continue;
                }
                return Ok(match parsed.value_type {
                    ValueType::Value => VersionGet::Found(value),
                    ValueType::Deletion => VersionGet::Deleted,
                });
            }
        }
        Ok(VersionGet::NotFound)
    }

    /// Charge a seek to the file in `stats`. Returns true if that file is
    /// now due for compaction and a compaction should be scheduled.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        let Some((f, level)) = &stats.seek_file else {
            return false;
        };
        let left = f.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
        let mut file_to_compact = self.file_to_compact.lock();
        if left <= 0 && file_to_compact.is_none() {
            *file_to_compact = Some((Arc::clone(f), *level));
            return true;
        }
        false
    }

    /// Sample a key read by an iterator. If more than one file overlaps it,
    /// charge a seek to the first, as a lookup would have. Returns true if a
    /// compaction should be scheduled.
    pub fn record_read_sample(&self, internal_key: &[u8]) -> bool {
        let Some(parsed) = parse_internal_key(internal_key) else {
            return false;
        };
        let ucmp = self.ucmp();
        let mut matches = 0;
        let mut first: Option<(Arc<FileMetaData>, usize)> = None;
        'levels: for level in 0..NUM_LEVELS {
            for f in &self.files[level] {
                if ucmp.compare(parsed.user_key, f.smallest.user_key()) == Ordering::Less
                    || ucmp.compare(parsed.user_key, f.largest.user_key()) == Ordering::Greater
                {
                    continue;
                }
                matches += 1;
                if first.is_none() {
                    first = Some((Arc::clone(f), level));
                }
                if matches >= 2 {
                    break 'levels;
                }
            }
        }
        if matches >= 2 {
            return self.update_stats(&GetStats { seek_file: first });
        }
        false
    }

    /// Whether some file in `level` overlaps `[smallest, largest]` (user
    /// keys, `None` meaning unbounded).
    pub fn overlap_in_level(&self, level: usize, smallest_user_key: Option<&[u8]>, largest_user_key: Option<&[u8]>) -> bool {
        some_file_overlaps_range(
            self.icmp(),
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Level a flushed memtable covering `[smallest, largest]` should be
    /// placed at. Pushed below level 0 while nothing overlaps and the level
    /// after next would not make a later compaction too expensive.
    pub fn pick_level_for_memtable_output(&self, smallest_user_key: &[u8], largest_user_key: &[u8]) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            return level;
        }

        let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
        let options = &self.ctx.options;
        while level < options.max_mem_compact_level {
            if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > max_grandparent_overlap_bytes(options.max_file_size) {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files in `level` that overlap `[begin, end]`. For level 0 the range
    /// grows to cover every transitively overlapping file, since their
    /// ranges may interleave.
    pub fn overlapping_inputs(&self, level: usize, begin: Option<&InternalKey>, end: Option<&InternalKey>) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.ucmp();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());
        let mut inputs = Vec::new();

        let files = &self.files[level];
        let mut i = 0;
        while i < files.len() {
            let f = &files[i];
            i += 1;
            let file_start = f.smallest.user_key();
            let file_limit = f.largest.user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                // Entirely before the range.
                continue;
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                // Entirely after the range.
                continue;
            }
            inputs.push(Arc::clone(f));
            if level == 0 {
                // This file may widen the range. If so, start over.
                if user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Iterators that together yield this version's table contents: one per
    /// level-0 file, one concatenating iterator per deeper level.
    pub fn add_iterators(&self, read_options: &ReadOptions, iters: &mut Vec<BoxedIterator>) {
        for f in &self.files[0] {
            iters.push(
                self.ctx
                    .table_cache
                    .new_iterator(read_options, f.number, f.file_size),
            );
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(Box::new(concatenating_iterator(
                    &self.ctx,
                    self.files[level].clone(),
                    read_options.clone(),
                )));
            }
        }
    }

    /// Approximate offset of `internal_key` within the table data of this
    /// version. May open tables through the table cache.
    pub fn approximate_offset_of(&self, internal_key: &[u8]) -> u64 {
        let icmp = &self.ctx.icmp;
        let mut result = 0;
        for level in 0..NUM_LEVELS {
            for f in &self.files[level] {
                if icmp.compare(f.largest.encode(), internal_key) != Ordering::Greater {
                    // Entirely before the key.
                    result += f.file_size;
                } else if icmp.compare(f.smallest.encode(), internal_key) == Ordering::Greater {
                    // Entirely after the key. Deeper levels are sorted, so
                    // nothing further along this level can contain it.
                    if level > 0 {
                        break;
                    }
                } else if let Ok(table) = self.ctx.table_cache.find_table(f.number, f.file_size) {
                    result += table.approximate_offset_of(internal_key);
                }
            }
        }
        result
    }

    /// Human-readable listing of every level's files.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            let _ = writeln!(out, "--- level {level} ---");
            for f in files {
                let _ = writeln!(out, " {f:?}");
            }
        }
        out
    }
}

/// Iterator over the files of one sorted level. Keys are each file's
/// largest key; values encode the file number and size.
pub(crate) struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    /// `files.len()` when invalid.
    index: usize,
    value_buf: [u8; 16],
}

impl LevelFileNumIterator {
    pub(crate) fn new(icmp: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        LevelFileNumIterator {
            icmp,
            files,
            index,
            value_buf: [0; 16],
        }
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
        if let Some(f) = self.files.get(index) {
            self.value_buf[..8].copy_from_slice(&f.number.to_le_bytes());
            self.value_buf[8..].copy_from_slice(&f.file_size.to_le_bytes());
        }
    }
}

impl StorageIterator for LevelFileNumIterator {
    fn is_valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn key(&self) -> &[u8] {
        self.files[self.index].largest.encode()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.value_buf
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.set_index(0);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.set_index(self.files.len().saturating_sub(1));
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let index = find_file(&self.icmp, &self.files, target);
        self.set_index(index);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        self.set_index(self.index + 1);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        let index = if self.index == 0 {
            self.files.len()
        } else {
            self.index - 1
        };
        self.set_index(index);
        Ok(())
    }
}

/// Iterator over a sorted, disjoint run of files, opening each table only
/// when the scan reaches it.
pub(crate) fn concatenating_iterator(
    ctx: &Arc<VersionContext>,
    files: Vec<Arc<FileMetaData>>,
    read_options: ReadOptions,
) -> TwoLevelIterator {
    let ctx_for_files = Arc::clone(ctx);
    TwoLevelIterator::new(
        Box::new(LevelFileNumIterator::new(ctx.icmp.clone(), files)),
        Box::new(move |opts: &ReadOptions, file_value: &[u8]| {
            if file_value.len() != 16 {
                return Err(Error::corruption("file reader invoked with unexpected value"));
            }
            let number = crate::coding::decode_fixed64(file_value);
            let size = crate::coding::decode_fixed64(&file_value[8..]);
            Ok(ctx_for_files.table_cache.new_iterator(opts, number, size))
        }),
        read_options,
    )
}
