//! Shape of the level tree. These are fixed for a database: changing them
//! between runs changes where files are expected to live.

pub const NUM_LEVELS: usize = 7;

/// Maximum level a freshly flushed memtable may be pushed to when it does
/// not overlap anything. Pushing to level 2 avoids the comparatively
/// expensive level 0 → 1 compactions.
pub const DEFAULT_MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Level 0 compaction starts at this many files.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Writes are delayed by 1ms each at this many level-0 files.
pub const DEFAULT_L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Writes stop until compaction catches up at this many level-0 files.
pub const DEFAULT_L0_STOP_WRITES_TRIGGER: usize = 12;

/// Approximate gap in bytes between samples taken while iterating.
pub const READ_BYTES_PERIOD: usize = 1 << 20;

/// Target total size for `level`. Level 0 is scored by file count instead,
/// so the value for it is only nominal.
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1048576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

/// Stop building one compaction output once it overlaps this many bytes of
/// grandparent files, so a later compaction of it stays cheap.
pub fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

/// Upper bound on the total input size when growing a compaction's inputs
/// at the lower level.
pub fn expanded_compaction_byte_size_limit(max_file_size: u64) -> u64 {
    25 * max_file_size
}

/// Seeks a file absorbs before it is flagged for compaction.
///
/// One seek costs about as much as compacting 40 KB, so a file earns one
/// seek per 16 KiB of its size, with a floor of 100.
pub fn allowed_seeks_for_file(file_size: u64) -> i64 {
    ((file_size / 16384) as i64).max(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_targets_grow_tenfold() {
        assert_eq!(max_bytes_for_level(1), 10.0 * 1048576.0);
        assert_eq!(max_bytes_for_level(2), 100.0 * 1048576.0);
        assert_eq!(max_bytes_for_level(3), 1000.0 * 1048576.0);
    }

    #[test]
    fn allowed_seeks_has_floor() {
        assert_eq!(allowed_seeks_for_file(0), 100);
        assert_eq!(allowed_seeks_for_file(16384 * 500), 500);
    }
}
