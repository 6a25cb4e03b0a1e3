use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::compaction::Compaction;
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::filename::table_file_name;
use crate::options::ReadOptions;
use crate::sstable::{TableBuilder, TableOptions};
use crate::types::{InternalKey, MAX_SEQUENCE_NUMBER, SequenceNumber, ValueType, parse_internal_key};
use crate::version::VersionEdit;

/// Calls the merge loop makes back into the database while it runs
/// without the database lock.
pub trait CompactionHost {
    /// A fresh file number for an output table. The number must stay
    /// protected from obsolete-file deletion until the result is installed.
    fn new_output_number(&self) -> u64;

    /// Invoked before each input key. Lets the database flush a full
    /// memtable ahead of a long compaction.
    fn between_keys(&self);

    fn is_shutting_down(&self) -> bool;
}

/// One table written by a compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutput {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// Time spent and bytes moved by compactions into one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    pub fn add(&mut self, other: &CompactionStats) {
        self.micros += other.micros;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }
}

/// A compaction in progress: its inputs plus the tables written so far.
pub struct CompactionState {
    compaction: Compaction,
    dbname: PathBuf,
    /// Entries older than this are invisible to every snapshot, so only the
    /// newest of them per user key needs keeping.
    smallest_snapshot: SequenceNumber,
    outputs: Vec<CompactionOutput>,
    builder: Option<TableBuilder>,
    stats: CompactionStats,
}

impl CompactionState {
    pub fn new(compaction: Compaction, dbname: PathBuf, smallest_snapshot: SequenceNumber) -> Self {
        CompactionState {
            compaction,
            dbname,
            smallest_snapshot,
            outputs: Vec::new(),
            builder: None,
            stats: CompactionStats::default(),
        }
    }

    pub fn compaction(&self) -> &Compaction {
        &self.compaction
    }

    pub fn outputs(&self) -> &[CompactionOutput] {
        &self.outputs
    }

    pub fn stats(&self) -> CompactionStats {
        self.stats
    }

    /// Merge the inputs into new tables. On error the partial output files
    /// are left for the caller to delete.
    pub fn run(&mut self, host: &dyn CompactionHost) -> Result<()> {
        let start = Instant::now();
        info!(
            "Compacting {}@{} + {}@{} files",
            self.compaction.num_input_files(0),
            self.compaction.level(),
            self.compaction.num_input_files(1),
            self.compaction.level() + 1
        );

        let result = self.merge(host);
        if result.is_err() {
            if let Some(builder) = self.builder.take() {
                builder.abandon();
            }
        }

        for which in 0..2 {
            self.stats.bytes_read += self.compaction.inputs[which]
                .iter()
                .map(|f| f.file_size)
                .sum::<u64>();
        }
        self.stats.bytes_written = self.outputs.iter().map(|o| o.file_size).sum();
        self.stats.micros = start.elapsed().as_micros() as u64;
        result
    }

    fn merge(&mut self, host: &dyn CompactionHost) -> Result<()> {
        let ctx = Arc::clone(self.compaction.input_version().context());
        let ucmp = Arc::clone(ctx.icmp.user_comparator());
        let mut input = self.compaction.make_input_iterator();
        input.seek_to_first()?;

        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        while input.is_valid() {
            if host.is_shutting_down() {
                return Err(Error::Io(std::io::Error::other("deleting database during compaction")));
            }
            host.between_keys();

            let key = input.key();
            // Always consulted: it tracks grandparent overlap per key.
            if self.compaction.should_stop_before(key) && self.builder.is_some() {
                self.finish_output()?;
            }

            let mut drop_entry = false;
            match parse_internal_key(key) {
                None => {
                    // Keep corrupt keys; hiding them would lose data silently.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Some(ikey) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .is_none_or(|k| ucmp.compare(ikey.user_key, k) != Ordering::Equal);
                    if first_occurrence {
                        current_user_key = Some(ikey.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= self.smallest_snapshot {
                        // Hidden by a newer entry for the same user key.
                        drop_entry = true;
                    } else if ikey.value_type == ValueType::Deletion
                        && ikey.sequence <= self.smallest_snapshot
                        && self.compaction.is_base_level_for_key(ikey.user_key)
                    {
                        // No older data for this key lives below the output
                        // level, and the newer entries for it are dropped by
                        // the rule above, so the marker is not needed.
                        drop_entry = true;
                    }
                    last_sequence_for_key = ikey.sequence;
                }
            }

            if !drop_entry {
                if self.builder.is_none() {
                    self.open_output(host)?;
                }
                if let (Some(builder), Some(output)) = (self.builder.as_mut(), self.outputs.last_mut()) {
                    if builder.num_entries() == 0 {
                        output.smallest = InternalKey::decode_from(key);
                    }
                    output.largest = InternalKey::decode_from(key);
                    builder.add(key, input.value())?;
                    if builder.file_size() >= self.compaction.max_output_file_size() {
                        self.finish_output()?;
                    }
                }
            }

            input.next()?;
        }

        if self.builder.is_some() {
            self.finish_output()?;
        }
        Ok(())
    }

    fn open_output(&mut self, host: &dyn CompactionHost) -> Result<()> {
        let ctx = self.compaction.input_version().context();
        let number = host.new_output_number();
        let path = table_file_name(&self.dbname, number);
        let file = ctx.options.env.new_writable_file(&path)?;
        let table_options = TableOptions::for_internal_keys(&ctx.options, &ctx.icmp);
        self.builder = Some(TableBuilder::new(table_options, file));
        self.outputs.push(CompactionOutput {
            number,
            file_size: 0,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
        });
        Ok(())
    }

    fn finish_output(&mut self) -> Result<()> {
        let Some(builder) = self.builder.take() else {
            return Ok(());
        };
        let Some(output) = self.outputs.last_mut() else {
            return Ok(());
        };
        let entries = builder.num_entries();
        output.file_size = builder.finish()?;

        // Make sure the table is readable before it is installed.
        let ctx = self.compaction.input_version().context();
        let mut iter = ctx
            .table_cache
            .new_iterator(&ReadOptions::default(), output.number, output.file_size);
        iter.seek_to_first()?;
        info!(
            "Generated table #{}@{}: {} keys, {} bytes",
            output.number,
            self.compaction.level(),
            entries,
            output.file_size
        );
        Ok(())
    }

    /// The edit that replaces the inputs with the outputs, one level down.
    pub fn into_edit(mut self) -> VersionEdit {
        self.compaction.add_input_deletions();
        let level = self.compaction.level();
        for output in self.outputs {
            debug!(number = output.number, level = level + 1, "adding compaction output");
            self.compaction.edit().add_file(
                level + 1,
                output.number,
                output.file_size,
                output.smallest,
                output.largest,
            );
        }
        self.compaction.into_edit()
    }
}
