use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::compaction::Compaction;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::{NUM_LEVELS, expanded_compaction_byte_size_limit, max_bytes_for_level};
use crate::env::{Env, read_file_to_vec};
use crate::error::{Error, Result};
use crate::filename::{current_file_name, descriptor_file_name, set_current_file};
use crate::types::{InternalKey, SequenceNumber};
use crate::version::{FileMetaData, Version, VersionContext, VersionEdit, total_file_size};
use crate::wal::{LogReader, LogWriter, Reporter};

/// Files added and removed at one level while folding edits together.
#[derive(Default)]
struct LevelState {
    deleted: HashSet<u64>,
    added: Vec<Arc<FileMetaData>>,
}

/// Applies a sequence of edits to a base version without building the
/// intermediate versions.
struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    levels: [LevelState; NUM_LEVELS],
}

impl Builder {
    fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Self {
        Builder {
            icmp,
            base,
            levels: Default::default(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointer: &mut [Vec<u8>; NUM_LEVELS]) {
        for (level, key) in &edit.compact_pointers {
            compact_pointer[*level] = key.encode().to_vec();
        }
        for &(level, number) in &edit.deleted_files {
            self.levels[level].deleted.insert(number);
        }
        for (level, f) in &edit.new_files {
            let state = &mut self.levels[*level];
            state.deleted.remove(&f.number);
            state.added.push(Arc::new(f.clone()));
        }
    }

    fn save_to(&self, v: &mut Version) {
        for level in 0..NUM_LEVELS {
            let state = &self.levels[level];
            let mut files: Vec<Arc<FileMetaData>> = self.base.files[level]
                .iter()
                .chain(state.added.iter())
                .filter(|f| !state.deleted.contains(&f.number))
                .cloned()
                .collect();
            files.sort_by(|a, b| {
                self.icmp
                    .compare(a.smallest.encode(), b.smallest.encode())
                    .then(a.number.cmp(&b.number))
            });

            if level > 0 {
                debug_assert!(
                    files.windows(2).all(|w| {
                        self.icmp.compare(w[0].largest.encode(), w[1].smallest.encode()) == Ordering::Less
                    }),
                    "overlapping ranges in level {level}"
                );
            }
            v.files[level] = files;
        }
    }
}

/// Records the first corruption reported while reading the MANIFEST.
struct ManifestReporter {
    error: Arc<Mutex<Option<String>>>,
}

impl Reporter for ManifestReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(format!("{reason} ({bytes} bytes dropped)"));
        }
    }
}

/// The sequence of versions of one database, plus the counters persisted
/// beside them in the MANIFEST. Every change goes through `log_and_apply`.
pub struct VersionSet {
    dbname: PathBuf,
    env: Arc<dyn Env>,
    ctx: Arc<VersionContext>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    /// Log still being compacted when the process stopped, or 0.
    prev_log_number: u64,

    descriptor_log: Option<LogWriter>,
    current: Arc<Version>,
    /// Every version handed out that may still be referenced, so files they
    /// name are not deleted.
    live: BTreeMap<u64, Weak<Version>>,
    next_version_id: u64,

    /// Per-level key where the next size compaction should start. Empty
    /// means the start of the level.
    compact_pointer: [Vec<u8>; NUM_LEVELS],
}

impl VersionSet {
    pub fn new(dbname: &Path, ctx: Arc<VersionContext>) -> Self {
        let env = Arc::clone(&ctx.options.env);
        let current = Arc::new(Version::new(Arc::clone(&ctx)));
        let mut vset = VersionSet {
            dbname: dbname.to_path_buf(),
            env,
            ctx,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            current: Arc::clone(&current),
            live: BTreeMap::new(),
            next_version_id: 0,
            compact_pointer: Default::default(),
        };
        vset.register(&current);
        vset
    }

    pub fn context(&self) -> &Arc<VersionContext> {
        &self.ctx
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Give back `number` if it was the last one handed out and never used.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    /// Make sure `number` is never handed out again.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(self.current.files(level))
    }

    /// Whether some level is over its budget or a file used up its seeks.
    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0 || self.current.file_to_compact().is_some()
    }

    fn register(&mut self, v: &Arc<Version>) {
        self.live.insert(self.next_version_id, Arc::downgrade(v));
        self.next_version_id += 1;
    }

    fn append_version(&mut self, v: Version) {
        let v = Arc::new(v);
        self.live.retain(|_, w| w.strong_count() > 0);
        self.register(&v);
        self.current = v;
    }

    /// Number of versions still referenced somewhere, current included.
    pub fn live_versions(&self) -> usize {
        self.live.values().filter(|w| w.strong_count() > 0).count()
    }

    /// Apply `edit` to the current version, persist it to the MANIFEST and
    /// install the result as current. Nothing is installed unless the edit
    /// reached stable storage.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => {
                debug_assert!(n >= self.log_number);
                debug_assert!(n < self.next_file_number);
            }
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut v = Version::new(Arc::clone(&self.ctx));
        {
            let mut builder = Builder::new(self.ctx.icmp.clone(), Arc::clone(&self.current));
            builder.apply(edit, &mut self.compact_pointer);
            builder.save_to(&mut v);
        }
        finalize(&self.ctx, &mut v);

        // Without an open descriptor this is the first edit since open:
        // start a new MANIFEST with a snapshot of the current state.
        let mut new_manifest: Option<PathBuf> = None;
        let mut log = match self.descriptor_log.take() {
            Some(log) => log,
            None => {
                let path = descriptor_file_name(&self.dbname, self.manifest_file_number);
                let mut log = LogWriter::new(self.env.new_writable_file(&path)?);
                if let Err(e) = self.write_snapshot(&mut log) {
                    let _ = self.env.remove_file(&path);
                    return Err(e);
                }
                new_manifest = Some(path);
                log
            }
        };

        let result = (|| -> Result<()> {
            log.add_record(&edit.encode())?;
            log.sync()?;
            if new_manifest.is_some() {
                set_current_file(self.env.as_ref(), &self.dbname, self.manifest_file_number)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.descriptor_log = Some(log);
                self.append_version(v);
                self.log_number = edit.log_number.unwrap_or(self.log_number);
                self.prev_log_number = edit.prev_log_number.unwrap_or(0);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "MANIFEST write failed");
                match new_manifest {
                    Some(path) => {
                        drop(log);
                        let _ = self.env.remove_file(&path);
                    }
                    None => self.descriptor_log = Some(log),
                }
                Err(e)
            }
        }
    }

    /// Rebuild state from `CURRENT` and the MANIFEST it names.
    pub fn recover(&mut self) -> Result<()> {
        let current = read_file_to_vec(self.env.as_ref(), &current_file_name(&self.dbname))?;
        let current = String::from_utf8(current)
            .map_err(|_| Error::corruption("CURRENT file is not valid UTF-8"))?;
        let Some(manifest_name) = current.strip_suffix('\n').filter(|n| !n.is_empty()) else {
            return Err(Error::corruption("CURRENT file does not end with newline"));
        };

        let manifest_path = self.dbname.join(manifest_name);
        let file = match self.env.new_sequential_file(&manifest_path) {
            Ok(file) => file,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::corruption(format!(
                    "CURRENT points to a non-existent file: {manifest_name}"
                )));
            }
            Err(e) => return Err(e),
        };
        info!(manifest = manifest_name, "recovering version set");

        let reported = Arc::new(Mutex::new(None));
        let reporter = ManifestReporter {
            error: Arc::clone(&reported),
        };
        let mut reader = LogReader::new(file, Some(Box::new(reporter)), true);

        let ucmp_name = self.ctx.icmp.user_comparator().name();
        let mut builder = Builder::new(self.ctx.icmp.clone(), Arc::clone(&self.current));
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file = None;
        let mut last_sequence = None;

        let paranoid = self.ctx.options.paranoid_checks;
        loop {
            let record = reader.read_record();
            if let Some(reason) = reported.lock().take() {
                if paranoid {
                    return Err(Error::corruption(format!("MANIFEST: {reason}")));
                }
                warn!(reason = %reason, "MANIFEST corrupted, ignoring edits from this point");
                break;
            }
            let Some(record) = record else { break };

            let edit = match VersionEdit::decode(&record) {
                Ok(edit) => edit,
                Err(e) if paranoid => return Err(e),
                Err(e) => {
                    warn!(error = %e, "undecodable MANIFEST record, ignoring edits from this point");
                    break;
                }
            };
            if let Some(name) = &edit.comparator_name {
                if name != ucmp_name {
                    return Err(Error::invalid_argument(format!(
                        "{name} does not match existing comparator {ucmp_name}"
                    )));
                }
            }

            builder.apply(&edit, &mut self.compact_pointer);
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file = edit.next_file_number.or(next_file);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        let Some(next_file) = next_file else {
            return Err(Error::corruption("no meta-nextfile entry in descriptor"));
        };
        let Some(log_number) = log_number else {
            return Err(Error::corruption("no meta-lognumber entry in descriptor"));
        };
        let Some(last_sequence) = last_sequence else {
            return Err(Error::corruption("no last-sequence-number entry in descriptor"));
        };
        let prev_log_number = prev_log_number.unwrap_or(0);

        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);

        let mut v = Version::new(Arc::clone(&self.ctx));
        builder.save_to(&mut v);
        finalize(&self.ctx, &mut v);
        self.append_version(v);

        self.manifest_file_number = next_file;
        self.next_file_number = next_file + 1;
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        info!(
            manifest_file = self.manifest_file_number,
            next_file = self.next_file_number,
            last_sequence = self.last_sequence,
            log_number = self.log_number,
            prev_log_number = self.prev_log_number,
            "recovered version set"
        );
        Ok(())
    }

    /// Write the full current state as one edit.
    fn write_snapshot(&self, log: &mut LogWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.ctx.icmp.user_comparator().name());
        for (level, key) in self.compact_pointer.iter().enumerate() {
            if !key.is_empty() {
                edit.set_compact_pointer(level, InternalKey::decode_from(key));
            }
        }
        for level in 0..NUM_LEVELS {
            for f in self.current.files(level) {
                edit.add_file(level, f.number, f.file_size, f.smallest.clone(), f.largest.clone());
            }
        }
        log.add_record(&edit.encode())
    }

    /// Insert the number of every file some live version refers to.
    pub fn add_live_files(&self, live: &mut HashSet<u64>) {
        for v in self.live.values().filter_map(Weak::upgrade) {
            for level in 0..NUM_LEVELS {
                live.extend(v.files(level).iter().map(|f| f.number));
            }
        }
    }

    /// Largest number of bytes in level L+1 that one file in level L
    /// overlaps, over every level L >= 1.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut result = 0;
        for level in 1..NUM_LEVELS - 1 {
            for f in self.current.files(level) {
                let overlaps =
                    self.current
                        .overlapping_inputs(level + 1, Some(&f.smallest), Some(&f.largest));
                result = result.max(total_file_size(&overlaps));
            }
        }
        result
    }

    /// File counts per level, e.g. `files[ 1 0 0 0 0 0 0 ]`.
    pub fn level_summary(&self) -> String {
        let mut out = String::from("files[");
        for level in 0..NUM_LEVELS {
            let _ = write!(out, " {}", self.current.num_files(level));
        }
        out.push_str(" ]");
        out
    }

    /// Choose the next compaction, or `None` if nothing needs it. Size
    /// compactions take priority over seek compactions.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = Arc::clone(&self.current);
        let icmp = &self.ctx.icmp;

        let mut c = if current.compaction_score >= 1.0 {
            let level = current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);
            let files = current.files(level);
            let pointer = &self.compact_pointer[level];
            // First file past where the last compaction of this level
            // stopped, wrapping around to the start of the key space.
            let first = files
                .iter()
                .find(|f| pointer.is_empty() || icmp.compare(f.largest.encode(), pointer) == Ordering::Greater)
                .or_else(|| files.first())?;
            let mut c = Compaction::new(level, Arc::clone(&current));
            c.inputs[0].push(Arc::clone(first));
            c
        } else if let Some((f, level)) = current.file_to_compact() {
            if level + 1 >= NUM_LEVELS {
                return None;
            }
            let mut c = Compaction::new(level, Arc::clone(&current));
            c.inputs[0].push(f);
            c
        } else {
            return None;
        };

        // Level-0 files overlap each other: pull in every one that overlaps
        // the chosen file, transitively.
        if c.level() == 0 {
            let (smallest, largest) = get_range(icmp, &c.inputs[0]);
            c.inputs[0] = current.overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!c.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Compaction of the files in `level` overlapping `[begin, end]`, or
    /// `None` if there are none.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        if level + 1 >= NUM_LEVELS {
            return None;
        }
        let current = Arc::clone(&self.current);
        let mut inputs = current.overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        // Don't compact too much at once on a deeper level; the caller
        // resumes from where this one stops. Level-0 files may overlap and
        // must all go together.
        if level > 0 {
            let limit = self.ctx.options.max_file_size;
            let mut total = 0;
            if let Some(i) = inputs.iter().position(|f| {
                total += f.file_size;
                total >= limit
            }) {
                inputs.truncate(i + 1);
            }
        }

        let mut c = Compaction::new(level, current);
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    fn setup_other_inputs(&mut self, c: &mut Compaction) {
        let level = c.level();
        let icmp = &self.ctx.icmp;
        let current = Arc::clone(c.input_version());

        let (mut smallest, mut largest) = get_range(icmp, &c.inputs[0]);
        c.inputs[1] = current.overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        let (mut all_start, mut all_limit) = get_range2(icmp, &c.inputs[0], &c.inputs[1]);

        // Grow the level inputs if that doesn't change the number of level+1
        // files pulled in.
        if !c.inputs[1].is_empty() {
            let expanded0 = current.overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size
                    < expanded_compaction_byte_size_limit(self.ctx.options.max_file_size)
            {
                let (new_start, new_limit) = get_range(icmp, &expanded0);
                let expanded1 = current.overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                if expanded1.len() == c.inputs[1].len() {
                    info!(
                        level,
                        from0 = c.inputs[0].len(),
                        from1 = c.inputs[1].len(),
                        to0 = expanded0.len(),
                        to1 = expanded1.len(),
                        "expanding compaction inputs"
                    );
                    smallest = new_start;
                    largest = new_limit;
                    c.inputs[0] = expanded0;
                    c.inputs[1] = expanded1;
                    (all_start, all_limit) = get_range2(icmp, &c.inputs[0], &c.inputs[1]);
                }
            }
        }

        if level + 2 < NUM_LEVELS {
            c.grandparents = current.overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }
        debug!(level, smallest = ?smallest, largest = ?largest, "compaction range chosen");

        // The next compaction of this level starts after this range. Update
        // it here rather than when the edit is applied, so a failed
        // compaction tries a different range next time.
        self.compact_pointer[level] = largest.encode().to_vec();
        c.edit().set_compact_pointer(level, largest);
    }
}

/// Pick the level most in need of compaction and record its score.
fn finalize(ctx: &VersionContext, v: &mut Version) {
    let mut best_level = 0;
    let mut best_score = -1.0;

    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            // Level 0 is scored by file count: with small write buffers
            // total size says little, and every level-0 file is read on
            // each lookup.
            v.files[0].len() as f64 / ctx.options.level0_compaction_trigger as f64
        } else {
            total_file_size(&v.files[level]) as f64 / max_bytes_for_level(level)
        };
        // Strictly greater: on a tie the shallower level wins.
        if score > best_score {
            best_level = level;
            best_score = score;
        }
    }

    v.compaction_level = best_level;
    v.compaction_score = best_score;
}

/// Smallest and largest keys covered by `files`, which must not be empty.
fn get_range(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
    debug_assert!(!files.is_empty());
    let mut smallest = &files[0].smallest;
    let mut largest = &files[0].largest;
    for f in &files[1..] {
        if icmp.compare(f.smallest.encode(), smallest.encode()) == Ordering::Less {
            smallest = &f.smallest;
        }
        if icmp.compare(f.largest.encode(), largest.encode()) == Ordering::Greater {
            largest = &f.largest;
        }
    }
    (smallest.clone(), largest.clone())
}

fn get_range2(
    icmp: &InternalKeyComparator,
    inputs0: &[Arc<FileMetaData>],
    inputs1: &[Arc<FileMetaData>],
) -> (InternalKey, InternalKey) {
    let all: Vec<Arc<FileMetaData>> = inputs0.iter().chain(inputs1).cloned().collect();
    get_range(icmp, &all)
}

/// Write the MANIFEST and CURRENT of an empty database.
pub(crate) fn create_new_db(env: &dyn Env, dbname: &Path, comparator_name: &str) -> Result<()> {
    let mut edit = VersionEdit::new();
    edit.set_comparator_name(comparator_name);
    edit.set_log_number(0);
    edit.set_next_file(2);
    edit.set_last_sequence(0);

    let manifest = descriptor_file_name(dbname, 1);
    let result = (|| {
        let mut log = LogWriter::new(env.new_writable_file(&manifest)?);
        log.add_record(&edit.encode())?;
        log.sync()?;
        log.close()?;
        set_current_file(env, dbname, 1)
    })();
    if result.is_err() {
        let _ = env.remove_file(&manifest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::mem::MemEnv;
    use crate::options::Options;
    use crate::sstable::TableOptions;
    use crate::table_cache::TableCache;
    use crate::types::ValueType;

    fn context(env: Arc<MemEnv>, dbname: &Path) -> Arc<VersionContext> {
        let options = Options::new().env(env.clone()).sanitized();
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let table_options = TableOptions::for_internal_keys(&options, &icmp);
        let table_cache = Arc::new(TableCache::new(dbname.to_path_buf(), env, table_options, 100));
        Arc::new(VersionContext::new(options, icmp, table_cache))
    }

    fn ikey(user_key: &str, seq: u64) -> InternalKey {
        InternalKey::new(user_key.as_bytes(), seq, ValueType::Value)
    }

    fn open(env: &Arc<MemEnv>, dbname: &Path) -> VersionSet {
        let mut vset = VersionSet::new(dbname, context(Arc::clone(env), dbname));
        vset.recover().unwrap();
        vset
    }

    #[test]
    fn edits_survive_recovery() {
        let env = Arc::new(MemEnv::new());
        let dbname = Path::new("/db");
        create_new_db(env.as_ref(), dbname, "leveldb.BytewiseComparator").unwrap();

        let mut vset = open(&env, dbname);
        let mut edit = VersionEdit::new();
        let n1 = vset.new_file_number();
        let n2 = vset.new_file_number();
        edit.add_file(0, n1, 100, ikey("a", 1), ikey("c", 2));
        edit.add_file(1, n2, 200, ikey("d", 3), ikey("f", 4));
        vset.set_last_sequence(4);
        vset.log_and_apply(&mut edit).unwrap();

        let mut edit = VersionEdit::new();
        edit.delete_file(0, n1);
        vset.log_and_apply(&mut edit).unwrap();
        let next = vset.new_file_number();
        drop(vset);

        let vset = open(&env, dbname);
        assert_eq!(vset.num_level_files(0), 0);
        assert_eq!(vset.num_level_files(1), 1);
        assert_eq!(vset.current().files(1)[0].number, n2);
        assert_eq!(vset.last_sequence(), 4);
        assert!(vset.manifest_file_number() >= next - 1);
        assert_eq!(vset.level_summary(), "files[ 0 1 0 0 0 0 0 ]");
    }

    #[test]
    fn comparator_mismatch_is_invalid_argument() {
        let env = Arc::new(MemEnv::new());
        let dbname = Path::new("/db");
        create_new_db(env.as_ref(), dbname, "some.other.Comparator").unwrap();

        let mut vset = VersionSet::new(dbname, context(Arc::clone(&env), dbname));
        assert!(matches!(vset.recover(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn level0_trigger_picks_all_overlapping_files() {
        let env = Arc::new(MemEnv::new());
        let dbname = Path::new("/db");
        create_new_db(env.as_ref(), dbname, "leveldb.BytewiseComparator").unwrap();
        let mut vset = open(&env, dbname);

        assert!(vset.pick_compaction().is_none());

        let mut edit = VersionEdit::new();
        for i in 0..4u64 {
            let n = vset.new_file_number();
            edit.add_file(0, n, 1000, ikey("a", i * 2 + 1), ikey("m", i * 2 + 2));
        }
        vset.log_and_apply(&mut edit).unwrap();
        assert!(vset.needs_compaction());

        let c = vset.pick_compaction().unwrap();
        assert_eq!(c.level(), 0);
        assert_eq!(c.num_input_files(0), 4);
        assert_eq!(c.num_input_files(1), 0);
    }

    #[test]
    fn dropped_versions_leave_the_registry() {
        let env = Arc::new(MemEnv::new());
        let dbname = Path::new("/db");
        create_new_db(env.as_ref(), dbname, "leveldb.BytewiseComparator").unwrap();
        let mut vset = open(&env, dbname);

        let pinned = vset.current();
        let n = vset.new_file_number();
        let mut edit = VersionEdit::new();
        edit.add_file(1, n, 10, ikey("a", 1), ikey("b", 1));
        vset.log_and_apply(&mut edit).unwrap();

        let mut edit = VersionEdit::new();
        edit.delete_file(1, n);
        vset.log_and_apply(&mut edit).unwrap();

        // The file is gone from current but `pinned` predates it; only the
        // intermediate version named it.
        let mut live = HashSet::new();
        vset.add_live_files(&mut live);
        assert!(!live.contains(&n));
        assert_eq!(vset.live_versions(), 2);
        drop(pinned);
        assert_eq!(vset.live_versions(), 1);
    }

    #[test]
    fn equal_scores_prefer_the_shallower_level() {
        let env = Arc::new(MemEnv::new());
        let dbname = Path::new("/db");
        let ctx = context(env, dbname);
        let mut v = Version::new(Arc::clone(&ctx));
        for i in 0..4u64 {
            v.files[0].push(Arc::new(FileMetaData::new(i + 10, 1, ikey("a", i + 1), ikey("b", i + 1))));
        }
        // Level 1 exactly at its target: score 1.0, same as level 0.
        let size = max_bytes_for_level(1) as u64;
        v.files[1].push(Arc::new(FileMetaData::new(20, size, ikey("c", 1), ikey("d", 1))));
        finalize(&ctx, &mut v);
        assert_eq!(v.compaction_level, 0);
        assert_eq!(v.compaction_score, 1.0);
    }
}
