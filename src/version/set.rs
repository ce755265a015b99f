//! The version chain and its durable MANIFEST log.
//!
//! The set owns the list of live versions (front is current), the
//! monotonic file-number allocator, the last committed sequence, and the
//! open MANIFEST writer. Every layout change flows through
//! `log_and_apply`: build the successor version, persist the edit,
//! repoint `CURRENT` if a fresh MANIFEST was started, then install.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::compaction::Compaction;
use crate::config::{Options, NUM_LEVELS};
use crate::error::{Error, Result};
use crate::filenames::{manifest_file_name, read_current_file, set_current_file};
use crate::keys::{compare_internal_keys, InternalKey, SequenceNumber};
use crate::version::edit::VersionEdit;
use crate::version::{level_score, total_file_size, FileMetaData, Version};
use crate::wal;

/// Name persisted in every MANIFEST; recovery refuses a database written
/// under a different ordering.
pub const COMPARATOR_NAME: &str = "stratadb.BytewiseComparator";

pub struct VersionSet {
    dbpath: PathBuf,
    options: Options,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    prev_log_number: u64,

    manifest_writer: Option<wal::Writer>,

    // Front is the current version; older entries stay until their last
    // outside reference drops.
    versions: VecDeque<Arc<Version>>,

    // Where the next size compaction of each level resumes.
    compact_pointers: [Option<InternalKey>; NUM_LEVELS],
}

impl VersionSet {
    pub fn new(dbpath: PathBuf, options: Options) -> Self {
        let mut versions = VecDeque::new();
        versions.push_front(Arc::new(Version::new()));
        VersionSet {
            dbpath,
            options,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            manifest_writer: None,
            versions,
            compact_pointers: Default::default(),
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(self.versions.front().expect("version chain never empty"))
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Hands back an allocated-but-unused number.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = number;
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current().num_files(level)
    }

    pub fn needs_compaction(&self) -> bool {
        let current = self.current();
        current.compaction_score >= 1.0 || current.file_to_compact().is_some()
    }

    /// File numbers referenced by any version still alive, the set that
    /// must survive garbage collection.
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        for version in &self.versions {
            for level in 0..NUM_LEVELS {
                for file in version.files(level) {
                    live.insert(file.number);
                }
            }
        }
        live
    }

    fn gc_versions(&mut self) {
        // The front (current) version always stays.
        for i in (1..self.versions.len()).rev() {
            if Arc::strong_count(&self.versions[i]) == 1 {
                self.versions.remove(i);
            }
        }
    }

    /// Computes the level most in need of compaction and stores the
    /// result on the version.
    fn finalize(&self, v: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0f64;
        for level in 0..NUM_LEVELS - 1 {
            let score = level_score(v.files(level), level);
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        v.compaction_level = best_level;
        v.compaction_score = best_score;
    }

    /// Replays `CURRENT`'s MANIFEST into a fresh current version.
    pub fn recover(&mut self) -> Result<()> {
        let manifest_number = read_current_file(&self.dbpath)?;
        let manifest_path = manifest_file_name(&self.dbpath, manifest_number);
        let mut reader = wal::Reader::new(File::open(&manifest_path)?);

        let mut builder = Builder::new(self.current());
        let mut next_file = None;
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut last_sequence = None;
        let mut edit_count = 0usize;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;
            if let Some(name) = &edit.comparator {
                if name != COMPARATOR_NAME {
                    return Err(Error::InvalidArgument(format!(
                        "comparator {name} does not match {COMPARATOR_NAME}"
                    )));
                }
            }
            builder.apply(&edit, &mut self.compact_pointers);
            if let Some(n) = edit.log_number {
                log_number = Some(n);
            }
            if let Some(n) = edit.prev_log_number {
                prev_log_number = Some(n);
            }
            if let Some(n) = edit.next_file_number {
                next_file = Some(n);
            }
            if let Some(n) = edit.last_sequence {
                last_sequence = Some(n);
            }
            edit_count += 1;
        }

        let next_file =
            next_file.ok_or_else(|| Error::Corruption("no next-file entry in manifest".into()))?;
        let log_number =
            log_number.ok_or_else(|| Error::Corruption("no log-number entry in manifest".into()))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::Corruption("no last-sequence entry in manifest".into()))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut v = builder.save_to()?;
        self.finalize(&mut v);
        self.versions.push_front(Arc::new(v));

        self.next_file_number = next_file;
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        // The recovered MANIFEST is never appended to; the next
        // log_and_apply starts a fresh one and swings CURRENT.
        self.manifest_file_number = self.next_file_number;
        self.next_file_number += 1;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;
        self.last_sequence = last_sequence;

        tracing::info!(
            manifest = manifest_number,
            edits = edit_count,
            next_file,
            log_number,
            last_sequence,
            "recovered version state"
        );
        Ok(())
    }

    /// Applies `edit` to the current version, persists it, and installs
    /// the result as current. On failure the in-memory state is
    /// untouched and any newly created MANIFEST is removed.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => debug_assert!(n >= self.log_number && n < self.next_file_number),
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut v = {
            let mut builder = Builder::new(self.current());
            builder.apply(edit, &mut self.compact_pointers);
            builder.save_to()?
        };
        self.finalize(&mut v);

        let mut created_manifest = None;
        if self.manifest_writer.is_none() {
            // First change since open: start a new MANIFEST seeded with a
            // snapshot of the current state.
            let path = manifest_file_name(&self.dbpath, self.manifest_file_number);
            let result = File::create(&path).map_err(Error::from).and_then(|file| {
                let mut writer = wal::Writer::new(file);
                self.write_snapshot(&mut writer)?;
                Ok(writer)
            });
            match result {
                Ok(writer) => {
                    self.manifest_writer = Some(writer);
                    created_manifest = Some(path);
                }
                Err(err) => {
                    let _ = std::fs::remove_file(&path);
                    return Err(err);
                }
            }
        }

        let record = edit.encode();
        let writer = self.manifest_writer.as_mut().expect("manifest writer open");
        let mut committed = writer.add_record(&record);
        if committed.is_ok() {
            committed = writer.sync();
        }
        if committed.is_ok() && created_manifest.is_some() {
            committed = set_current_file(&self.dbpath, self.manifest_file_number);
        }

        match committed {
            Ok(()) => {
                self.versions.push_front(Arc::new(v));
                self.log_number = edit.log_number.expect("filled above");
                self.prev_log_number = edit.prev_log_number.expect("filled above");
                self.gc_versions();
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "manifest append failed");
                if let Some(path) = created_manifest {
                    self.manifest_writer = None;
                    let _ = std::fs::remove_file(&path);
                }
                Err(err)
            }
        }
    }

    /// Writes the full current state as the first record of a MANIFEST.
    fn write_snapshot(&self, writer: &mut wal::Writer) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(COMPARATOR_NAME);
        for (level, pointer) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = pointer {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        let current = self.current();
        for level in 0..NUM_LEVELS {
            for file in current.files(level) {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }
        writer.add_record(&edit.encode())
    }

    /// Chooses the next compaction: level size pressure first, then
    /// seek-triggered files. Returns None when the tree is in shape.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current();
        let size_compaction = current.compaction_score >= 1.0;
        let seek_compaction = current.file_to_compact();

        let mut c = if size_compaction {
            let level = current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);
            let mut c = Compaction::new(&self.options, level);

            // Resume after the last compacted key, wrapping to the start.
            for file in current.files(level) {
                match &self.compact_pointers[level] {
                    Some(pointer)
                        if compare_internal_keys(file.largest.as_bytes(), pointer.as_bytes())
                            != std::cmp::Ordering::Greater =>
                    {
                        continue
                    }
                    _ => {
                        c.inputs[0].push(Arc::clone(file));
                        break;
                    }
                }
            }
            if c.inputs[0].is_empty() {
                if let Some(file) = current.files(level).first() {
                    c.inputs[0].push(Arc::clone(file));
                }
            }
            if c.inputs[0].is_empty() {
                return None;
            }
            c
        } else if let Some((file, level)) = seek_compaction {
            let mut c = Compaction::new(&self.options, level);
            c.inputs[0].push(file);
            c
        } else {
            return None;
        };

        c.input_version = Some(Arc::clone(&current));

        if c.level == 0 {
            // Level-0 inputs overlap each other; pull in the whole clique.
            let (smallest, largest) = key_range(&c.inputs[0]);
            c.inputs[0] = current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!c.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Builds a manual compaction of `level` restricted to the given
    /// range, or None when the level has nothing there.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        let current = self.current();
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        // A deep manual range could pull in an unbounded amount of data;
        // cap one round at the file-size target. Level 0 cannot be
        // truncated without risking an older overlapping file surviving
        // a newer one.
        if level > 0 {
            let mut total = 0;
            for (i, file) in inputs.iter().enumerate() {
                total += file.file_size;
                if total >= self.options.max_file_size {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }

        let mut c = Compaction::new(&self.options, level);
        c.input_version = Some(current);
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    fn setup_other_inputs(&mut self, c: &mut Compaction) {
        let current = self.current();
        let level = c.level;

        add_boundary_inputs(current.files(level), &mut c.inputs[0]);
        let (smallest, mut largest) = key_range(&c.inputs[0]);

        c.inputs[1] = current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        add_boundary_inputs(current.files(level + 1), &mut c.inputs[1]);

        let (mut all_start, mut all_limit) = key_range_2(&c.inputs[0], &c.inputs[1]);

        // Try growing the level-L side while the level-L+1 pick stays
        // identical and the total stays under the expansion budget.
        if !c.inputs[1].is_empty() {
            let mut expanded0 =
                current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            add_boundary_inputs(current.files(level), &mut expanded0);
            let inputs0_size = total_file_size(&c.inputs[0]);
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size
                    < self.options.expanded_compaction_byte_size_limit()
            {
                let (new_start, new_limit) = key_range(&expanded0);
                let mut expanded1 = current.get_overlapping_inputs(
                    level + 1,
                    Some(&new_start),
                    Some(&new_limit),
                );
                add_boundary_inputs(current.files(level + 1), &mut expanded1);
                if expanded1.len() == c.inputs[1].len() {
                    tracing::info!(
                        level,
                        from_files = c.inputs[0].len(),
                        to_files = expanded0.len(),
                        from_bytes = inputs0_size,
                        to_bytes = expanded0_size,
                        "expanding compaction inputs"
                    );
                    largest = new_limit;
                    c.inputs[0] = expanded0;
                    c.inputs[1] = expanded1;
                    let range = key_range_2(&c.inputs[0], &c.inputs[1]);
                    all_start = range.0;
                    all_limit = range.1;
                }
            }
        }

        if level + 2 < NUM_LEVELS {
            c.grandparents =
                current.get_overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }

        // Advance the pointer now rather than at install time, so a
        // failed compaction retries a different range.
        self.compact_pointers[level] = Some(largest.clone());
        c.edit.set_compact_pointer(level, largest);
    }
}

/// Smallest and largest internal keys across `files`.
fn key_range(files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
    debug_assert!(!files.is_empty());
    let mut smallest = files[0].smallest.clone();
    let mut largest = files[0].largest.clone();
    for file in &files[1..] {
        if file.smallest < smallest {
            smallest = file.smallest.clone();
        }
        if file.largest > largest {
            largest = file.largest.clone();
        }
    }
    (smallest, largest)
}

fn key_range_2(
    a: &[Arc<FileMetaData>],
    b: &[Arc<FileMetaData>],
) -> (InternalKey, InternalKey) {
    let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
    key_range(&all)
}

/// Pulls boundary files into a compaction input set.
///
/// A boundary file's smallest internal key is a later record of the user
/// key that ends the current input range. Leaving it behind would let an
/// older record surface above a newer one after the compaction installs.
fn add_boundary_inputs(
    level_files: &[Arc<FileMetaData>],
    compaction_files: &mut Vec<Arc<FileMetaData>>,
) {
    if compaction_files.is_empty() {
        return;
    }

    let mut largest_key = compaction_files
        .iter()
        .map(|f| f.largest.clone())
        .max()
        .expect("non-empty inputs");

    loop {
        let boundary = level_files
            .iter()
            .filter(|f| {
                compare_internal_keys(f.smallest.as_bytes(), largest_key.as_bytes())
                    == std::cmp::Ordering::Greater
                    && f.smallest.user_key() == largest_key.user_key()
            })
            .min_by(|a, b| compare_internal_keys(a.smallest.as_bytes(), b.smallest.as_bytes()));

        match boundary {
            Some(file) => {
                largest_key = file.largest.clone();
                compaction_files.push(Arc::clone(file));
            }
            None => break,
        }
    }
}

/// Accumulates edits on top of a base version.
struct Builder {
    base: Arc<Version>,
    levels: [LevelState; NUM_LEVELS],
}

#[derive(Default)]
struct LevelState {
    deleted: HashSet<u64>,
    added: Vec<Arc<FileMetaData>>,
}

impl Builder {
    fn new(base: Arc<Version>) -> Self {
        Builder {
            base,
            levels: Default::default(),
        }
    }

    /// Merges one edit's deletions, additions, and compact pointers.
    fn apply(
        &mut self,
        edit: &VersionEdit,
        compact_pointers: &mut [Option<InternalKey>; NUM_LEVELS],
    ) {
        for (level, key) in &edit.compact_pointers {
            compact_pointers[*level] = Some(key.clone());
        }
        for (level, number) in &edit.deleted_files {
            self.levels[*level].deleted.insert(*number);
        }
        for (level, file) in &edit.new_files {
            self.levels[*level].deleted.remove(&file.number);
            self.levels[*level].added.push(Arc::new(file.clone()));
        }
    }

    /// Produces `(base - deleted) + added` per level, ordered and
    /// validated.
    fn save_to(&mut self) -> Result<Version> {
        let mut v = Version::new();
        for level in 0..NUM_LEVELS {
            let state = &mut self.levels[level];
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .filter(|f| !state.deleted.contains(&f.number))
                .cloned()
                .collect();
            files.extend(
                state
                    .added
                    .drain(..)
                    .filter(|f| !state.deleted.contains(&f.number)),
            );

            if level == 0 {
                // Newest first.
                files.sort_by(|a, b| b.number.cmp(&a.number));
            } else {
                files.sort_by(|a, b| {
                    compare_internal_keys(a.smallest.as_bytes(), b.smallest.as_bytes())
                });
                for pair in files.windows(2) {
                    if pair[0].largest.user_key() >= pair[1].smallest.user_key() {
                        return Err(Error::Corruption(format!(
                            "level {level} files {} and {} overlap",
                            pair[0].number, pair[1].number
                        )));
                    }
                }
            }
            v.files[level] = files;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ValueType, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK};
    use tempfile::tempdir;

    fn key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(user_key, seq, ValueType::Value)
    }

    fn seek_key(user_key: &[u8]) -> InternalKey {
        InternalKey::new(user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)
    }

    fn new_set(dir: &std::path::Path) -> VersionSet {
        VersionSet::new(dir.to_path_buf(), Options::default())
    }

    fn add_file_edit(level: usize, number: u64, smallest: &[u8], largest: &[u8]) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.add_file(level, number, 1000, key(smallest, 100), key(largest, 50));
        edit
    }

    #[test]
    fn test_builder_add_and_delete() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());

        set.log_and_apply(&mut add_file_edit(1, 3, b"a", b"c")).unwrap();
        set.log_and_apply(&mut add_file_edit(1, 4, b"e", b"g")).unwrap();
        assert_eq!(set.num_level_files(1), 2);

        let mut edit = VersionEdit::new();
        edit.delete_file(1, 3);
        edit.add_file(2, 5, 1000, key(b"a", 100), key(b"c", 50));
        set.log_and_apply(&mut edit).unwrap();

        let current = set.current();
        assert_eq!(current.num_files(1), 1);
        assert_eq!(current.files(1)[0].number, 4);
        assert_eq!(current.num_files(2), 1);
    }

    #[test]
    fn test_level0_ordered_newest_first() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.log_and_apply(&mut add_file_edit(0, 3, b"a", b"z")).unwrap();
        set.log_and_apply(&mut add_file_edit(0, 7, b"a", b"z")).unwrap();
        set.log_and_apply(&mut add_file_edit(0, 5, b"a", b"z")).unwrap();

        let numbers: Vec<u64> = set.current().files(0).iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![7, 5, 3]);
    }

    #[test]
    fn test_overlapping_sorted_level_rejected() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.log_and_apply(&mut add_file_edit(1, 3, b"a", b"m")).unwrap();
        let err = set.log_and_apply(&mut add_file_edit(1, 4, b"k", b"z"));
        assert!(matches!(err, Err(Error::Corruption(_))));
        // The failed apply must not have been installed.
        assert_eq!(set.num_level_files(1), 1);
    }

    #[test]
    fn test_recover_roundtrip() {
        let dir = tempdir().unwrap();
        let last_state = {
            let mut set = new_set(dir.path());
            set.manifest_file_number = 1;
            set.set_last_sequence(500);
            set.log_and_apply(&mut add_file_edit(1, 3, b"a", b"c")).unwrap();
            set.log_and_apply(&mut add_file_edit(2, 4, b"d", b"f")).unwrap();
            (set.next_file_number, set.last_sequence())
        };

        let mut recovered = new_set(dir.path());
        recovered.recover().unwrap();
        assert_eq!(recovered.last_sequence(), last_state.1);
        assert!(recovered.next_file_number > last_state.0);
        let current = recovered.current();
        assert_eq!(current.num_files(1), 1);
        assert_eq!(current.files(1)[0].number, 3);
        assert_eq!(current.files(1)[0].smallest.user_key(), b"a");
        assert_eq!(current.num_files(2), 1);
    }

    #[test]
    fn test_recover_requires_current() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        assert!(set.recover().is_err());
    }

    #[test]
    fn test_file_number_allocation() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        let a = set.new_file_number();
        let b = set.new_file_number();
        assert!(b > a);

        set.reuse_file_number(b);
        assert_eq!(set.new_file_number(), b);

        set.mark_file_number_used(100);
        assert_eq!(set.new_file_number(), 101);
    }

    #[test]
    fn test_pick_compaction_round_robin() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.manifest_file_number = 1;

        // Two small files on level 1 and enough bytes to push the score
        // over 1.0.
        let mut edit = VersionEdit::new();
        edit.add_file(1, 3, 200 * 1024 * 1024, key(b"a", 100), key(b"c", 50));
        edit.add_file(1, 4, 200 * 1024 * 1024, key(b"e", 100), key(b"g", 50));
        set.log_and_apply(&mut edit).unwrap();
        assert!(set.needs_compaction());

        let c = set.pick_compaction().unwrap();
        assert_eq!(c.level, 1);
        assert_eq!(c.num_input_files(0), 1);
        let first = c.input(0, 0).number;

        // The pointer advanced; the next pick takes the other file.
        let c = set.pick_compaction().unwrap();
        let second = c.input(0, 0).number;
        assert_ne!(first, second);
    }

    #[test]
    fn test_pick_compaction_level0_clique() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.manifest_file_number = 1;

        let mut edit = VersionEdit::new();
        for number in 10..15 {
            edit.add_file(0, number, 1000, key(b"a", 100), key(b"m", 50));
        }
        set.log_and_apply(&mut edit).unwrap();

        let c = set.pick_compaction().unwrap();
        assert_eq!(c.level, 0);
        // All overlapping level-0 files join the compaction.
        assert_eq!(c.num_input_files(0), 5);
    }

    #[test]
    fn test_add_boundary_inputs() {
        // File 2's smallest key is an older record of file 1's largest
        // user key; compacting file 1 alone would strand it.
        let f1 = Arc::new(FileMetaData::new(1, 100, key(b"a", 100), key(b"k", 60)));
        let f2 = Arc::new(FileMetaData::new(2, 100, key(b"k", 40), key(b"p", 30)));
        let f3 = Arc::new(FileMetaData::new(3, 100, key(b"q", 20), key(b"z", 10)));
        let level_files = vec![Arc::clone(&f1), Arc::clone(&f2), Arc::clone(&f3)];

        let mut inputs = vec![Arc::clone(&f1)];
        add_boundary_inputs(&level_files, &mut inputs);
        let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_add_boundary_inputs_chain() {
        // Boundary expansion must follow chains: 1 pulls 2, 2 pulls 3.
        let f1 = Arc::new(FileMetaData::new(1, 100, key(b"a", 100), key(b"k", 60)));
        let f2 = Arc::new(FileMetaData::new(2, 100, key(b"k", 40), key(b"m", 35)));
        let f3 = Arc::new(FileMetaData::new(3, 100, key(b"m", 20), key(b"p", 10)));
        let level_files = vec![Arc::clone(&f1), Arc::clone(&f2), Arc::clone(&f3)];

        let mut inputs = vec![Arc::clone(&f1)];
        add_boundary_inputs(&level_files, &mut inputs);
        assert_eq!(inputs.len(), 3);
    }

    #[test]
    fn test_compact_range_manual() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.manifest_file_number = 1;

        let mut edit = VersionEdit::new();
        edit.add_file(1, 3, 1000, key(b"a", 100), key(b"c", 50));
        edit.add_file(1, 4, 1000, key(b"e", 100), key(b"g", 50));
        set.log_and_apply(&mut edit).unwrap();

        let c = set
            .compact_range(1, Some(&seek_key(b"b")), Some(&key(b"d", 0)))
            .unwrap();
        assert_eq!(c.num_input_files(0), 1);
        assert_eq!(c.input(0, 0).number, 3);

        assert!(set
            .compact_range(1, Some(&seek_key(b"x")), Some(&key(b"z", 0)))
            .is_none());
    }

    #[test]
    fn test_live_files_spans_versions() {
        let dir = tempdir().unwrap();
        let mut set = new_set(dir.path());
        set.manifest_file_number = 1;

        set.log_and_apply(&mut add_file_edit(1, 3, b"a", b"c")).unwrap();
        // Hold the old version alive through an external reference.
        let pinned = set.current();

        let mut edit = VersionEdit::new();
        edit.delete_file(1, 3);
        edit.add_file(1, 9, 1000, key(b"a", 100), key(b"c", 50));
        set.log_and_apply(&mut edit).unwrap();

        let live = set.live_files();
        assert!(live.contains(&3), "pinned version keeps file 3 live");
        assert!(live.contains(&9));

        drop(pinned);
        let mut edit = VersionEdit::new();
        edit.delete_file(1, 9);
        edit.add_file(1, 11, 1000, key(b"a", 100), key(b"c", 50));
        set.log_and_apply(&mut edit).unwrap();
        let live = set.live_files();
        assert!(!live.contains(&3), "unreferenced version was collected");
    }
}
