//! Immutable snapshots of the table layout.
//!
//! A version maps each level to an ordered list of table files. Level 0
//! files may overlap and are ordered newest first; every deeper level is
//! sorted by smallest key with disjoint user-key ranges. Readers and
//! compactions hold a strong reference to the version they started from,
//! so installing a new version never invalidates work in flight.

pub mod edit;
pub mod set;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use crate::coding::{decode_fixed64, put_fixed64};
use crate::config::{Options, L0_COMPACTION_TRIGGER, MAX_MEM_COMPACT_LEVEL, NUM_LEVELS};
use crate::error::Result;
use crate::iterator::{InternalIterator, TwoLevelIterator};
use crate::keys::{
    compare_internal_keys, InternalKey, LookupKey, ValueType, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};
use crate::table_cache::TableCache;

/// One table file's metadata as tracked by the version set.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    /// Seeks that may miss into this file before it is queued for
    /// compaction. Runtime-only; never persisted.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        // One seek costs about as much as compacting 16 KiB, with a floor
        // so tiny files are not compacted after a handful of misses.
        let allowed_seeks = ((file_size / 16384) as i64).max(100);
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        FileMetaData {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI64::new(self.allowed_seeks.load(AtomicOrdering::Relaxed)),
        }
    }
}

impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file whose largest key is >= `target`, assuming
/// `files` is sorted by smallest key and disjoint.
pub fn find_file(files: &[Arc<FileMetaData>], target: &[u8]) -> usize {
    files.partition_point(|f| compare_internal_keys(f.largest.as_bytes(), target) == Ordering::Less)
}

fn after_file(user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    // True if every key in `file` is before `user_key`.
    user_key.is_some_and(|key| key > file.largest.user_key())
}

fn before_file(user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    user_key.is_some_and(|key| key < file.smallest.user_key())
}

/// Whether any file overlaps the user-key range `[smallest, largest]`;
/// `None` bounds are unbounded. `disjoint` marks a sorted level.
pub fn some_file_overlaps_range(
    disjoint: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    if !disjoint {
        return files
            .iter()
            .any(|f| !after_file(smallest_user_key, f) && !before_file(largest_user_key, f));
    }

    let index = match smallest_user_key {
        Some(key) => {
            let target = InternalKey::new(key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            find_file(files, target.as_bytes())
        }
        None => 0,
    };
    match files.get(index) {
        None => false,
        Some(file) => !before_file(largest_user_key, file),
    }
}

/// Charge accumulated by a read so seek-triggered compaction can find
/// hot, missing-prone files.
#[derive(Default)]
pub struct GetStats {
    pub seek_file: Option<(Arc<FileMetaData>, usize)>,
}

pub struct Version {
    files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],

    // Precomputed by `finalize`: the level most in need of compaction.
    pub compaction_score: f64,
    pub compaction_level: usize,

    // Set when a file exhausts its seek budget.
    file_to_compact: RwLock<Option<(Arc<FileMetaData>, usize)>>,
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

impl Version {
    pub fn new() -> Self {
        Version {
            files: Default::default(),
            compaction_score: -1.0,
            compaction_level: 0,
            file_to_compact: RwLock::new(None),
        }
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn file_to_compact(&self) -> Option<(Arc<FileMetaData>, usize)> {
        self.file_to_compact.read().unwrap().clone()
    }

    /// Level-0 files possibly containing `user_key`, newest first, then
    /// the single candidate per deeper level.
    pub fn get(
        &self,
        lookup: &LookupKey,
        table_cache: &TableCache,
    ) -> Result<(Option<Option<Vec<u8>>>, GetStats)> {
        let user_key = lookup.user_key();
        let target = lookup.internal_key();
        let mut stats = GetStats::default();
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        let search =
            |file: &Arc<FileMetaData>,
             level: usize,
             stats: &mut GetStats,
             last_file_read: &mut Option<(Arc<FileMetaData>, usize)>|
             -> Result<Option<Option<Vec<u8>>>> {
                if last_file_read.is_some() && stats.seek_file.is_none() {
                    // Reading a second file charges the first one.
                    stats.seek_file = last_file_read.clone();
                }
                *last_file_read = Some((Arc::clone(file), level));

                let found = table_cache.get(file.number, file.file_size, target)?;
                if let Some((key, value)) = found {
                    let parsed = crate::keys::parse_internal_key(&key)?;
                    if parsed.user_key == user_key {
                        return match parsed.value_type {
                            ValueType::Value => Ok(Some(Some(value))),
                            ValueType::Deletion => Ok(Some(None)),
                        };
                    }
                }
                Ok(None)
            };

        // Level 0: all overlapping files, newest first.
        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                user_key >= f.smallest.user_key() && user_key <= f.largest.user_key()
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in level0 {
            if let Some(result) = search(file, 0, &mut stats, &mut last_file_read)? {
                return Ok((Some(result), stats));
            }
        }

        // Deeper levels are disjoint: at most one candidate each.
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            let index = find_file(files, target);
            let Some(file) = files.get(index) else {
                continue;
            };
            if user_key < file.smallest.user_key() {
                continue;
            }
            if let Some(result) = search(file, level, &mut stats, &mut last_file_read)? {
                return Ok((Some(result), stats));
            }
        }

        Ok((None, stats))
    }

    /// Applies a read charge. Returns true when a file just crossed its
    /// seek budget and compaction should be scheduled.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        let Some((file, level)) = &stats.seek_file else {
            return false;
        };
        let remaining = file.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
        if remaining <= 0 {
            let mut slot = self.file_to_compact.write().unwrap();
            if slot.is_none() {
                *slot = Some((Arc::clone(file), *level));
                return true;
            }
        }
        false
    }

    /// Charges the periodic read sample from iteration: when at least two
    /// files overlap the sampled key, the first would have been seeked.
    pub fn record_read_sample(&self, internal_key: &[u8]) -> bool {
        let Ok(parsed) = crate::keys::parse_internal_key(internal_key) else {
            return false;
        };
        let user_key = parsed.user_key;

        let mut first: Option<(Arc<FileMetaData>, usize)> = None;
        let mut matches = 0;

        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| user_key >= f.smallest.user_key() && user_key <= f.largest.user_key())
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in level0 {
            matches += 1;
            if first.is_none() {
                first = Some((Arc::clone(file), 0));
            }
            if matches >= 2 {
                break;
            }
        }
        if matches < 2 {
            let target = InternalKey::new(user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            for level in 1..NUM_LEVELS {
                let files = &self.files[level];
                if let Some(file) = files.get(find_file(files, target.as_bytes())) {
                    if user_key >= file.smallest.user_key() {
                        matches += 1;
                        if first.is_none() {
                            first = Some((Arc::clone(file), level));
                        }
                        if matches >= 2 {
                            break;
                        }
                    }
                }
            }
        }

        if matches >= 2 {
            return self.update_stats(&GetStats { seek_file: first });
        }
        false
    }

    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Deepest level a fresh flush covering `[smallest, largest]` can be
    /// placed at without breaking read ordering or future compactions.
    pub fn pick_level_for_memtable_output(
        &self,
        options: &Options,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> usize {
        if self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            return 0;
        }
        let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
        let mut level = 0;
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > options.max_grandparent_overlap_bytes() {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files in `level` overlapping `[begin, end]` in user-key terms.
    /// For level 0 the range grows until it covers every transitively
    /// overlapping file, since level-0 files overlap each other.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());
        let mut inputs = Vec::new();

        let mut i = 0;
        while i < self.files[level].len() {
            let file = Arc::clone(&self.files[level][i]);
            i += 1;
            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();

            if user_begin.as_deref().is_some_and(|b| file_limit < b) {
                continue;
            }
            if user_end.as_deref().is_some_and(|e| file_start > e) {
                continue;
            }

            if level == 0 {
                // Level-0 files overlap each other; widen and restart.
                let mut expanded = false;
                if user_begin.as_deref().is_some_and(|b| file_start < b) {
                    user_begin = Some(file_start.to_vec());
                    expanded = true;
                }
                if user_end.as_deref().is_some_and(|e| file_limit > e) {
                    user_end = Some(file_limit.to_vec());
                    expanded = true;
                }
                if expanded {
                    inputs.clear();
                    i = 0;
                    continue;
                }
            }
            inputs.push(file);
        }
        inputs
    }

    /// One iterator per level-0 file plus one concatenating iterator per
    /// deeper non-empty level, newest sources first.
    pub fn add_iterators(
        &self,
        table_cache: &Arc<TableCache>,
        iters: &mut Vec<Box<dyn InternalIterator>>,
    ) -> Result<()> {
        for file in &self.files[0] {
            iters.push(table_cache.iter(file.number, file.file_size)?);
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(new_concatenating_iterator(
                    Arc::clone(table_cache),
                    self.files[level].clone(),
                ));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn test_set_files(&mut self, level: usize, files: Vec<Arc<FileMetaData>>) {
        self.files[level] = files;
    }

    /// Debug validation of the level invariants.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            for pair in files.windows(2) {
                assert!(
                    compare_internal_keys(pair[0].largest.as_bytes(), pair[1].smallest.as_bytes())
                        == Ordering::Less,
                    "level {level} files overlap or are unsorted"
                );
                assert!(
                    pair[0].largest.user_key() < pair[1].smallest.user_key(),
                    "level {level} files share a user key"
                );
            }
        }
    }
}

/// Iterator over a sorted level's file list: key is the file's largest
/// internal key, value is `number ‖ size` as two fixed64s.
struct LevelFileNumIterator {
    files: Vec<Arc<FileMetaData>>,
    index: usize,
    value_buf: Vec<u8>,
}

impl LevelFileNumIterator {
    fn new(files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        LevelFileNumIterator {
            files,
            index,
            value_buf: Vec::with_capacity(16),
        }
    }

    fn fill_value(&mut self) {
        if self.index < self.files.len() {
            let file = &self.files[self.index];
            self.value_buf.clear();
            put_fixed64(&mut self.value_buf, file.number);
            put_fixed64(&mut self.value_buf, file.file_size);
        }
    }
}

impl InternalIterator for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.fill_value();
    }

    fn seek_to_last(&mut self) {
        self.index = self.files.len().saturating_sub(1);
        self.fill_value();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = find_file(&self.files, target);
        self.fill_value();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.index += 1;
        self.fill_value();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.index == 0 {
            self.index = self.files.len();
            return;
        }
        self.index -= 1;
        self.fill_value();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.files[self.index].largest.as_bytes()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// Walks a sorted level file-by-file through the table cache.
pub fn new_concatenating_iterator(
    table_cache: Arc<TableCache>,
    files: Vec<Arc<FileMetaData>>,
) -> Box<dyn InternalIterator> {
    let index_iter = Box::new(LevelFileNumIterator::new(files));
    let factory = Box::new(move |file_value: &[u8]| {
        if file_value.len() != 16 {
            return Err(crate::corrupt!("bad file entry in level iterator"));
        }
        let number = decode_fixed64(&file_value[0..8]);
        let size = decode_fixed64(&file_value[8..16]);
        table_cache.iter(number, size)
    });
    Box::new(TwoLevelIterator::new(index_iter, factory))
}

/// Compaction trigger score for a version, stored by `finalize`.
pub fn level_score(files: &[Arc<FileMetaData>], level: usize) -> f64 {
    if level == 0 {
        files.len() as f64 / L0_COMPACTION_TRIGGER as f64
    } else {
        total_file_size(files) as f64 / max_bytes_for_level(level)
    }
}

/// Byte budget for a level: 10^L x 10 MiB.
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1024.0 * 1024.0;
    for _ in 0..level {
        result *= 10.0;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(number: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::new(
            number,
            1000,
            InternalKey::new(smallest, 100, ValueType::Value),
            InternalKey::new(largest, 50, ValueType::Value),
        ))
    }

    fn version_with(levels: Vec<(usize, Vec<Arc<FileMetaData>>)>) -> Version {
        let mut v = Version::new();
        for (level, files) in levels {
            v.files[level] = files;
        }
        v
    }

    #[test]
    fn test_find_file() {
        let files = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")];
        let target = |key: &[u8]| {
            InternalKey::new(key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)
        };
        assert_eq!(find_file(&files, target(b"a").as_bytes()), 0);
        assert_eq!(find_file(&files, target(b"d").as_bytes()), 1);
        assert_eq!(find_file(&files, target(b"g").as_bytes()), 1);
        assert_eq!(find_file(&files, target(b"z").as_bytes()), 3);
    }

    #[test]
    fn test_overlap_disjoint_level() {
        let files = vec![meta(1, b"c", b"e"), meta(2, b"m", b"p")];
        assert!(some_file_overlaps_range(true, &files, Some(b"d"), Some(b"f")));
        assert!(some_file_overlaps_range(true, &files, Some(b"f"), Some(b"l")) == false);
        assert!(some_file_overlaps_range(true, &files, Some(b"a"), Some(b"c")));
        assert!(some_file_overlaps_range(true, &files, None, Some(b"b")) == false);
        assert!(some_file_overlaps_range(true, &files, Some(b"q"), None) == false);
        assert!(some_file_overlaps_range(true, &files, None, None));
    }

    #[test]
    fn test_overlap_level0() {
        let files = vec![meta(1, b"c", b"m"), meta(2, b"a", b"e")];
        assert!(some_file_overlaps_range(false, &files, Some(b"k"), Some(b"z")));
        assert!(some_file_overlaps_range(false, &files, Some(b"n"), Some(b"z")) == false);
    }

    #[test]
    fn test_get_overlapping_inputs_expands_level0() {
        // File 2 overlaps file 1's range transitively; asking for a..b
        // must pull in both.
        let v = version_with(vec![(0, vec![meta(1, b"a", b"e"), meta(2, b"d", b"m")])]);
        let begin = InternalKey::new(b"a", MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let end = InternalKey::new(b"b", 0, ValueType::Value);
        let inputs = v.get_overlapping_inputs(0, Some(&begin), Some(&end));
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_get_overlapping_inputs_sorted_level() {
        let v = version_with(vec![(
            1,
            vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")],
        )]);
        let begin = InternalKey::new(b"f", MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let end = InternalKey::new(b"j", 0, ValueType::Value);
        let inputs = v.get_overlapping_inputs(1, Some(&begin), Some(&end));
        let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn test_level_score() {
        let files: Vec<Arc<FileMetaData>> = (0..8).map(|i| meta(i, b"a", b"b")).collect();
        assert_eq!(level_score(&files, 0), 2.0);

        // 100 MiB of data exactly fills level 1's budget under the
        // 10^L x 10 MiB rule.
        let big = Arc::new(FileMetaData::new(
            9,
            100 * 1024 * 1024,
            InternalKey::new(b"a", 1, ValueType::Value),
            InternalKey::new(b"b", 1, ValueType::Value),
        ));
        let score = level_score(&[big], 1);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_allowed_seeks_floor() {
        let small = FileMetaData::new(
            1,
            1024,
            InternalKey::new(b"a", 1, ValueType::Value),
            InternalKey::new(b"b", 1, ValueType::Value),
        );
        assert_eq!(small.allowed_seeks.load(AtomicOrdering::Relaxed), 100);

        let large = FileMetaData::new(
            2,
            10 * 1024 * 1024,
            InternalKey::new(b"a", 1, ValueType::Value),
            InternalKey::new(b"b", 1, ValueType::Value),
        );
        assert_eq!(large.allowed_seeks.load(AtomicOrdering::Relaxed), 640);
    }

    #[test]
    fn test_update_stats_marks_file() {
        let file = meta(1, b"a", b"z");
        file.allowed_seeks.store(1, AtomicOrdering::Relaxed);
        let v = version_with(vec![(1, vec![Arc::clone(&file)])]);

        let stats = GetStats {
            seek_file: Some((Arc::clone(&file), 1)),
        };
        assert!(v.update_stats(&stats));
        let (marked, level) = v.file_to_compact().unwrap();
        assert_eq!(marked.number, 1);
        assert_eq!(level, 1);

        // Already marked; a second trip does not re-trigger.
        assert!(!v.update_stats(&stats));
    }
}
