//! State of one compaction from level L into level L+1.
//!
//! Carries the chosen input files, the grandparent files that bound
//! output cutovers, and the version edit that will install the result.
//! Holds a strong reference to the version it was picked from so the
//! input files cannot be deleted mid-run.

use std::sync::Arc;

use crate::config::{Options, NUM_LEVELS};
use crate::keys::compare_internal_keys;
use crate::version::edit::VersionEdit;
use crate::version::{total_file_size, FileMetaData, Version};

pub struct Compaction {
    pub level: usize,
    max_output_file_size: u64,
    max_grandparent_overlap: u64,

    pub input_version: Option<Arc<Version>>,
    pub edit: VersionEdit,

    /// `inputs[0]` from level L, `inputs[1]` from level L+1.
    pub inputs: [Vec<Arc<FileMetaData>>; 2],

    /// Level L+2 files overlapping the compaction range.
    pub grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    // Per-level cursor for `is_base_level_for_key`; valid because both
    // the compaction keys and the level files advance in order.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub fn new(options: &Options, level: usize) -> Self {
        Compaction {
            level,
            max_output_file_size: options.max_file_size,
            max_grandparent_overlap: options.max_grandparent_overlap_bytes(),
            input_version: None,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][i]
    }

    /// Size at which the current output table is closed regardless of
    /// grandparent overlap.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single input file with nothing to merge against can be adopted
    /// by the next level by renaming it in the version, as long as it
    /// does not overlap too much of level L+2 (which would make later
    /// compactions there expensive).
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap
    }

    /// Records the removal of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit.delete_file(self.level + which, file.number);
            }
        }
    }

    /// True when no level deeper than the output contains `user_key`, so
    /// a tombstone for it may be dropped.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let Some(version) = &self.input_version else {
            return false;
        };
        for level in (self.level + 2)..NUM_LEVELS {
            let files = version.files(level);
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if user_key <= file.largest.user_key() {
                    if user_key >= file.smallest.user_key() {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Called before emitting `internal_key` to an output file; true when
    /// the current output overlaps enough grandparent data that it should
    /// be closed first.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && compare_internal_keys(
                internal_key,
                self.grandparents[self.grandparent_index].largest.as_bytes(),
            ) == std::cmp::Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap {
            self.overlapped_bytes = 0;
            return true;
        }
        false
    }

    /// Drops the version reference once the compaction is installed or
    /// abandoned.
    pub fn release_inputs(&mut self) {
        self.input_version = None;
    }
}
