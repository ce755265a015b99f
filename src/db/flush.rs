//! Memtable-to-table flushing.

use std::fs;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::filenames::table_file_name;
use crate::iterator::InternalIterator;
use crate::keys::InternalKey;
use crate::memtable::MemTable;
use crate::sstable::TableBuilder;
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::version::FileMetaData;

use super::{DbInner, DbState};

/// Drains `iter` into a new table file, returning its metadata, or
/// `None` when the source was empty. A failed build removes the partial
/// file.
pub(crate) fn build_table(
    dbpath: &Path,
    options: &Options,
    table_cache: &TableCache,
    file_number: u64,
    iter: &mut dyn InternalIterator,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first();
    if !iter.valid() {
        return Ok(None);
    }

    let path = table_file_name(dbpath, file_number);
    let result = (|| -> Result<FileMetaData> {
        let file = File::create(&path)?;
        let mut builder = TableBuilder::new(options, file);

        let smallest = InternalKey::from_encoded(iter.key().to_vec());
        let mut largest = smallest.clone();
        while iter.valid() {
            largest = InternalKey::from_encoded(iter.key().to_vec());
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        iter.status()?;

        let file_size = builder.finish()?;
        builder.sync()?;

        // Open what we just wrote; a table that cannot be read back must
        // never be installed.
        table_cache.get_table(file_number, file_size)?;
        Ok(FileMetaData::new(file_number, file_size, smallest, largest))
    })();

    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(err) => {
            let _ = fs::remove_file(&path);
            Err(err)
        }
    }
}

impl DbInner {
    /// Flushes the immutable memtable into a table and installs it.
    /// Runs on the background thread with the state lock held; the lock
    /// is released around the file build.
    pub(super) fn compact_memtable<'a>(
        &'a self,
        mut state: MutexGuard<'a, DbState>,
    ) -> MutexGuard<'a, DbState> {
        let Some(imm) = state.imm.clone() else {
            return state;
        };

        let mut edit = VersionEdit::new();
        let (returned, built) = self.write_level0_table(state, &imm, &mut edit, true);
        state = returned;

        let result = built.and_then(|_| {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(Error::Io("shutting down during flush".to_string()));
            }
            // Everything in this memtable's WAL is now in a table; older
            // logs become collectible.
            edit.set_prev_log_number(0);
            edit.set_log_number(state.log_file_number);
            state.versions.log_and_apply(&mut edit)
        });

        match result {
            Ok(()) => {
                state.imm = None;
                self.has_imm.store(false, Ordering::Release);
                self.delete_obsolete_files(&mut state);
            }
            Err(err) => {
                self.record_background_error(&mut state, err);
            }
        }
        state
    }

    /// Builds a table from `mem` and records it in `edit`. With
    /// `pick_level`, a non-overlapping output may land below level 0.
    pub(super) fn write_level0_table<'a>(
        &'a self,
        mut state: MutexGuard<'a, DbState>,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
        pick_level: bool,
    ) -> (MutexGuard<'a, DbState>, Result<()>) {
        let file_number = state.versions.new_file_number();
        state.pending_outputs.insert(file_number);
        let start = std::time::Instant::now();
        drop(state);

        let mut iter = Arc::clone(mem).iter();
        let built = build_table(
            &self.dbpath,
            &self.options,
            &self.table_cache,
            file_number,
            &mut iter,
        );

        let mut state = self.state.lock().unwrap();
        state.pending_outputs.remove(&file_number);

        match built {
            Ok(Some(meta)) => {
                let level = if pick_level {
                    state.versions.current().pick_level_for_memtable_output(
                        &self.options,
                        meta.smallest.user_key(),
                        meta.largest.user_key(),
                    )
                } else {
                    0
                };
                tracing::info!(
                    file = meta.number,
                    level,
                    bytes = meta.file_size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "flushed memtable"
                );
                self.info_log.log(&format!(
                    "flushed memtable to table {} at level {level} ({} bytes)",
                    meta.number, meta.file_size
                ));
                edit.add_file(level, meta.number, meta.file_size, meta.smallest, meta.largest);
                (state, Ok(()))
            }
            Ok(None) => {
                state.versions.reuse_file_number(file_number);
                (state, Ok(()))
            }
            Err(err) => (state, Err(err)),
        }
    }
}
