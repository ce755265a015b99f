//! The background compaction driver.
//!
//! One compaction runs at a time. Inputs are read through a merging
//! iterator with the state lock released; only file-number allocation,
//! the occasional mid-run memtable flush, and the final install take the
//! lock.

use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

use crate::compaction::Compaction;
use crate::error::{Error, Result};
use crate::filenames::table_file_name;
use crate::iterator::{InternalIterator, MergingIterator};
use crate::keys::{parse_internal_key, InternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use crate::sstable::TableBuilder;
use crate::version::new_concatenating_iterator;

use super::{DbInner, DbState};

/// A finished compaction output file.
struct CompactionOutput {
    number: u64,
    file_size: u64,
    smallest: InternalKey,
    largest: InternalKey,
}

/// The output file currently being written.
struct PendingOutput {
    number: u64,
    builder: TableBuilder,
    smallest: InternalKey,
    largest: InternalKey,
}

impl DbInner {
    /// Runs one unit of background work: an immutable-memtable flush if
    /// one is queued, otherwise one compaction round.
    pub(super) fn background_compaction<'a>(
        &'a self,
        mut state: MutexGuard<'a, DbState>,
    ) -> MutexGuard<'a, DbState> {
        if state.imm.is_some() {
            return self.compact_memtable(state);
        }

        let is_manual = state
            .manual_compaction
            .as_ref()
            .is_some_and(|m| !m.done);

        let compaction = if is_manual {
            let manual = state.manual_compaction.as_ref().expect("manual present");
            let (level, begin, end) = (manual.level, manual.begin.clone(), manual.end.clone());
            let compaction = state
                .versions
                .compact_range(level, begin.as_ref(), end.as_ref());
            if compaction.is_none() {
                state.manual_compaction.as_mut().expect("manual present").done = true;
            }
            compaction
        } else {
            state.versions.pick_compaction()
        };

        let Some(mut c) = compaction else {
            return state;
        };

        // Where this round's range ends, so a partial manual compaction
        // can resume past it.
        let manual_end = is_manual
            .then(|| c.input(0, c.num_input_files(0) - 1).largest.clone());

        if !is_manual && c.is_trivial_move() {
            let file = Arc::clone(c.input(0, 0));
            c.edit.delete_file(c.level, file.number);
            c.edit.add_file(
                c.level + 1,
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            );
            match state.versions.log_and_apply(&mut c.edit) {
                Ok(()) => {
                    tracing::info!(
                        file = file.number,
                        from_level = c.level,
                        bytes = file.file_size,
                        "trivial move"
                    );
                    self.info_log.log(&format!(
                        "moved table {} from level {} to {} without rewrite",
                        file.number,
                        c.level,
                        c.level + 1
                    ));
                    self.delete_obsolete_files(&mut state);
                }
                Err(err) => self.record_background_error(&mut state, err),
            }
            c.release_inputs();
            return state;
        }

        let (returned, result) = self.do_compaction_work(state, &mut c);
        state = returned;
        if let Err(err) = result {
            self.record_background_error(&mut state, err);
        }
        c.release_inputs();
        self.delete_obsolete_files(&mut state);

        if is_manual {
            let failed = state.bg_error.is_some();
            if let Some(manual) = state.manual_compaction.as_mut() {
                if failed {
                    manual.done = true;
                } else if !manual.done {
                    manual.begin = manual_end;
                }
            }
        }
        state
    }

    fn make_input_iterator(&self, c: &Compaction) -> Result<Box<dyn InternalIterator>> {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for which in 0..2 {
            if c.inputs[which].is_empty() {
                continue;
            }
            if c.level + which == 0 {
                for file in &c.inputs[0] {
                    children.push(self.table_cache.iter(file.number, file.file_size)?);
                }
            } else {
                children.push(new_concatenating_iterator(
                    Arc::clone(&self.table_cache),
                    c.inputs[which].clone(),
                ));
            }
        }
        Ok(Box::new(MergingIterator::new(children)))
    }

    /// Merges the inputs into new level-L+1 tables and installs them.
    fn do_compaction_work<'a>(
        &'a self,
        state: MutexGuard<'a, DbState>,
        c: &mut Compaction,
    ) -> (MutexGuard<'a, DbState>, Result<()>) {
        let start = std::time::Instant::now();
        tracing::info!(
            level = c.level,
            inputs0 = c.num_input_files(0),
            inputs1 = c.num_input_files(1),
            "starting compaction"
        );
        self.info_log.log(&format!(
            "compacting {}@{} + {}@{} files",
            c.num_input_files(0),
            c.level,
            c.num_input_files(1),
            c.level + 1
        ));

        // Records at or below this sequence that are shadowed may drop.
        let smallest_snapshot = self.snapshots.smallest(state.versions.last_sequence());

        let input = self.make_input_iterator(c);
        drop(state);

        let mut input = match input {
            Ok(iter) => iter,
            Err(err) => return (self.state.lock().unwrap(), Err(err)),
        };

        let mut outputs: Vec<CompactionOutput> = Vec::new();
        let mut allocated_numbers: Vec<u64> = Vec::new();
        let mut pending: Option<PendingOutput> = None;
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;
        let mut result = Ok(());

        input.seek_to_first();
        while input.valid() {
            if self.shutting_down.load(Ordering::SeqCst) {
                result = Err(Error::Io("shutting down during compaction".to_string()));
                break;
            }

            // A stalled writer beats an in-progress compaction; flush a
            // queued memtable between output keys.
            if self.has_imm.load(Ordering::Acquire) {
                let guard = self.state.lock().unwrap();
                drop(self.compact_memtable(guard));
                self.bg_done.notify_all();
            }

            let key = input.key().to_vec();

            let cutover = c.should_stop_before(&key);
            if cutover && pending.is_some() {
                result = finish_output(self, c, &mut pending, &mut outputs);
                if result.is_err() {
                    break;
                }
            }

            let mut drop_entry = false;
            match parse_internal_key(&key) {
                Err(_) => {
                    // Carry unparsable records through untouched.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Ok(ikey) => {
                    if current_user_key.as_deref() != Some(ikey.user_key) {
                        // First record for this user key.
                        current_user_key = Some(ikey.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }
                    if last_sequence_for_key <= smallest_snapshot {
                        // A newer record for this key is already visible
                        // to every snapshot; nothing can read this one.
                        drop_entry = true;
                    } else if ikey.value_type == ValueType::Deletion
                        && ikey.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(ikey.user_key)
                    {
                        // The tombstone shadows nothing below and no
                        // snapshot can see past it.
                        drop_entry = true;
                    }
                    last_sequence_for_key = ikey.sequence;
                }
            }

            if !drop_entry {
                if pending.is_none() {
                    match self.open_compaction_output(&key) {
                        Ok(output) => {
                            allocated_numbers.push(output.number);
                            pending = Some(output);
                        }
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                }
                let output = pending.as_mut().expect("output open");
                output.largest = InternalKey::from_encoded(key.clone());
                if let Err(err) = output.builder.add(&key, input.value()) {
                    result = Err(err);
                    break;
                }
                if output.builder.file_size() >= c.max_output_file_size() {
                    result = finish_output(self, c, &mut pending, &mut outputs);
                    if result.is_err() {
                        break;
                    }
                }
            }

            input.next();
        }

        if result.is_ok() && pending.is_some() {
            result = finish_output(self, c, &mut pending, &mut outputs);
        }
        if result.is_ok() {
            result = input.status();
        }
        drop(input);

        let mut state = self.state.lock().unwrap();
        if result.is_ok() {
            result = self.install_compaction_results(&mut state, c, &outputs);
            if result.is_ok() {
                tracing::info!(
                    level = c.level,
                    outputs = outputs.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "compaction finished"
                );
            }
        }
        drop(pending);
        for number in allocated_numbers {
            state.pending_outputs.remove(&number);
        }
        (state, result)
    }

    fn open_compaction_output(&self, first_key: &[u8]) -> Result<PendingOutput> {
        let number = {
            let mut state = self.state.lock().unwrap();
            let number = state.versions.new_file_number();
            state.pending_outputs.insert(number);
            number
        };
        let file = File::create(table_file_name(&self.dbpath, number))?;
        let smallest = InternalKey::from_encoded(first_key.to_vec());
        Ok(PendingOutput {
            number,
            builder: TableBuilder::new(&self.options, file),
            smallest: smallest.clone(),
            largest: smallest,
        })
    }

    fn install_compaction_results(
        &self,
        state: &mut DbState,
        c: &mut Compaction,
        outputs: &[CompactionOutput],
    ) -> Result<()> {
        c.add_input_deletions();
        for output in outputs {
            c.edit.add_file(
                c.level + 1,
                output.number,
                output.file_size,
                output.smallest.clone(),
                output.largest.clone(),
            );
        }
        state.versions.log_and_apply(&mut c.edit)?;
        self.info_log.log(&format!(
            "compacted level {} into {} tables",
            c.level,
            outputs.len()
        ));
        Ok(())
    }
}

fn finish_output(
    inner: &DbInner,
    c: &Compaction,
    pending: &mut Option<PendingOutput>,
    outputs: &mut Vec<CompactionOutput>,
) -> Result<()> {
    let mut output = pending.take().expect("output open");
    debug_assert!(output.builder.num_entries() > 0);

    let file_size = output.builder.finish()?;
    output.builder.sync()?;

    // Confirm the new table opens before the edit can reference it.
    let table = inner.table_cache.get_table(output.number, file_size)?;
    drop(table);

    tracing::debug!(
        file = output.number,
        level = c.level + 1,
        bytes = file_size,
        "compaction output finished"
    );
    outputs.push(CompactionOutput {
        number: output.number,
        file_size,
        smallest: output.smallest,
        largest: output.largest,
    });
    Ok(())
}
