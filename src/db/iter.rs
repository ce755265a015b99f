//! The user-facing ordered cursor.
//!
//! Wraps a merging iterator over the memtables and every table in the
//! pinned version, collapsing internal records into one entry per live
//! user key: newer records shadow older ones, tombstones hide the key
//! entirely, and anything past the read sequence is invisible. Direction
//! may change at any time; the cursor then lands strictly on the other
//! side of the last returned key.

use std::sync::Arc;

use crate::config::READ_BYTES_PERIOD;
use crate::error::Result;
use crate::iterator::{InternalIterator, MergingIterator};
use crate::keys::{
    append_internal_key, extract_user_key, parse_internal_key, SequenceNumber, ValueType,
    VALUE_TYPE_FOR_SEEK,
};
use crate::version::Version;

use super::DbInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub(super) fn new_db_iterator(
    inner: &Arc<DbInner>,
    sequence: Option<SequenceNumber>,
) -> Result<DbIterator> {
    let state = inner.state.lock()?;
    let sequence = sequence.unwrap_or_else(|| state.versions.last_sequence());

    let mut children: Vec<Box<dyn InternalIterator>> =
        vec![Box::new(Arc::clone(&state.mem).iter())];
    if let Some(imm) = &state.imm {
        children.push(Box::new(Arc::clone(imm).iter()));
    }
    let version = state.versions.current();
    version.add_iterators(&inner.table_cache, &mut children)?;
    drop(state);

    Ok(DbIterator {
        inner: Box::new(MergingIterator::new(children)),
        db: Arc::clone(inner),
        version,
        sequence,
        direction: Direction::Forward,
        valid: false,
        saved_key: Vec::new(),
        saved_value: Vec::new(),
        status: Ok(()),
        bytes_until_read_sampling: READ_BYTES_PERIOD,
    })
}

/// Ordered cursor over the database at a fixed sequence.
///
/// Obtained from [`crate::DB::iter`]; keeps the version it was opened
/// against alive, so long-lived cursors delay file garbage collection.
pub struct DbIterator {
    inner: Box<dyn InternalIterator>,
    db: Arc<DbInner>,
    version: Arc<Version>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    // In reverse mode the current entry, having been pieced together
    // from records already passed, lives here instead of in `inner`.
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    status: Result<()>,
    bytes_until_read_sampling: u64,
}

impl DbIterator {
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Only while `valid`.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value. Only while `valid`.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.inner.status()
    }

    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first();
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.saved_key.clear();
        self.inner.seek_to_last();
        self.find_prev_user_entry();
    }

    /// Positions at the first live entry with user key >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.saved_key.clear();
        append_internal_key(
            &mut self.saved_key,
            target,
            self.sequence,
            VALUE_TYPE_FOR_SEEK,
        );
        let seek_target = std::mem::take(&mut self.saved_key);
        self.inner.seek(&seek_target);
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // `inner` sits before every record of the current key (or
            // is exhausted); step back onto them so the skip below can
            // pass them.
            if !self.inner.valid() {
                self.inner.seek_to_first();
            } else {
                self.inner.next();
            }
            if !self.inner.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
            // saved_key holds the user key to skip past.
        } else {
            self.saved_key = extract_user_key(self.inner.key()).to_vec();
            self.inner.next();
            if !self.inner.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
        }

        self.find_next_user_entry(true);
    }

    pub fn prev(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Forward {
            // Walk back past every record of the current user key.
            self.saved_key = extract_user_key(self.inner.key()).to_vec();
            loop {
                self.inner.prev();
                if !self.inner.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                if extract_user_key(self.inner.key()) < self.saved_key.as_slice() {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    /// Parses the current internal entry, charging the periodic read
    /// sample against the version's seek budgets.
    fn parse_entry(&mut self) -> Option<(Vec<u8>, SequenceNumber, ValueType)> {
        let key = self.inner.key();
        let bytes = (key.len() + self.inner.value().len()) as u64;
        while self.bytes_until_read_sampling < bytes {
            self.bytes_until_read_sampling += READ_BYTES_PERIOD;
            if self.version.record_read_sample(key) {
                self.db.maybe_schedule_compaction();
            }
        }
        self.bytes_until_read_sampling -= bytes;

        match parse_internal_key(self.inner.key()) {
            Ok(parsed) => Some((
                parsed.user_key.to_vec(),
                parsed.sequence,
                parsed.value_type,
            )),
            Err(err) => {
                if self.status.is_ok() {
                    self.status = Err(err);
                }
                None
            }
        }
    }

    /// Forward scan to the newest visible record of the next live user
    /// key. With `skipping`, entries at or before `saved_key` are hidden.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(self.direction, Direction::Forward);
        loop {
            if !self.inner.valid() {
                break;
            }
            if let Some((user_key, sequence, value_type)) = self.parse_entry() {
                if sequence <= self.sequence {
                    match value_type {
                        ValueType::Deletion => {
                            // Everything older for this key is deleted.
                            self.saved_key = user_key;
                            skipping = true;
                        }
                        ValueType::Value => {
                            if skipping && user_key.as_slice() <= self.saved_key.as_slice() {
                                // Shadowed by a deletion or already seen.
                            } else {
                                self.valid = true;
                                self.saved_key.clear();
                                return;
                            }
                        }
                    }
                }
            }
            self.inner.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Reverse scan: accumulates the newest visible record of the
    /// current user key into `saved_*`, stopping once a smaller user key
    /// appears.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(self.direction, Direction::Reverse);

        let mut value_type = ValueType::Deletion;
        while self.inner.valid() {
            if let Some((user_key, sequence, entry_type)) = self.parse_entry() {
                if sequence <= self.sequence {
                    if value_type != ValueType::Deletion
                        && user_key.as_slice() < self.saved_key.as_slice()
                    {
                        // The saved entry is the answer.
                        break;
                    }
                    value_type = entry_type;
                    match value_type {
                        ValueType::Deletion => {
                            self.saved_key.clear();
                            self.saved_value.clear();
                        }
                        ValueType::Value => {
                            self.saved_key = user_key;
                            self.saved_value = self.inner.value().to_vec();
                        }
                    }
                }
            }
            self.inner.prev();
        }

        if value_type == ValueType::Deletion {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }
}
