//! In-memory buffer of recent mutations.
//!
//! The memtable is a concurrent skip list keyed by encoded internal keys,
//! so entries for one user key sit adjacent with the newest first. Writes
//! come from the single committing writer; readers iterate concurrently
//! without locks. A memtable fills up to `write_buffer_size`, becomes
//! immutable, and is flushed to a level-0 table in the background.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::coding::varint_length;
use crate::iterator::InternalIterator;
use crate::keys::{InternalKey, LookupKey, SequenceNumber, ValueType};
use crate::error::Result;
use std::sync::Arc;

pub struct MemTable {
    table: SkipMap<InternalKey, Vec<u8>>,
    // Sum of encoded entry lengths, maintained alongside inserts.
    size: AtomicUsize,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    pub fn new() -> Self {
        MemTable {
            table: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Inserts one mutation. The (sequence, type) pair makes the internal
    /// key unique, so an insert never overwrites.
    pub fn add(&self, seq: SequenceNumber, t: ValueType, user_key: &[u8], value: &[u8]) {
        let key = InternalKey::new(user_key, seq, t);
        let internal_len = key.as_bytes().len();
        let encoded_len = varint_length(internal_len as u64)
            + internal_len
            + varint_length(value.len() as u64)
            + value.len();

        self.table.insert(key, value.to_vec());
        self.size.fetch_add(encoded_len, Ordering::Relaxed);
    }

    /// Looks up the newest record for the lookup key's user key at or
    /// below its sequence.
    ///
    /// `Some(Some(v))` is a live value, `Some(None)` a tombstone (the key
    /// is definitely absent), `None` means this memtable has no answer.
    pub fn get(&self, key: &LookupKey) -> Option<Option<Vec<u8>>> {
        let target = InternalKey::from_encoded(key.internal_key().to_vec());
        let entry = self.table.lower_bound(Bound::Included(&target))?;
        if entry.key().user_key() != key.user_key() {
            return None;
        }
        match entry.key().value_type() {
            Ok(ValueType::Value) => Some(Some(entry.value().clone())),
            Ok(ValueType::Deletion) => Some(None),
            // Unreachable for keys built by `add`.
            Err(_) => None,
        }
    }

    /// Accumulated size of the encoded entries in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(self: Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: self,
            current: None,
        }
    }
}

/// Bidirectional cursor over a memtable in internal-key order.
///
/// Positions are re-resolved through the skip list on each step, so the
/// iterator stays sound while the writer keeps inserting.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(InternalKey, Vec<u8>)>,
}

impl MemTableIterator {
    fn capture(
        &self,
        entry: Option<crossbeam_skiplist::map::Entry<'_, InternalKey, Vec<u8>>>,
    ) -> Option<(InternalKey, Vec<u8>)> {
        entry.map(|e| (e.key().clone(), e.value().clone()))
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = self.capture(self.mem.table.front());
    }

    fn seek_to_last(&mut self) {
        self.current = self.capture(self.mem.table.back());
    }

    fn seek(&mut self, target: &[u8]) {
        let target = InternalKey::from_encoded(target.to_vec());
        self.current = self.capture(self.mem.table.lower_bound(Bound::Included(&target)));
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.current = self.capture(self.mem.table.lower_bound(Bound::Excluded(&key)));
    }

    fn prev(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.current = self.capture(self.mem.table.upper_bound(Bound::Excluded(&key)));
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().expect("iterator not valid").0.as_bytes()
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
