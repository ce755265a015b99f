//! Prefix-compressed blocks.
//!
//! Records share key prefixes with their predecessor:
//!
//! ```text
//! +----------------+--------------------+------------------+-----------+-------+
//! | shared: varint | non_shared: varint | val_len: varint  | key delta | value |
//! +----------------+--------------------+------------------+-----------+-------+
//! ```
//!
//! Every `restart_interval` entries the shared length resets to zero and
//! the entry offset is recorded; a trailing array of little-endian u32
//! restart offsets plus their count closes the block. Seeks binary-search
//! the restart points, then scan forward.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{decode_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::error::{Error, Result};
use crate::iterator::InternalIterator;
use crate::keys::compare_internal_keys;

/// Builds one block; reused across blocks through `reset`.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry. Keys must arrive in strictly increasing
    /// internal-key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(
            self.buffer.is_empty()
                || compare_internal_keys(&self.last_key, key) == Ordering::Less
        );

        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished block contents.
    pub fn finish(&mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        std::mem::take(&mut self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
    }

    /// Uncompressed size of the block if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

/// A decoded, immutable block.
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too small".to_string()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts {
            return Err(Error::Corruption("bad restart count".to_string()));
        }
        let restart_offset = data.len() - 4 - 4 * num_restarts as usize;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes held by the decoded block, the unit the block cache charges.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + 4 * index as usize..])
    }

    pub fn iter(self: Arc<Self>) -> BlockIter {
        let restart_offset = self.restart_offset;
        BlockIter {
            block: self,
            current: restart_offset,
            next_offset: restart_offset,
            restart_index: 0,
            key: Vec::new(),
            value_range: (0, 0),
            error: None,
        }
    }
}

/// Cursor over one block's entries.
pub struct BlockIter {
    block: Arc<Block>,
    // Offset of the current entry; restart_offset means invalid.
    current: usize,
    next_offset: usize,
    restart_index: u32,
    key: Vec<u8>,
    value_range: (usize, usize),
    error: Option<Error>,
}

impl BlockIter {
    fn corrupted(&mut self) {
        self.error = Some(Error::Corruption("bad block entry".to_string()));
        self.current = self.block.restart_offset;
        self.next_offset = self.block.restart_offset;
        self.key.clear();
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        let offset = self.block.restart_point(index) as usize;
        self.current = offset;
        self.next_offset = offset;
    }

    /// Decodes the entry at `next_offset`, extending the running key.
    /// Returns false at the end of the entries.
    fn parse_next_entry(&mut self) -> bool {
        self.current = self.next_offset;
        if self.current >= self.block.restart_offset {
            self.current = self.block.restart_offset;
            self.next_offset = self.block.restart_offset;
            return false;
        }

        let block = Arc::clone(&self.block);
        let data = &block.data[..block.restart_offset];
        let mut pos = self.current;
        let mut read_varint = |pos: &mut usize| -> Option<u32> {
            let (v, n) = get_varint32(&data[*pos..]).ok()?;
            *pos += n;
            Some(v)
        };

        let (shared, non_shared, value_len) = match (
            read_varint(&mut pos),
            read_varint(&mut pos),
            read_varint(&mut pos),
        ) {
            (Some(a), Some(b), Some(c)) => (a as usize, b as usize, c as usize),
            _ => {
                self.corrupted();
                return false;
            }
        };

        if shared > self.key.len() || pos + non_shared + value_len > data.len() {
            self.corrupted();
            return false;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[pos..pos + non_shared]);
        self.value_range = (pos + non_shared, value_len);
        self.next_offset = pos + non_shared + value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && (self.block.restart_point(self.restart_index + 1) as usize) < self.current + 1
        {
            self.restart_index += 1;
        }
        true
    }

    /// Compares the key at a restart point against `target` without
    /// disturbing iterator state. Restart entries never share a prefix.
    fn compare_restart_key(&self, index: u32, target: &[u8]) -> Result<Ordering> {
        let data = &self.block.data[..self.block.restart_offset];
        let mut pos = self.block.restart_point(index) as usize;
        let (shared, n) = get_varint32(&data[pos..])?;
        pos += n;
        let (non_shared, n) = get_varint32(&data[pos..])?;
        pos += n;
        let (_value_len, n) = get_varint32(&data[pos..])?;
        pos += n;
        if shared != 0 || pos + non_shared as usize > data.len() {
            return Err(Error::Corruption("bad restart entry".to_string()));
        }
        Ok(compare_internal_keys(
            &data[pos..pos + non_shared as usize],
            target,
        ))
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.error.is_none() && self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_entry() && self.next_offset < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            return;
        }
        // Last restart point whose key is < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.compare_restart_key(mid, target) {
                Ok(Ordering::Less) => left = mid,
                Ok(_) => right = mid - 1,
                Err(_) => {
                    self.corrupted();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if compare_internal_keys(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;

        // Back up to the restart point before the current entry.
        while self.block.restart_point(self.restart_index) as usize >= original {
            if self.restart_index == 0 {
                self.current = self.block.restart_offset;
                self.next_offset = self.block.restart_offset;
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        // Scan forward to the entry immediately before the original.
        while self.parse_next_entry() && self.next_offset < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        let (offset, len) = self.value_range;
        &self.block.data[offset..offset + len]
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
