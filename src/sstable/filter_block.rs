//! Table filter blocks.
//!
//! One bloom filter is generated per 2 KiB window of data-block offsets;
//! a lookup maps the block's file offset to the covering filter with
//! `offset >> base_lg`. Layout:
//!
//! ```text
//! +------------------+-------------------+------------------+---------+
//! | filter blobs     | u32 offsets, one  | u32 start of the | base_lg |
//! |                  | per filter        | offset array     | 1 byte  |
//! +------------------+-------------------+------------------+---------+
//! ```

use crate::coding::{decode_fixed32, put_fixed32};
use crate::filter::BloomFilterPolicy;

/// log2 of the offset window one filter covers.
pub const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: BloomFilterPolicy,
    // Flattened keys seen since the last filter was cut.
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: BloomFilterPolicy) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Called when a data block begins at `block_offset`; cuts filters
    /// until the window containing the offset is current.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while (self.filter_offsets.len() as u64) < filter_index {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in offsets {
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG);
        self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            // No keys in this window; the empty filter matches nothing.
            return;
        }
        self.starts.push(self.keys.len());
        let key_slices: Vec<&[u8]> = self
            .starts
            .windows(2)
            .map(|w| &self.keys[w[0]..w[1]])
            .collect();
        self.policy.create_filter(&key_slices, &mut self.result);
        self.keys.clear();
        self.starts.clear();
    }
}

pub struct FilterBlockReader {
    policy: BloomFilterPolicy,
    data: Vec<u8>,
    // Byte position of the offset array.
    array_offset: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Parses filter block contents; a malformed block yields a reader
    /// that matches everything, never a lost key.
    pub fn new(policy: BloomFilterPolicy, data: Vec<u8>) -> Self {
        let n = data.len();
        let (array_offset, num_filters, base_lg) = if n >= 5 {
            let base_lg = data[n - 1];
            let last_word = decode_fixed32(&data[n - 5..]) as usize;
            if last_word <= n - 5 {
                (last_word, (n - 5 - last_word) / 4, base_lg)
            } else {
                (0, 0, 0)
            }
        } else {
            (0, 0, 0)
        };
        FilterBlockReader {
            policy,
            data,
            array_offset,
            num_filters,
            base_lg,
        }
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            // Out of range is treated as a potential match.
            return true;
        }
        let start = decode_fixed32(&self.data[self.array_offset + index * 4..]) as usize;
        let limit = decode_fixed32(&self.data[self.array_offset + index * 4 + 4..]) as usize;
        if start == limit {
            // Empty window: no keys were added, so none can match.
            return false;
        }
        if start < limit && limit <= self.array_offset {
            return self.policy.key_may_match(key, &self.data[start..limit]);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BloomFilterPolicy {
        BloomFilterPolicy::new(10)
    }

    #[test]
    fn test_empty_builder() {
        let builder = FilterBlockBuilder::new(policy());
        let block = builder.finish();
        // Offset-array position plus base_lg only.
        assert_eq!(block, vec![0, 0, 0, 0, FILTER_BASE_LG]);

        let reader = FilterBlockReader::new(policy(), block);
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(100_000, b"foo"));
    }

    #[test]
    fn test_single_window() {
        let mut builder = FilterBlockBuilder::new(policy());
        builder.start_block(100);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.start_block(200);
        builder.add_key(b"box");
        builder.start_block(300);
        builder.add_key(b"hello");

        let reader = FilterBlockReader::new(policy(), builder.finish());
        assert!(reader.key_may_match(100, b"foo"));
        assert!(reader.key_may_match(100, b"bar"));
        assert!(reader.key_may_match(100, b"box"));
        assert!(reader.key_may_match(100, b"hello"));
        assert!(!reader.key_may_match(100, b"missing"));
        assert!(!reader.key_may_match(100, b"other"));
    }

    #[test]
    fn test_multiple_windows() {
        let mut builder = FilterBlockBuilder::new(policy());

        builder.start_block(0);
        builder.add_key(b"foo");
        builder.start_block(2000);
        builder.add_key(b"bar");

        // Third window (4096..6143).
        builder.start_block(4100);
        builder.add_key(b"box");

        // Fifth window, leaving the fourth empty.
        builder.start_block(9000);
        builder.add_key(b"box");
        builder.add_key(b"hello");

        let reader = FilterBlockReader::new(policy(), builder.finish());

        // First window holds both keys from offsets 0 and 2000.
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(2000, b"bar"));
        assert!(!reader.key_may_match(0, b"box"));

        assert!(reader.key_may_match(4100, b"box"));
        assert!(!reader.key_may_match(4100, b"foo"));

        // The empty fourth window matches nothing.
        assert!(!reader.key_may_match(6500, b"foo"));
        assert!(!reader.key_may_match(6500, b"box"));

        assert!(reader.key_may_match(9000, b"box"));
        assert!(reader.key_may_match(9000, b"hello"));
        assert!(!reader.key_may_match(9000, b"foo"));
    }

    #[test]
    fn test_garbage_block_matches_everything() {
        let reader = FilterBlockReader::new(policy(), vec![1, 2, 3]);
        assert!(reader.key_may_match(0, b"anything"));
    }
}
