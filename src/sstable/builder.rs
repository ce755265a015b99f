//! Append-only table construction.
//!
//! Keys must be added in strictly increasing internal-key order. Each
//! index entry is deferred until the first key of the following block is
//! seen, so the separator can be shortened to sit between the two blocks.

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::config::{Compression, Options};
use crate::error::{Error, Result};
use crate::filter::BloomFilterPolicy;
use crate::keys::{find_short_successor, find_shortest_separator};
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::{block_crc, FILTER_KEY_PREFIX};

pub struct TableBuilder {
    file: BufWriter<File>,
    offset: u64,
    block_size: usize,
    restart_interval: usize,
    compression: Compression,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<(FilterBlockBuilder, &'static str)>,

    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,

    // Index entry for the last finished data block, written once the next
    // key (or the end of the table) provides the separator bound.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl TableBuilder {
    pub fn new(options: &Options, file: File) -> Self {
        let filter_block = options.filter_bits_per_key.map(|bits| {
            let policy = BloomFilterPolicy::new(bits);
            let name = policy.name();
            (FilterBlockBuilder::new(policy), name)
        });
        TableBuilder {
            file: BufWriter::new(file),
            offset: 0,
            block_size: options.block_size,
            restart_interval: options.block_restart_interval,
            compression: options.compression,
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            filter_block,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.closed);
        if self.num_entries > 0
            && crate::keys::compare_internal_keys(key, &self.last_key) != std::cmp::Ordering::Greater
        {
            return Err(Error::InvalidArgument(
                "keys added out of order".to_string(),
            ));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            let separator = find_shortest_separator(&self.last_key, key);
            self.index_block.add(&separator, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }

        if let Some((filter, _)) = self.filter_block.as_mut() {
            filter.add_key(crate::keys::extract_user_key(key));
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Closes the in-progress data block and starts a new one.
    pub fn flush(&mut self) -> Result<()> {
        debug_assert!(!self.closed);
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let contents = self.data_block.finish();
        self.pending_handle = self.write_block(&contents)?;
        self.data_block.reset();
        self.pending_index_entry = true;
        self.file.flush()?;

        if let Some((filter, _)) = self.filter_block.as_mut() {
            filter.start_block(self.offset);
        }
        Ok(())
    }

    fn write_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        // The only codec today is the identity one.
        let type_byte = self.compression.type_byte();
        self.write_raw_block(contents, type_byte)
    }

    fn write_raw_block(&mut self, contents: &[u8], type_byte: u8) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.file.write_all(contents)?;

        let mut trailer = Vec::with_capacity(super::BLOCK_TRAILER_SIZE);
        trailer.push(type_byte);
        crate::coding::put_fixed32(&mut trailer, block_crc(contents, type_byte));
        self.file.write_all(&trailer)?;

        self.offset += contents.len() as u64 + super::BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Writes the filter, metaindex, index, and footer. The table is
    /// complete once this returns; call `sync` before installing it.
    pub fn finish(&mut self) -> Result<u64> {
        self.flush()?;
        debug_assert!(!self.closed);
        self.closed = true;

        // Filter block, uncompressed.
        let mut filter_handle = None;
        if let Some((filter, name)) = self.filter_block.take() {
            let contents = filter.finish();
            filter_handle = Some((name, self.write_raw_block(&contents, 0)?));
        }

        // Metaindex: policy name to filter handle.
        let mut meta_block = BlockBuilder::new(self.restart_interval);
        if let Some((name, handle)) = filter_handle {
            let key = format!("{FILTER_KEY_PREFIX}{name}");
            meta_block.add(key.as_bytes(), &handle.encoded());
        }
        let metaindex_contents = meta_block.finish();
        let metaindex_handle = self.write_block(&metaindex_contents)?;

        // Index block, with the final separator past the last key.
        if self.pending_index_entry {
            let successor = find_short_successor(&self.last_key);
            self.index_block.add(&successor, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }
        let index_contents = self.index_block.finish();
        let index_handle = self.write_block(&index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.file.write_all(&footer.encode())?;
        self.offset += crate::sstable::footer::FOOTER_ENCODED_LENGTH as u64;

        self.file.flush()?;
        Ok(self.offset)
    }

    /// Forces the finished table to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the final file size after `finish`.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
