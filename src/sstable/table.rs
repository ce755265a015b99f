//! Table reader.
//!
//! Opening a table validates the footer, then loads the index block, the
//! metaindex, and the filter for the configured policy; those stay in
//! memory with the handle. Data blocks are fetched on demand through the
//! shared block cache, keyed by the table's cache id and block offset.

use std::fs::File;
use std::sync::Arc;

use crate::cache::{new_cache_id, ShardedCache};
use crate::coding::decode_fixed32;
use crate::config::{Compression, Options};
use crate::error::{Error, Result};
use crate::filter::BloomFilterPolicy;
use crate::iterator::{InternalIterator, TwoLevelIterator};
use crate::keys::extract_user_key;
use crate::sstable::block::Block;
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::footer::{BlockHandle, Footer, FOOTER_ENCODED_LENGTH};
use crate::sstable::{block_crc, BLOCK_TRAILER_SIZE, FILTER_KEY_PREFIX};

/// Identifies a decoded block in the shared block cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCacheKey {
    pub cache_id: u64,
    pub offset: u64,
}

pub type BlockCache = ShardedCache<BlockCacheKey, Arc<Block>>;

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read",
            ));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// An open, immutable table file.
pub struct Table {
    file: File,
    cache_id: u64,
    paranoid_checks: bool,
    block_cache: Option<Arc<BlockCache>>,
    index_block: Arc<Block>,
    filter: Option<FilterBlockReader>,
    metaindex_offset: u64,
}

impl Table {
    pub fn open(
        options: &Options,
        file: File,
        size: u64,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Table> {
        if size < FOOTER_ENCODED_LENGTH as u64 {
            return Err(Error::Corruption("file too short for footer".to_string()));
        }
        let mut footer_bytes = [0u8; FOOTER_ENCODED_LENGTH];
        read_exact_at(&file, &mut footer_bytes, size - FOOTER_ENCODED_LENGTH as u64)?;
        let footer = Footer::decode(&footer_bytes)?;

        // The footer handles are load-bearing; always verify them.
        let index_contents = read_block_contents(&file, &footer.index_handle, true)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let filter = match options.filter_bits_per_key {
            Some(bits) => {
                Self::read_filter(&file, &footer, BloomFilterPolicy::new(bits))?
            }
            None => None,
        };

        Ok(Table {
            file,
            cache_id: new_cache_id(),
            paranoid_checks: options.paranoid_checks,
            block_cache,
            index_block,
            filter,
            metaindex_offset: footer.metaindex_handle.offset,
        })
    }

    fn read_filter(
        file: &File,
        footer: &Footer,
        policy: BloomFilterPolicy,
    ) -> Result<Option<FilterBlockReader>> {
        let metaindex_contents = read_block_contents(file, &footer.metaindex_handle, true)?;
        let metaindex = Arc::new(Block::new(metaindex_contents)?);
        let wanted = format!("{FILTER_KEY_PREFIX}{}", policy.name());

        // Metaindex keys are plain strings; walk it linearly.
        let mut iter = metaindex.iter();
        iter.seek_to_first();
        while iter.valid() {
            if iter.key() == wanted.as_bytes() {
                let (handle, _) = BlockHandle::decode_from(iter.value())?;
                let contents = read_block_contents(file, &handle, true)?;
                return Ok(Some(FilterBlockReader::new(policy, contents)));
            }
            iter.next();
        }
        Ok(None)
    }

    fn read_data_block(&self, handle: &BlockHandle) -> Result<Arc<Block>> {
        if let Some(cache) = &self.block_cache {
            let key = BlockCacheKey {
                cache_id: self.cache_id,
                offset: handle.offset,
            };
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
            let contents = read_block_contents(&self.file, handle, self.paranoid_checks)?;
            let block = Arc::new(Block::new(contents)?);
            cache.insert(key, Arc::clone(&block), block.size());
            Ok(block)
        } else {
            let contents = read_block_contents(&self.file, handle, self.paranoid_checks)?;
            Ok(Arc::new(Block::new(contents)?))
        }
    }

    /// Seeks the first entry with internal key >= `target`, returning its
    /// key and value. The caller decides whether the user key matches.
    pub fn get(&self, target: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = Arc::clone(&self.index_block).iter();
        index_iter.seek(target);
        if !index_iter.valid() {
            return Ok(None);
        }

        let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
        if let Some(filter) = &self.filter {
            if !filter.key_may_match(handle.offset, extract_user_key(target)) {
                return Ok(None);
            }
        }

        let block = self.read_data_block(&handle)?;
        let mut block_iter = block.iter();
        block_iter.seek(target);
        if block_iter.valid() {
            return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
        }
        block_iter.status()?;
        Ok(None)
    }

    /// Two-level cursor over every entry.
    pub fn iter(self: Arc<Self>) -> Box<dyn InternalIterator> {
        let index_iter = Arc::clone(&self.index_block).iter();
        let factory = Box::new(move |handle_bytes: &[u8]| {
            let (handle, _) = BlockHandle::decode_from(handle_bytes)?;
            let block = self.read_data_block(&handle)?;
            Ok(Box::new(block.iter()) as Box<dyn InternalIterator>)
        });
        Box::new(TwoLevelIterator::new(Box::new(index_iter), factory))
    }

    /// File offset at which `target`'s block begins, or the end of the
    /// data region for keys past the last block.
    pub fn approximate_offset_of(&self, target: &[u8]) -> u64 {
        let mut index_iter = Arc::clone(&self.index_block).iter();
        index_iter.seek(target);
        if index_iter.valid() {
            if let Ok((handle, _)) = BlockHandle::decode_from(index_iter.value()) {
                return handle.offset;
            }
        }
        self.metaindex_offset
    }
}

/// Reads one block's contents, checking the trailer checksum on request.
fn read_block_contents(file: &File, handle: &BlockHandle, verify: bool) -> Result<Vec<u8>> {
    let total = handle.size as usize + BLOCK_TRAILER_SIZE;
    let mut buf = vec![0u8; total];
    read_exact_at(file, &mut buf, handle.offset)?;

    let contents_len = handle.size as usize;
    let type_byte = buf[contents_len];
    if verify {
        let expected = decode_fixed32(&buf[contents_len + 1..]);
        if block_crc(&buf[..contents_len], type_byte) != expected {
            return Err(Error::Corruption("block checksum mismatch".to_string()));
        }
    }
    match Compression::from_type_byte(type_byte) {
        Some(Compression::None) => {
            buf.truncate(contents_len);
            Ok(buf)
        }
        None => Err(Error::NotSupported(format!(
            "unknown block compression {type_byte}"
        ))),
    }
}
