//! Cache of open table handles.
//!
//! Keyed by file number; a miss opens the `.ldb` file and parses its
//! footer, index, and filter. Eviction closes the file once the last
//! reader drops its reference. All opened tables share one block cache.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::config::Options;
use crate::error::Result;
use crate::filenames::table_file_name;
use crate::iterator::InternalIterator;
use crate::sstable::table::BlockCache;
use crate::sstable::Table;

pub struct TableCache {
    dbpath: PathBuf,
    options: Options,
    cache: ShardedCache<u64, Arc<Table>>,
    block_cache: Arc<BlockCache>,
}

impl TableCache {
    pub fn new(dbpath: PathBuf, options: Options) -> Self {
        let cache = ShardedCache::new(options.table_cache_capacity);
        let block_cache = Arc::new(BlockCache::new(options.block_cache_capacity));
        TableCache {
            dbpath,
            options,
            cache,
            block_cache,
        }
    }

    /// Returns the open table for `file_number`, opening it on a miss.
    pub fn get_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        if let Some(table) = self.cache.get(&file_number) {
            return Ok(table);
        }
        let path = table_file_name(&self.dbpath, file_number);
        let file = File::open(&path)?;
        let table = Arc::new(Table::open(
            &self.options,
            file,
            file_size,
            Some(Arc::clone(&self.block_cache)),
        )?);
        self.cache.insert(file_number, Arc::clone(&table), 1);
        Ok(table)
    }

    /// Point lookup through the table, see [`Table::get`].
    pub fn get(
        &self,
        file_number: u64,
        file_size: u64,
        target: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.get_table(file_number, file_size)?.get(target)
    }

    pub fn iter(&self, file_number: u64, file_size: u64) -> Result<Box<dyn InternalIterator>> {
        Ok(self.get_table(file_number, file_size)?.iter())
    }

    /// Drops the cached handle, typically after the file is deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&file_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{append_internal_key, ValueType};
    use crate::sstable::TableBuilder;
    use tempfile::tempdir;

    fn ikey(user_key: &[u8], seq: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, user_key, seq, ValueType::Value);
        buf
    }

    fn write_table(dbpath: &std::path::Path, number: u64, keys: &[&[u8]]) -> u64 {
        let options = Options::default();
        let path = table_file_name(dbpath, number);
        let mut builder = TableBuilder::new(&options, File::create(path).unwrap());
        for key in keys {
            builder.add(&ikey(key, 1), b"value").unwrap();
        }
        let size = builder.finish().unwrap();
        builder.sync().unwrap();
        size
    }

    #[test]
    fn test_miss_opens_and_hit_reuses() {
        let dir = tempdir().unwrap();
        let size = write_table(dir.path(), 5, &[b"a", b"b"]);

        let cache = TableCache::new(dir.path().to_path_buf(), Options::default());
        let first = cache.get_table(5, size).unwrap();
        let second = cache.get_table(5, size).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let found = cache.get(5, size, &ikey(b"a", 1)).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_evict_reopens() {
        let dir = tempdir().unwrap();
        let size = write_table(dir.path(), 9, &[b"k"]);

        let cache = TableCache::new(dir.path().to_path_buf(), Options::default());
        let first = cache.get_table(9, size).unwrap();
        cache.evict(9);
        let second = cache.get_table(9, size).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempdir().unwrap();
        let cache = TableCache::new(dir.path().to_path_buf(), Options::default());
        assert!(cache.get_table(42, 1024).is_err());
    }
}
