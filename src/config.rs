/// Block compression applied when an SSTable data block is flushed.
///
/// Only the identity codec ships today; the variant exists so the block
/// trailer's type byte has a stable meaning on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
}

impl Compression {
    pub fn type_byte(self) -> u8 {
        match self {
            Compression::None => 0,
        }
    }

    pub fn from_type_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Compression::None),
            _ => None,
        }
    }
}

/// Configuration for a database instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database if `CURRENT` is absent (default: false)
    pub create_if_missing: bool,

    /// Fail `open` if `CURRENT` is present (default: false)
    pub error_if_exists: bool,

    /// Memtable flush threshold in bytes (default: 4 MiB)
    pub write_buffer_size: usize,

    /// Target size for SSTable files (default: 2 MiB)
    pub max_file_size: u64,

    /// Target uncompressed size for data blocks (default: 4 KiB)
    pub block_size: usize,

    /// Entries between restart points in a data block (default: 16)
    pub block_restart_interval: usize,

    /// Block compression codec (default: none)
    pub compression: Compression,

    /// Bloom filter bits per key; `None` disables filter blocks (default: 10)
    pub filter_bits_per_key: Option<usize>,

    /// Verify block checksums on every read (default: false)
    pub paranoid_checks: bool,

    /// Forcibly take over a LOCK file older than this many milliseconds;
    /// 0 disables takeover (default: 0)
    pub lockfile_stale: u64,

    /// Reopen the last WAL on recovery instead of rotating (default: false)
    pub reuse_logs: bool,

    /// Capacity of the decoded-block cache in bytes (default: 8 MiB)
    pub block_cache_capacity: usize,

    /// Number of open SSTable handles kept by the table cache (default: 990)
    pub table_cache_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_file_size: 2 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: Compression::None,
            filter_bits_per_key: Some(10),
            paranoid_checks: false,
            lockfile_stale: 0,
            reuse_logs: false,
            block_cache_capacity: 8 * 1024 * 1024,
            table_cache_capacity: 990,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn error_if_exists(mut self, error: bool) -> Self {
        self.error_if_exists = error;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    pub fn filter_bits_per_key(mut self, bits: Option<usize>) -> Self {
        self.filter_bits_per_key = bits;
        self
    }

    pub fn paranoid_checks(mut self, paranoid: bool) -> Self {
        self.paranoid_checks = paranoid;
        self
    }

    pub fn lockfile_stale(mut self, millis: u64) -> Self {
        self.lockfile_stale = millis;
        self
    }

    pub fn reuse_logs(mut self, reuse: bool) -> Self {
        self.reuse_logs = reuse;
        self
    }

    pub fn block_cache_capacity(mut self, bytes: usize) -> Self {
        self.block_cache_capacity = bytes;
        self
    }

    pub fn table_cache_capacity(mut self, entries: usize) -> Self {
        self.table_cache_capacity = entries;
        self
    }
}

/// Number of levels in the tree.
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers a compaction.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which commits are delayed by 1ms each.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which commits stall until compaction catches up.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Highest level a fresh memtable flush may be pushed to when it does not
/// overlap anything below.
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Bytes of iterated data between read samples charged to seek counters.
pub const READ_BYTES_PERIOD: u64 = 1024 * 1024;

impl Options {
    /// Upper bound on total bytes pulled into one compaction after input
    /// expansion.
    pub fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.max_file_size
    }

    /// Grandparent overlap at which a compaction output file is cut over.
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.max_file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert!(!options.create_if_missing);
        assert_eq!(options.write_buffer_size, 4 * 1024 * 1024);
        assert_eq!(options.max_file_size, 2 * 1024 * 1024);
        assert_eq!(options.block_size, 4 * 1024);
        assert_eq!(options.block_restart_interval, 16);
        assert_eq!(options.filter_bits_per_key, Some(10));
        assert!(!options.reuse_logs);
    }

    #[test]
    fn test_builder() {
        let options = Options::new()
            .create_if_missing(true)
            .write_buffer_size(64 * 1024)
            .filter_bits_per_key(None)
            .paranoid_checks(true);

        assert!(options.create_if_missing);
        assert_eq!(options.write_buffer_size, 64 * 1024);
        assert_eq!(options.filter_bits_per_key, None);
        assert!(options.paranoid_checks);
    }

    #[test]
    fn test_derived_limits() {
        let options = Options::default();
        assert_eq!(
            options.expanded_compaction_byte_size_limit(),
            25 * options.max_file_size
        );
        assert_eq!(
            options.max_grandparent_overlap_bytes(),
            10 * options.max_file_size
        );
    }
}
