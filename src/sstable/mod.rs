//! Immutable sorted tables.
//!
//! An SSTable file is laid out as:
//!
//! ```text
//! +---------------------+
//! | data block 0        |  prefix-restart records
//! | ...                 |
//! | data block N        |
//! +---------------------+
//! | filter block        |  bloom filters per 2 KiB of data offsets
//! +---------------------+
//! | metaindex block     |  "filter.<policy>" -> filter handle
//! +---------------------+
//! | index block         |  separator key -> data block handle
//! +---------------------+
//! | footer (48 bytes)   |  metaindex + index handles, magic
//! +---------------------+
//! ```
//!
//! Every block is followed by a 5-byte trailer: a compression type byte
//! and a CRC32C over the block contents plus that byte.

pub mod block;
pub mod builder;
pub mod filter_block;
pub mod footer;
pub mod table;

pub use builder::TableBuilder;
pub use table::Table;

/// `type(1) ‖ crc32c(4)` after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Key prefix of filter entries in the metaindex block.
pub const FILTER_KEY_PREFIX: &str = "filter.";

use crate::wal::CRC32C;

/// Trailer checksum: block contents extended with the type byte.
pub(crate) fn block_crc(contents: &[u8], type_byte: u8) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(contents);
    digest.update(&[type_byte]);
    digest.finalize()
}
