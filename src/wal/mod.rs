//! Write-ahead log framing.
//!
//! A log file is a sequence of 32 KiB physical blocks. Each record inside
//! a block is framed as:
//!
//! ```text
//! +-----------+------------+---------+---------+
//! | crc32c:u32| length:u16 | type:u8 | payload |
//! +-----------+------------+---------+---------+
//! | 4 bytes LE| 2 bytes LE | 1 byte  | var len |
//! +-----------+------------+---------+---------+
//! ```
//!
//! The checksum covers `type ‖ payload`. A logical record that does not
//! fit the current block is split into `First`/`Middle`/`Last` fragments;
//! records that fit emit a single `Full` fragment. Trailing block space
//! smaller than the 7-byte header is zero-filled and skipped by readers.
//!
//! The same framing carries both user write batches (`NNNNNN.log`) and
//! version edits (`MANIFEST-NNNNNN`).

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

use crc::{Crc, CRC_32_ISCSI};

/// Size of one physical log block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Bytes of framing before each fragment payload.
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// CRC32C, shared by log records and SSTable block trailers.
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

/// Checksum of a fragment: the type byte extended with the payload.
pub(crate) fn record_crc(t: RecordType, payload: &[u8]) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(&[t as u8]);
    digest.update(payload);
    digest.finalize()
}
