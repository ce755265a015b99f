//! An embedded, ordered, crash-safe key-value storage engine on a
//! log-structured merge tree.
//!
//! Writes land in a write-ahead log and an in-memory skip list, then
//! flow down through immutable sorted table files in seven levels,
//! merged by background compaction. Reads check the memtables first,
//! then the tables of the current version, newest data shadowing oldest.
//!
//! ```no_run
//! use stratadb::{Options, DB};
//!
//! # fn main() -> stratadb::Result<()> {
//! let db = DB::open("./data", Options::default().create_if_missing(true))?;
//! db.put(b"key", b"value")?;
//! assert_eq!(db.get(b"key")?, Some(b"value".to_vec()));
//! db.delete(b"key")?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod coding;
pub mod compaction;
pub mod config;
pub mod db;
pub mod error;
pub mod filenames;
pub mod filter;
pub mod flock;
pub mod iterator;
pub mod keys;
pub mod memtable;
pub mod snapshot;
pub mod sstable;
pub mod table_cache;
pub mod version;
pub mod wal;

pub use batch::WriteBatch;
pub use config::{Compression, Options};
pub use db::{DbIterator, DB};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
