use std::fs::File;
use std::io::{BufWriter, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use super::{record_crc, RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::error::Result;

/// Appends framed records to a log file.
pub struct Writer {
    dest: BufWriter<File>,
    // Write position within the current 32 KiB block.
    block_offset: usize,
}

impl Writer {
    pub fn new(file: File) -> Self {
        Self::with_offset(file, 0)
    }

    /// Resumes writing a log whose tail sits at `initial_offset` bytes,
    /// as when reusing a WAL across opens.
    pub fn with_offset(file: File, initial_offset: u64) -> Self {
        Writer {
            dest: BufWriter::new(file),
            block_offset: (initial_offset as usize) % BLOCK_SIZE,
        }
    }

    /// Appends one logical record, fragmenting across blocks as needed.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Too small for a header; zero-fill and open a new block.
                if leftover > 0 {
                    self.dest.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;

            if left.is_empty() && end {
                break;
            }
        }
        Ok(())
    }

    fn emit_physical_record(&mut self, t: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= u16::MAX as usize);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        self.dest.write_u32::<LittleEndian>(record_crc(t, payload))?;
        self.dest.write_u16::<LittleEndian>(payload.len() as u16)?;
        self.dest.write_u8(t as u8)?;
        self.dest.write_all(payload)?;

        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Pushes buffered bytes to the OS without forcing them to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs. A record is durable once this returns.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.flush()?;
        self.dest.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::reader::Reader;
    use super::*;
    use tempfile::tempdir;

    fn roundtrip(records: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = Writer::new(File::create(&path).unwrap());
        for record in records {
            writer.add_record(record).unwrap();
        }
        writer.sync().unwrap();

        let mut reader = Reader::new(File::open(&path).unwrap());
        let mut out = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_roundtrip_small_records() {
        let records = vec![b"foo".to_vec(), b"bar".to_vec(), Vec::new(), b"baz".to_vec()];
        assert_eq!(roundtrip(&records), records);
    }

    #[test]
    fn test_roundtrip_block_straddling() {
        // Sizes chosen to land fragments on every boundary case.
        let records = vec![
            vec![b'a'; BLOCK_SIZE - HEADER_SIZE],     // exactly one block
            vec![b'b'; BLOCK_SIZE],                   // First + Last
            vec![b'c'; 3 * BLOCK_SIZE + 17],          // First + Middles + Last
            b"tail".to_vec(),
        ];
        assert_eq!(roundtrip(&records), records);
    }

    #[test]
    fn test_trailer_padding() {
        // Leave fewer than HEADER_SIZE bytes in the first block, forcing
        // the writer to pad and the reader to skip.
        let first_len = BLOCK_SIZE - HEADER_SIZE - HEADER_SIZE + 3;
        let records = vec![vec![b'x'; first_len], b"second".to_vec()];
        assert_eq!(roundtrip(&records), records);
    }
}
