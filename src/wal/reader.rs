use std::fs::File;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use super::{record_crc, RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::error::{Error, Result};

enum Physical {
    Fragment(RecordType, Vec<u8>),
    Eof,
}

/// Reassembles logical records from a framed log file.
///
/// A damaged or half-written frame in the final block of the file is
/// treated as truncation: reading stops cleanly at the last complete
/// record. The same damage earlier in the file is corruption.
pub struct Reader {
    file: File,
    buffer: Vec<u8>,
    buffer_len: usize,
    buffer_offset: usize,
    eof: bool,
}

impl Reader {
    pub fn new(file: File) -> Self {
        Reader {
            file,
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_len: 0,
            buffer_offset: 0,
            eof: false,
        }
    }

    /// Returns the next logical record, or `None` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch: Option<Vec<u8>> = None;

        loop {
            match self.read_physical_record()? {
                Physical::Fragment(RecordType::Full, data) => {
                    if scratch.is_some() {
                        return Err(Error::Corruption(
                            "full record inside fragmented record".to_string(),
                        ));
                    }
                    return Ok(Some(data));
                }
                Physical::Fragment(RecordType::First, data) => {
                    if scratch.is_some() {
                        return Err(Error::Corruption(
                            "two record starts without an end".to_string(),
                        ));
                    }
                    scratch = Some(data);
                }
                Physical::Fragment(RecordType::Middle, data) => match scratch.as_mut() {
                    Some(buf) => buf.extend_from_slice(&data),
                    None => {
                        return Err(Error::Corruption(
                            "middle fragment without a start".to_string(),
                        ))
                    }
                },
                Physical::Fragment(RecordType::Last, data) => match scratch.take() {
                    Some(mut buf) => {
                        buf.extend_from_slice(&data);
                        return Ok(Some(buf));
                    }
                    None => {
                        return Err(Error::Corruption(
                            "last fragment without a start".to_string(),
                        ))
                    }
                },
                // A fragment chain cut off by the end of the file is a
                // torn write from a crash; drop the partial record.
                Physical::Eof => return Ok(None),
            }
        }
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.buffer_len - self.buffer_offset < HEADER_SIZE {
                if self.eof {
                    // Leftover bytes smaller than a header at the end of
                    // the file are an implicit truncation.
                    return Ok(Physical::Eof);
                }
                self.fill_buffer()?;
                if self.buffer_len == 0 {
                    self.eof = true;
                    return Ok(Physical::Eof);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];
            let expected_crc = LittleEndian::read_u32(&header[0..4]);
            let length = LittleEndian::read_u16(&header[4..6]) as usize;
            let type_byte = header[6];

            if expected_crc == 0 && length == 0 && type_byte == 0 {
                // Zero-filled region: either block-trailer padding or a
                // preallocated tail. Nothing further in this block.
                self.buffer_offset = self.buffer_len;
                continue;
            }

            if self.buffer_offset + HEADER_SIZE + length > self.buffer_len {
                if self.eof {
                    return Ok(Physical::Eof);
                }
                return Err(Error::Corruption("record length past block end".to_string()));
            }

            let record_type = match RecordType::from_u8(type_byte) {
                Some(t) => t,
                None => {
                    if self.eof {
                        return Ok(Physical::Eof);
                    }
                    return Err(Error::Corruption(format!(
                        "unknown record type {type_byte}"
                    )));
                }
            };

            let payload_start = self.buffer_offset + HEADER_SIZE;
            let payload = &self.buffer[payload_start..payload_start + length];
            if record_crc(record_type, payload) != expected_crc {
                if self.eof {
                    return Ok(Physical::Eof);
                }
                return Err(Error::Corruption("record checksum mismatch".to_string()));
            }

            let data = payload.to_vec();
            self.buffer_offset = payload_start + length;
            return Ok(Physical::Fragment(record_type, data));
        }
    }

    fn fill_buffer(&mut self) -> Result<()> {
        self.buffer_offset = 0;
        self.buffer_len = 0;
        while self.buffer_len < BLOCK_SIZE {
            let n = self.file.read(&mut self.buffer[self.buffer_len..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buffer_len += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::writer::Writer;
    use super::*;
    use std::io::{Seek, SeekFrom, Write as IoWrite};
    use tempfile::tempdir;

    fn write_log(path: &std::path::Path, records: &[&[u8]]) {
        let mut writer = Writer::new(File::create(path).unwrap());
        for record in records {
            writer.add_record(record).unwrap();
        }
        writer.sync().unwrap();
    }

    fn read_all(path: &std::path::Path) -> Result<Vec<Vec<u8>>> {
        let mut reader = Reader::new(File::open(path).unwrap());
        let mut out = Vec::new();
        while let Some(record) = reader.read_record()? {
            out.push(record);
        }
        Ok(out)
    }

    #[test]
    fn test_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.log");
        File::create(&path).unwrap();
        assert!(read_all(&path).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_tail_is_clean_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.log");
        write_log(&path, &[b"alpha", b"beta", b"gamma"]);

        // Chop the file mid-way through the last record's payload.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn test_truncated_fragmented_record_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frag.log");
        let big = vec![b'z'; 2 * BLOCK_SIZE];
        write_log(&path, &[b"keep", &big]);

        // Drop the final fragment entirely.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - (BLOCK_SIZE as u64 / 2)).unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records, vec![b"keep".to_vec()]);
    }

    #[test]
    fn test_mid_file_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        // Two blocks' worth of records so damage sits before the tail.
        let filler = vec![b'f'; BLOCK_SIZE];
        write_log(&path, &[b"first", &filler, b"last"]);

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + 1)).unwrap();
        file.write_all(b"XXXX").unwrap();
        file.sync_all().unwrap();

        let mut reader = Reader::new(File::open(&path).unwrap());
        let result = (|| -> Result<Vec<Vec<u8>>> {
            let mut out = Vec::new();
            while let Some(record) = reader.read_record()? {
                out.push(record);
            }
            Ok(out)
        })();
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_zero_padding_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("padded.log");
        // First record leaves < HEADER_SIZE bytes of trailer space.
        let first = vec![b'p'; BLOCK_SIZE - HEADER_SIZE - 4];
        write_log(&path, &[&first, b"after-pad"]);

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], b"after-pad");
    }
}
