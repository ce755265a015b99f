//! Version deltas.
//!
//! A `VersionEdit` describes one transition of the table layout: files
//! added and removed per level plus metadata watermarks. Edits serialize
//! as a sequence of `varint(tag) ‖ payload` fields and are the records of
//! the MANIFEST log; replaying them from an empty version reconstructs
//! the layout.

use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::config::NUM_LEVELS;
use crate::error::{Error, Result};
use crate::keys::{InternalKey, SequenceNumber};
use crate::version::FileMetaData;

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files
            .push((level, FileMetaData::new(number, file_size, smallest, largest)));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some(name) = &self.comparator {
            put_varint32(&mut dst, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut dst, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            put_varint32(&mut dst, TAG_LOG_NUMBER);
            put_varint64(&mut dst, number);
        }
        if let Some(number) = self.prev_log_number {
            put_varint32(&mut dst, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut dst, number);
        }
        if let Some(number) = self.next_file_number {
            put_varint32(&mut dst, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut dst, number);
        }
        if let Some(seq) = self.last_sequence {
            put_varint32(&mut dst, TAG_LAST_SEQUENCE);
            put_varint64(&mut dst, seq);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut dst, TAG_COMPACT_POINTER);
            put_varint32(&mut dst, *level as u32);
            put_length_prefixed_slice(&mut dst, key.as_bytes());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut dst, TAG_DELETED_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut dst, TAG_NEW_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, file.number);
            put_varint64(&mut dst, file.file_size);
            put_length_prefixed_slice(&mut dst, file.smallest.as_bytes());
            put_length_prefixed_slice(&mut dst, file.largest.as_bytes());
        }
        dst
    }

    pub fn decode(mut src: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();

        fn read_level(src: &mut &[u8]) -> Result<usize> {
            let (level, n) = get_varint32(*src)?;
            *src = &(*src)[n..];
            if level as usize >= NUM_LEVELS {
                return Err(Error::Corruption(format!(
                    "version edit level {level} out of range"
                )));
            }
            Ok(level as usize)
        }

        fn read_u64(src: &mut &[u8]) -> Result<u64> {
            let (v, n) = get_varint64(*src)?;
            *src = &(*src)[n..];
            Ok(v)
        }

        fn read_key(src: &mut &[u8]) -> Result<InternalKey> {
            let (bytes, n) = get_length_prefixed_slice(*src)?;
            let key = InternalKey::decode_from(bytes)?;
            *src = &(*src)[n..];
            Ok(key)
        }

        while !src.is_empty() {
            let (tag, n) = get_varint32(src)?;
            src = &src[n..];
            match tag {
                TAG_COMPARATOR => {
                    let (bytes, n) = get_length_prefixed_slice(src)?;
                    let name = String::from_utf8(bytes.to_vec())
                        .map_err(|_| Error::Corruption("comparator name not utf8".to_string()))?;
                    src = &src[n..];
                    edit.comparator = Some(name);
                }
                TAG_LOG_NUMBER => edit.log_number = Some(read_u64(&mut src)?),
                TAG_PREV_LOG_NUMBER => edit.prev_log_number = Some(read_u64(&mut src)?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(read_u64(&mut src)?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(read_u64(&mut src)?),
                TAG_COMPACT_POINTER => {
                    let level = read_level(&mut src)?;
                    let key = read_key(&mut src)?;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = read_level(&mut src)?;
                    let number = read_u64(&mut src)?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let level = read_level(&mut src)?;
                    let number = read_u64(&mut src)?;
                    let file_size = read_u64(&mut src)?;
                    let smallest = read_key(&mut src)?;
                    let largest = read_key(&mut src)?;
                    edit.new_files
                        .push((level, FileMetaData::new(number, file_size, smallest, largest)));
                }
                _ => {
                    return Err(Error::Corruption(format!(
                        "unknown version edit tag {tag}"
                    )))
                }
            }
        }
        Ok(edit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ValueType;

    fn key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(user_key, seq, ValueType::Value)
    }

    #[test]
    fn test_empty_roundtrip() {
        let edit = VersionEdit::new();
        assert_eq!(VersionEdit::decode(&edit.encode()).unwrap(), edit);
    }

    #[test]
    fn test_full_roundtrip() {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name("stratadb.BytewiseComparator");
        edit.set_log_number(12);
        edit.set_prev_log_number(0);
        edit.set_next_file_number(99);
        edit.set_last_sequence(1 << 50);
        edit.set_compact_pointer(2, key(b"pointer", 7));
        edit.delete_file(1, 5);
        edit.delete_file(4, 33);
        edit.add_file(2, 40, 123456, key(b"aaa", 9), key(b"zzz", 3));

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
        assert_eq!(decoded.new_files[0].1.number, 40);
        assert_eq!(decoded.new_files[0].1.smallest.user_key(), b"aaa");
    }

    #[test]
    fn test_repeated_roundtrip_is_stable() {
        let mut edit = VersionEdit::new();
        edit.set_log_number(3);
        edit.add_file(0, 1, 10, key(b"a", 2), key(b"b", 1));
        let mut bytes = edit.encode();
        for _ in 0..4 {
            let decoded = VersionEdit::decode(&bytes).unwrap();
            let reencoded = decoded.encode();
            assert_eq!(reencoded, bytes);
            bytes = reencoded;
        }
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let mut bytes = Vec::new();
        put_varint32(&mut bytes, 8);
        put_varint64(&mut bytes, 42);
        assert!(matches!(
            VersionEdit::decode(&bytes),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_out_of_range_level_rejected() {
        let mut bytes = Vec::new();
        put_varint32(&mut bytes, TAG_DELETED_FILE);
        put_varint32(&mut bytes, NUM_LEVELS as u32);
        put_varint64(&mut bytes, 1);
        assert!(matches!(
            VersionEdit::decode(&bytes),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_truncated_edit_rejected() {
        let mut edit = VersionEdit::new();
        edit.add_file(1, 2, 3, key(b"k", 1), key(b"l", 1));
        let bytes = edit.encode();
        assert!(VersionEdit::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
