use crate::coding::{decode_fixed64, get_varint64, put_fixed64, put_varint64};
use crate::error::{Error, Result};

/// Trailing magic that identifies a table file. Fixed forever.
pub const TABLE_MAGIC: u64 = 0xdb4775248b80fb57;

/// Maximum encoded length of a handle: two 10-byte varints.
pub const MAX_HANDLE_ENCODED_LENGTH: usize = 10 + 10;

/// Footer: both handles padded to fixed length, then the magic.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * MAX_HANDLE_ENCODED_LENGTH + 8;

/// Location of a block within the file, excluding its trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HANDLE_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle from the front of `src`, returning it and the
    /// bytes consumed.
    pub fn decode_from(src: &[u8]) -> Result<(Self, usize)> {
        let (offset, n) = get_varint64(src)?;
        let (size, m) = get_varint64(&src[n..])?;
        Ok((BlockHandle { offset, size }, n + m))
    }
}

/// The fixed-size table footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_HANDLE_ENCODED_LENGTH, 0);
        put_fixed64(&mut buf, TABLE_MAGIC);
        debug_assert_eq!(buf.len(), FOOTER_ENCODED_LENGTH);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("footer too short".to_string()));
        }
        let magic = decode_fixed64(&src[FOOTER_ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad table magic {magic:#018x}"
            )));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(src)?;
        let (index_handle, _) = BlockHandle::decode_from(&src[n..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        for (offset, size) in [(0u64, 0u64), (1, 2), (1 << 30, 1 << 20), (u64::MAX, 7)] {
            let handle = BlockHandle::new(offset, size);
            let encoded = handle.encoded();
            let (decoded, consumed) = BlockHandle::decode_from(&encoded).unwrap();
            assert_eq!(decoded, handle);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let footer = Footer {
            metaindex_handle: BlockHandle::new(4096, 120),
            index_handle: BlockHandle::new(4216 + 5, 900),
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_ENCODED_LENGTH);
        assert_eq!(Footer::decode(&encoded).unwrap(), footer);
    }

    #[test]
    fn test_footer_rejects_bad_magic() {
        let footer = Footer {
            metaindex_handle: BlockHandle::new(1, 2),
            index_handle: BlockHandle::new(3, 4),
        };
        let mut encoded = footer.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(matches!(Footer::decode(&encoded), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_footer_rejects_truncation() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }
}
