use anyhow::{bail, Result};
use integer_encoding::VarInt;

use crate::byte_util::to_u64_le;
use crate::errors::DBError;

pub mod block;
pub mod filter;
pub mod write;


/// 1-byte compression tag plus a 4-byte masked CRC32C, appended after every
/// block's contents.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Little-endian magic at the very end of the file. Identifies the format;
/// readers locate the fixed-length footer by seeking the file tail.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

pub(crate) const FILTER_BLOCK_PREFIX: &str = "filter.";
pub(crate) const STATS_BLOCK_KEY: &str = "rocksdb.stats";

/// Keys of the stats block. Written in bytewise order.
pub(crate) mod stats {
    pub const DATA_SIZE: &str = "rocksdb.data.size";
    pub const INDEX_SIZE: &str = "rocksdb.index.size";
    pub const NUM_DATA_BLOCKS: &str = "rocksdb.num.data.blocks";
    pub const NUM_ENTRIES: &str = "rocksdb.num.entries";
    pub const RAW_KEY_SIZE: &str = "rocksdb.raw.key.size";
    pub const RAW_VALUE_SIZE: &str = "rocksdb.raw.value.size";
}

/// Points at a block body within the file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    offset: u64,
    size: u64,
}

impl BlockHandle {
    /// Two varint64s, 10 bytes each at worst.
    pub const MAX_ENCODED_LENGTH: usize = 20;

    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.offset.encode_var_vec());
        dst.extend_from_slice(&self.size.encode_var_vec());
    }

    /// Decodes a handle, returning it with the number of bytes consumed.
    pub fn decode_from(src: &[u8]) -> Result<(Self, usize)> {
        let (offset, n_offset) = match u64::decode_var(src) {
            Some(v) => v,
            None => bail!(DBError::corruption("bad block handle")),
        };
        let (size, n_size) = match u64::decode_var(&src[n_offset..]) {
            Some(v) => v,
            None => bail!(DBError::corruption("bad block handle")),
        };
        Ok((Self { offset, size }, n_offset + n_size))
    }
}

/// Fixed-length tail of the file: the metaindex and index handles, zero
/// padded to their combined maximum encoded length, then the magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    metaindex_handle: BlockHandle,
    index_handle: BlockHandle,
}

impl Footer {
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    pub fn new(metaindex_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self {
            metaindex_handle,
            index_handle,
        }
    }

    pub fn metaindex_handle(&self) -> BlockHandle {
        self.metaindex_handle
    }

    pub fn index_handle(&self) -> BlockHandle {
        self.index_handle
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(start + 2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        dst.extend_from_slice(&TABLE_MAGIC_NUMBER.to_le_bytes());
        debug_assert_eq!(dst.len() - start, Self::ENCODED_LENGTH);
    }

    pub fn decode_from(src: &[u8]) -> Result<Self> {
        if src.len() < Self::ENCODED_LENGTH {
            bail!(DBError::corruption("footer too short"));
        }
        let magic = to_u64_le(&src[src.len() - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            bail!(DBError::corruption("bad table magic number"));
        }
        let handles = &src[src.len() - Self::ENCODED_LENGTH..src.len() - 8];
        let (metaindex_handle, n) = BlockHandle::decode_from(handles)?;
        let (index_handle, _) = BlockHandle::decode_from(&handles[n..])?;
        Ok(Self {
            metaindex_handle,
            index_handle,
        })
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn test_block_handle_round_trip() {
        let handle = BlockHandle::new(1 << 40, 4096 + 17);
        let mut encoded = Vec::new();
        handle.encode_to(&mut encoded);
        assert!(encoded.len() <= BlockHandle::MAX_ENCODED_LENGTH);
        let (decoded, consumed) = BlockHandle::decode_from(&encoded).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_footer_round_trip() {
        let footer = Footer::new(BlockHandle::new(9000, 321), BlockHandle::new(9326, 7788));
        let mut encoded = Vec::new();
        footer.encode_to(&mut encoded);
        assert_eq!(encoded.len(), Footer::ENCODED_LENGTH);
        assert_eq!(Footer::decode_from(&encoded).unwrap(), footer);
    }

    #[test]
    fn test_footer_bad_magic() {
        let footer = Footer::new(BlockHandle::new(0, 1), BlockHandle::new(6, 2));
        let mut encoded = Vec::new();
        footer.encode_to(&mut encoded);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(Footer::decode_from(&encoded).is_err());
    }
}
