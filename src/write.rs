use anyhow::{bail, Result};
use integer_encoding::VarInt;
use log::debug;

use crate::byte_util::{to_u32_le, to_u64_le};
use crate::errors::DBError;
use crate::kv::ValueType;
use crate::memtable::MemTable;

/// 8-byte little-endian sequence base followed by a 4-byte little-endian
/// count of sequence-consuming records.
pub(crate) const WRITE_BATCH_HEADER: usize = 12;

/// Serialized group of point mutations, replayed atomically into a memtable.
///
/// Wire format after the header: one record per operation, each a tag byte
/// followed by varint-length-prefixed fields. `LogData` records carry a blob
/// for the write-ahead log only; they are not counted and consume no
/// sequence number.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch target for [`WriteBatch::iterate`]. Callbacks fire in insertion
/// order, independent of sequence assignment.
pub trait Handler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn merge(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn log_data(&mut self, _blob: &[u8]) {}
}

impl WriteBatch {
    pub fn new() -> Self {
        Self {
            rep: vec![0; WRITE_BATCH_HEADER],
        }
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(WRITE_BATCH_HEADER, 0);
    }

    pub fn count(&self) -> u32 {
        to_u32_le(&self.rep[8..WRITE_BATCH_HEADER])
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..WRITE_BATCH_HEADER].copy_from_slice(&count.to_le_bytes());
    }

    pub fn sequence(&self) -> u64 {
        to_u64_le(&self.rep[..8])
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed(&mut self.rep, key);
        put_length_prefixed(&mut self.rep, value);
    }

    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Merge as u8);
        put_length_prefixed(&mut self.rep, key);
        put_length_prefixed(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed(&mut self.rep, key);
    }

    /// Appends a blob that rides along in the serialized form without being
    /// applied to the store. Does not increment the count.
    pub fn put_log_data(&mut self, blob: &[u8]) {
        self.rep.push(ValueType::LogData as u8);
        put_length_prefixed(&mut self.rep, blob);
    }

    /// Concatenates `src`'s records onto `self`. `self` keeps its sequence
    /// base; the counts add up.
    pub fn append(&mut self, src: &WriteBatch) {
        assert!(src.rep.len() >= WRITE_BATCH_HEADER);
        self.set_count(self.count() + src.count());
        self.rep.extend_from_slice(&src.rep[WRITE_BATCH_HEADER..]);
    }

    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub fn set_contents(&mut self, contents: &[u8]) {
        assert!(contents.len() >= WRITE_BATCH_HEADER);
        self.rep.clear();
        self.rep.extend_from_slice(contents);
    }

    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Walks the payload in insertion order. Fails with a corruption error
    /// naming the offending record kind on a truncated or ill-tagged
    /// payload; records before the failure have already been dispatched.
    pub fn iterate(&self, handler: &mut dyn Handler) -> Result<()> {
        if self.rep.len() < WRITE_BATCH_HEADER {
            bail!(DBError::corruption("malformed WriteBatch (too small)"));
        }
        let mut input = &self.rep[WRITE_BATCH_HEADER..];
        let mut found: u32 = 0;
        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];
            match ValueType::try_from(tag) {
                Ok(ValueType::Value) => {
                    match (
                        get_length_prefixed(&mut input),
                        get_length_prefixed(&mut input),
                    ) {
                        (Some(key), Some(value)) => {
                            handler.put(key, value);
                            found += 1;
                        }
                        _ => bail!(DBError::corruption("bad WriteBatch Put")),
                    }
                }
                Ok(ValueType::Deletion) => match get_length_prefixed(&mut input) {
                    Some(key) => {
                        handler.delete(key);
                        found += 1;
                    }
                    None => bail!(DBError::corruption("bad WriteBatch Delete")),
                },
                Ok(ValueType::Merge) => {
                    match (
                        get_length_prefixed(&mut input),
                        get_length_prefixed(&mut input),
                    ) {
                        (Some(key), Some(value)) => {
                            handler.merge(key, value);
                            found += 1;
                        }
                        _ => bail!(DBError::corruption("bad WriteBatch Merge")),
                    }
                }
                Ok(ValueType::LogData) => match get_length_prefixed(&mut input) {
                    Some(blob) => handler.log_data(blob),
                    None => bail!(DBError::corruption("bad WriteBatch LogData")),
                },
                Err(_) => bail!(DBError::corruption("unknown WriteBatch tag")),
            }
        }
        if found != self.count() {
            bail!(DBError::corruption("WriteBatch has wrong count"));
        }
        Ok(())
    }

    /// Replays the batch into `mem`, assigning `sequence() + i` to the
    /// i-th counted record. LogData records are skipped by sequence
    /// assignment. On corruption, records already inserted stay in the
    /// memtable; atomicity is the caller's concern.
    pub fn insert_into(&self, mem: &mut MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)?;
        debug!("{} records replayed into memtable", self.count());
        Ok(())
    }
}

fn put_length_prefixed(rep: &mut Vec<u8>, slice: &[u8]) {
    rep.extend_from_slice(&(slice.len() as u32).encode_var_vec());
    rep.extend_from_slice(slice);
}

fn get_length_prefixed<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let (len, varint_len) = u32::decode_var(input)?;
    let len = len as usize;
    *input = &input[varint_len..];
    if input.len() < len {
        return None;
    }
    let (slice, rest) = input.split_at(len);
    *input = rest;
    Some(slice)
}

struct MemTableInserter<'a> {
    sequence: u64,
    mem: &'a mut MemTable,
}

impl Handler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Merge, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}
