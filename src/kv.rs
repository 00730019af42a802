use std::cmp::Ordering;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::comparator::Comparator;

/// Sequence numbers occupy the upper 56 bits of the packed trailer, the
/// value type the lower 8.
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
    /// Record tag for write-batch blobs. Never enters the memtable.
    LogData = 2,
    Merge = 3,
}

/// The type tag packed into keys used for seeks. Must be the largest tag so
/// that a seek key sorts before every entry with the same user key and
/// sequence.
pub(crate) const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Merge;

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            0 => Ok(ValueType::Deletion),
            1 => Ok(ValueType::Value),
            2 => Ok(ValueType::LogData),
            3 => Ok(ValueType::Merge),
            other => Err(other),
        }
    }
}

#[inline]
pub fn pack_sequence_and_type(sequence: u64, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Appends `user_key ∥ packed_u64_le((sequence << 8) | type)`, the key form
/// the memtable stores.
#[inline]
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], sequence: u64, value_type: ValueType) {
    buf.put_slice(user_key);
    buf.put_u64_le(pack_sequence_and_type(sequence, value_type));
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: u64,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(encoded: &'a [u8]) -> Option<Self> {
        if encoded.len() < 8 {
            return None;
        }
        let split = encoded.len() - 8;
        let mut trailer = &encoded[split..];
        let packed = trailer.get_u64_le();
        let value_type = ValueType::try_from((packed & 0xff) as u8).ok()?;
        Some(Self {
            user_key: &encoded[..split],
            sequence: packed >> 8,
            value_type,
        })
    }
}

/// Owned memtable key: user key plus (sequence, type). Orders by user key
/// ascending, then sequence descending, then type descending, so the newest
/// entry for a user key is seen first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    user_key: Vec<u8>,
    sequence: u64,
    value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: u64, value_type: ValueType) -> Self {
        Self {
            user_key: user_key.to_vec(),
            sequence,
            value_type,
        }
    }

    pub fn decode(encoded: &[u8]) -> Option<Self> {
        let parsed = ParsedInternalKey::parse(encoded)?;
        Some(Self::new(parsed.user_key, parsed.sequence, parsed.value_type))
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    #[inline]
    fn trailer(&self) -> u64 {
        pack_sequence_and_type(self.sequence, self.value_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.user_key.len() + 8);
        out.put_slice(&self.user_key);
        out.put_u64_le(self.trailer());
        out
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.user_key.cmp(&other.user_key) {
            Ordering::Equal => {}
            ord => return ord,
        }
        other.trailer().cmp(&self.trailer())
    }
}

/// Orders encoded internal keys by the wrapped user comparator, newest
/// version first within a user key. The shortening operations shorten the
/// user-key part and re-attach a maximal trailer so the contract
/// `separator >= left && separator < right` holds under this ordering.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self { user_comparator }
    }

    fn extract_user_key<'a>(&self, encoded: &'a [u8]) -> &'a [u8] {
        assert!(encoded.len() >= 8);
        &encoded[..encoded.len() - 8]
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "leveldb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(self.extract_user_key(a), self.extract_user_key(b))
        {
            Ordering::Equal => {}
            ord => return ord,
        }
        let a_trailer = crate::byte_util::to_u64_le(&a[a.len() - 8..]);
        let b_trailer = crate::byte_util::to_u64_le(&b[b.len() - 8..]);
        b_trailer.cmp(&a_trailer)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = self.extract_user_key(start).to_vec();
        let user_limit = self.extract_user_key(limit);
        let mut tmp = user_start.clone();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(&user_start, &tmp) == Ordering::Less
        {
            tmp.put_u64_le(pack_sequence_and_type(
                MAX_SEQUENCE_NUMBER,
                VALUE_TYPE_FOR_SEEK,
            ));
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = self.extract_user_key(key).to_vec();
        let mut tmp = user_key.clone();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(&user_key, &tmp) == Ordering::Less
        {
            tmp.put_u64_le(pack_sequence_and_type(
                MAX_SEQUENCE_NUMBER,
                VALUE_TYPE_FOR_SEEK,
            ));
            debug_assert_eq!(self.compare(key, &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    #[test]
    fn test_pack_round_trip() {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, b"foo", 100, ValueType::Value);
        let parsed = ParsedInternalKey::parse(&buf).unwrap();
        assert_eq!(parsed.user_key, b"foo");
        assert_eq!(parsed.sequence, 100);
        assert_eq!(parsed.value_type, ValueType::Value);

        let key = InternalKey::decode(&buf).unwrap();
        assert_eq!(key.encode(), buf);
        assert!(ParsedInternalKey::parse(b"short").is_none());
        // the type tag is the low byte of the LE trailer; 9 is no valid tag
        assert!(ParsedInternalKey::parse(&[9, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_internal_key_order() {
        // user key ascending first
        assert!(
            InternalKey::new(b"bar", 99, ValueType::Value)
                < InternalKey::new(b"foo", 100, ValueType::Value)
        );
        // same user key: higher sequence first
        assert!(
            InternalKey::new(b"foo", 101, ValueType::Deletion)
                < InternalKey::new(b"foo", 100, ValueType::Value)
        );
        // same sequence: higher type first
        assert!(
            InternalKey::new(b"foo", 100, ValueType::Merge)
                < InternalKey::new(b"foo", 100, ValueType::Deletion)
        );
    }

    #[test]
    fn test_internal_key_comparator_separator() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let mut start = InternalKey::new(b"the quick brown fox", 7, ValueType::Value).encode();
        let limit = InternalKey::new(b"the who", 5, ValueType::Value).encode();
        icmp.find_shortest_separator(&mut start, &limit);
        let parsed = ParsedInternalKey::parse(&start).unwrap();
        assert_eq!(parsed.user_key, b"the r");
        assert_eq!(parsed.sequence, MAX_SEQUENCE_NUMBER);

        // no shortening possible: untouched
        let mut start = InternalKey::new(b"foo", 7, ValueType::Value).encode();
        let orig = start.clone();
        let limit = InternalKey::new(b"foobar", 5, ValueType::Value).encode();
        icmp.find_shortest_separator(&mut start, &limit);
        assert_eq!(start, orig);
    }
}
