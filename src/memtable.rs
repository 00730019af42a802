use std::collections::BTreeMap;

use crate::kv::{InternalKey, ValueType};

/// In-memory sorted store the write batch replays into. Every
/// (user_key, sequence, type) version is its own entry; tombstones and merge
/// operands share the namespace with puts and are ordered purely by the
/// internal-key comparator.
#[derive(Debug, Default)]
pub struct MemTable {
    map: BTreeMap<InternalKey, Vec<u8>>,
    approx_size: usize,
}

impl MemTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, sequence: u64, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        debug_assert!(value_type != ValueType::LogData);
        self.approx_size += user_key.len() + 8 + value.len();
        self.map.insert(
            InternalKey::new(user_key, sequence, value_type),
            value.to_vec(),
        );
    }

    /// Ascending by (user_key asc, sequence desc, type desc).
    pub fn iter(&self) -> impl Iterator<Item = (&InternalKey, &[u8])> {
        self.map.iter().map(|(key, value)| (key, value.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.approx_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_order() {
        let mut mem = MemTable::new();
        mem.add(100, ValueType::Value, b"foo", b"bar");
        mem.add(101, ValueType::Deletion, b"foo", b"");
        mem.add(99, ValueType::Value, b"baz", b"boo");

        let entries: Vec<_> = mem
            .iter()
            .map(|(k, v)| (k.user_key().to_vec(), k.sequence(), k.value_type(), v.to_vec()))
            .collect();
        assert_eq!(
            entries,
            vec![
                (b"baz".to_vec(), 99, ValueType::Value, b"boo".to_vec()),
                (b"foo".to_vec(), 101, ValueType::Deletion, Vec::new()),
                (b"foo".to_vec(), 100, ValueType::Value, b"bar".to_vec()),
            ]
        );
        assert_eq!(mem.len(), 3);
        assert!(mem.approximate_memory_usage() >= 3 * 8);
    }
}
