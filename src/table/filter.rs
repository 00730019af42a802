use std::sync::Arc;

/// Compact set-membership summary: maps a key to bit positions inside a
/// per-block filter. Shared read-only across builders.
pub trait FilterPolicy: Send + Sync {
    /// Stored in the metaindex as `"filter." ∥ name()`; readers use it to
    /// find the filter matching their configured policy.
    fn name(&self) -> &'static str;

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Bloom filter with double hashing by delta rotation. The probe count is
/// stored in the filter's last byte so readers do not depend on the builder's
/// parameters.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        // factor ln(2) minimizes the false-positive rate; rounding down
        let k = ((bits_per_key as f64) * 0.69) as usize;
        Self {
            bits_per_key,
            k: k.clamp(1, 30),
        }
    }

    pub(crate) fn bloom_hash(mut bytes: &[u8]) -> u32 {
        const SEED: u32 = 0xbc9f1d34;
        const M: u32 = 0xc6a4a793;
        let mut hash = SEED ^ (bytes.len() as u32).wrapping_mul(M);
        while bytes.len() >= 4 {
            hash = hash.wrapping_add(
                bytes[0] as u32
                    | (bytes[1] as u32) << 8
                    | (bytes[2] as u32) << 16
                    | (bytes[3] as u32) << 24,
            );
            hash = hash.wrapping_mul(M);
            hash ^= hash >> 16;
            bytes = &bytes[4..];
        }
        match bytes.len() {
            3 => {
                hash = hash.wrapping_add(
                    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16,
                );
            }
            2 => {
                hash = hash.wrapping_add(bytes[0] as u32 | (bytes[1] as u32) << 8);
            }
            1 => {
                hash = hash.wrapping_add(bytes[0] as u32);
            }
            _ => {}
        }
        if !bytes.is_empty() {
            hash = hash.wrapping_mul(M);
            hash ^= hash >> 24;
        }
        hash
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "leveldb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        // a tiny key set still gets 64 bits so the false-positive rate does
        // not collapse
        let mut bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        bits = bytes * 8;

        let mut filter = vec![0u8; bytes + 1];
        filter[bytes] = self.k as u8;
        for key in keys {
            let mut hash = Self::bloom_hash(key);
            let delta = hash >> 17 | hash << 15;
            for _ in 0..self.k {
                let bit_pos = hash as usize % bits;
                filter[bit_pos / 8] |= 1 << (bit_pos % 8);
                hash = hash.wrapping_add(delta);
            }
        }
        filter
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = (filter.len() - 1) * 8;
        let k = filter[filter.len() - 1];
        if k > 30 {
            // reserved for future encodings, treat as a match
            return true;
        }
        let mut hash = Self::bloom_hash(key);
        let delta = hash >> 17 | hash << 15;
        for _ in 0..k {
            let bit_pos = hash as usize % bits;
            if filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            hash = hash.wrapping_add(delta);
        }
        true
    }
}

/// Every data block gets covered by the filter for the 2 KiB window of file
/// offsets its first byte falls into.
pub(crate) const FILTER_BASE_LG: u32 = 11;

/// Accumulates per-data-block filters keyed by file offset.
///
/// ```text
/// [filter 0] .. [filter n-1]
/// [offset of filter 0 (u32 le)] .. [offset of filter n-1]
/// [offset of the offset array (u32 le)]
/// [base lg (u8)]
/// ```
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    keys: Vec<Vec<u8>>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Starts the filter segment covering the data block that begins at
    /// `block_offset`. Offsets must not go backwards.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset >> FILTER_BASE_LG) as usize;
        assert!(filter_index >= self.filter_offsets.len());
        while filter_index > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    pub fn finish(&mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        for &offset in &self.filter_offsets {
            self.result.extend_from_slice(&offset.to_le_bytes());
        }
        self.result.extend_from_slice(&array_offset.to_le_bytes());
        self.result.push(FILTER_BASE_LG as u8);
        std::mem::take(&mut self.result)
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            // empty window reuses the previous end offset
            return;
        }
        let filter = self.policy.create_filter(&self.keys);
        self.result.extend_from_slice(&filter);
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_util::{bytes_to_vec_u32_le, to_u32_le};

    #[test]
    fn test_bloom_hash() {
        assert_eq!(BloomFilterPolicy::bloom_hash(b""), 0xbc9f1d34);
        assert_eq!(BloomFilterPolicy::bloom_hash(b"a"), 0x286e9db0);
        assert_eq!(BloomFilterPolicy::bloom_hash(b"ab"), 0x39aca330);
        assert_eq!(BloomFilterPolicy::bloom_hash(b"abc"), 0x855d012f);
        assert_eq!(BloomFilterPolicy::bloom_hash(b"abcd"), 0xb9c83353);
    }

    #[test]
    fn test_bloom_membership() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000u32).map(|i| i.to_le_bytes().to_vec()).collect();
        let filter = policy.create_filter(&keys);
        for key in &keys {
            assert!(policy.key_may_match(key, &filter));
        }
        let mut false_positives = 0;
        for i in 0..10_000u32 {
            if policy.key_may_match(&(1_000_000 + i).to_le_bytes(), &filter) {
                false_positives += 1;
            }
        }
        // 10 bits per key should stay around a 1% false-positive rate
        assert!(
            false_positives < 200,
            "{} false positives in 10000",
            false_positives
        );
    }

    #[test]
    fn test_empty_filter_block() {
        let mut builder = FilterBlockBuilder::new(Arc::new(BloomFilterPolicy::new(10)));
        builder.start_block(0);
        let block = builder.finish();
        // empty offset array + array offset + base lg
        assert_eq!(block, vec![0, 0, 0, 0, FILTER_BASE_LG as u8]);
    }

    #[test]
    fn test_filter_block_windows() {
        let policy = Arc::new(BloomFilterPolicy::new(10));
        let mut builder = FilterBlockBuilder::new(policy.clone());
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.start_block(2048);
        builder.add_key(b"box");
        builder.start_block(9000);
        builder.add_key(b"hello");
        let block = builder.finish();

        let base_lg = block[block.len() - 1] as u32;
        assert_eq!(base_lg, FILTER_BASE_LG);
        let array_offset = to_u32_le(&block[block.len() - 5..block.len() - 1]) as usize;
        let offsets = bytes_to_vec_u32_le(&block[array_offset..block.len() - 5]);
        // windows 0..=4 for offsets up to 9000
        assert_eq!(offsets.len(), 5);

        let filter_for = |block_offset: u64| -> &[u8] {
            let index = (block_offset >> base_lg) as usize;
            let start = offsets[index] as usize;
            let end = offsets
                .get(index + 1)
                .map(|&o| o as usize)
                .unwrap_or(array_offset);
            &block[start..end]
        };

        assert!(policy.key_may_match(b"foo", filter_for(0)));
        assert!(policy.key_may_match(b"bar", filter_for(0)));
        assert!(policy.key_may_match(b"box", filter_for(2048)));
        assert!(policy.key_may_match(b"hello", filter_for(9000)));
        // windows between 2048 and 8192 hold no keys
        assert!(filter_for(4096).is_empty());
        assert!(!policy.key_may_match(b"foo", filter_for(2048)));
        assert!(!policy.key_may_match(b"missing", filter_for(0)));
    }
}
