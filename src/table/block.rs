use integer_encoding::VarInt;

/// Builds a single sorted block with restart-point prefix compression.
///
/// Every `restart_interval` entries the key is stored whole and its offset
/// recorded in the restart array; entries in between store only the suffix
/// that differs from the previous key:
///
/// ```text
/// varint32(shared) ∥ varint32(non_shared) ∥ varint32(value_len)
///     ∥ key[shared..] ∥ value
/// ```
///
/// `finish` appends the little-endian restart offsets and their count. The
/// caller is responsible for feeding keys in strictly increasing order.
pub struct BlockBuilder {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        Self {
            restart_interval,
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
    }

    /// Takes effect at the next restart point; `reset` applies it cleanly.
    pub(crate) fn set_restart_interval(&mut self, restart_interval: usize) {
        assert!(restart_interval >= 1);
        self.restart_interval = restart_interval;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Uncompressed size of the block as it would be after `finish`.
    /// Monotonically grows between `reset` calls.
    pub fn current_size_estimate(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4
    }

    /// Size estimate if (key, value) were appended next.
    pub fn estimate_size_after_kv(&self, key: &[u8], value: &[u8]) -> usize {
        let mut estimate = self.current_size_estimate();
        estimate += key.len() + value.len();
        if self.counter >= self.restart_interval {
            // the append would open a new restart slot
            estimate += 4;
        }
        estimate += 4; // worst-case varint for the shared prefix length
        estimate += (key.len() as u32).required_space();
        estimate += (value.len() as u32).required_space();
        estimate
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(self.counter <= self.restart_interval);
        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        self.buf.extend_from_slice(&(shared as u32).encode_var_vec());
        self.buf
            .extend_from_slice(&(non_shared as u32).encode_var_vec());
        self.buf
            .extend_from_slice(&(value.len() as u32).encode_var_vec());
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the block contents. Call
    /// `reset` before reusing the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            self.buf.extend_from_slice(&restart.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        std::mem::take(&mut self.buf)
    }
}
