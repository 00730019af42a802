use std::io::Write;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::table::filter::FilterPolicy;

/// Block compression codecs. The discriminant doubles as the on-disk
/// compression tag in block trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Zlib = 2,
    Bzip2 = 3,
}

impl CompressionType {
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Zlib),
            3 => Some(CompressionType::Bzip2),
            _ => Option::None,
        }
    }

    /// Compresses `data`, returning `None` when no codec is wired in for
    /// this type. Callers decide whether the result is worth keeping.
    pub(crate) fn compress(self, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            CompressionType::None => Option::None,
            CompressionType::Snappy => snap::raw::Encoder::new().compress_vec(data).ok(),
            CompressionType::Zlib => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).ok()?;
                encoder.finish().ok()
            }
            // no bzip2 codec is wired in; the caller stores raw bytes instead
            CompressionType::Bzip2 => Option::None,
        }
    }
}

#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,

    /// When set, the builder emits a filter block and registers it in the
    /// metaindex under `"filter." ∥ policy.name()`.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Target uncompressed size of a data block.
    pub block_size: usize,

    /// Entries between restart points in data blocks. The index block always
    /// restarts on every entry.
    pub block_restart_interval: usize,

    /// Percentage below `block_size` a block may be cut early at. 0 disables
    /// the early-flush rule entirely.
    pub block_size_deviation: usize,

    pub compression: CompressionType,

    /// Per-level override of `compression`; indexed by the builder's level,
    /// clamped to the list. Empty means use `compression` everywhere.
    pub compression_per_level: Vec<CompressionType>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            block_size_deviation: 10,
            compression: CompressionType::Snappy,
            compression_per_level: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_tags() {
        for t in [
            CompressionType::None,
            CompressionType::Snappy,
            CompressionType::Zlib,
            CompressionType::Bzip2,
        ] {
            assert_eq!(CompressionType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(CompressionType::from_tag(4), Option::None);
    }

    #[test]
    fn test_compress_round_trip() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(16);
        let compressed = CompressionType::Snappy.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(
            snap::raw::Decoder::new().decompress_vec(&compressed).unwrap(),
            data
        );

        let compressed = CompressionType::Zlib.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let mut decoder = flate2::read::ZlibDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, data);

        assert!(CompressionType::None.compress(&data).is_none());
        assert!(CompressionType::Bzip2.compress(&data).is_none());
    }
}
