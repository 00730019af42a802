use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use integer_encoding::VarInt;
use log::debug;

use crate::checksum;
use crate::comparator::Comparator;
use crate::errors::DBError;
use crate::fs::WritableFile;
use crate::kv::{append_internal_key, InternalKeyComparator};
use crate::memtable::MemTable;
use crate::options::{CompressionType, Options};

use super::block::BlockBuilder;
use super::filter::FilterBlockBuilder;
use super::{
    stats, BlockHandle, Footer, BLOCK_TRAILER_SIZE, FILTER_BLOCK_PREFIX, STATS_BLOCK_KEY,
};

/// Keep a compressed block only when it saves at least 12.5%.
fn good_compression_ratio(compressed_size: usize, raw_size: usize) -> bool {
    compressed_size < raw_size - (raw_size / 8)
}

/// Flush policy: cut the block once it reaches the target, or early when
/// appending would overshoot and the block is already within `deviation`
/// percent of the target.
pub(crate) fn should_flush(
    cur_size: usize,
    size_after_kv: usize,
    block_size: usize,
    deviation: usize,
) -> bool {
    cur_size >= block_size
        || (size_after_kv > block_size
            && deviation > 0
            && cur_size * 100 > block_size * (100 - deviation))
}

/// Streams an in-order sequence of (key, value) records into a single
/// immutable table file: data blocks as they fill up, then on `finish` the
/// filter, stats, metaindex and index blocks and the fixed footer.
///
/// Single-threaded and append-only. The sink is borrowed for the builder's
/// lifetime; the first sink failure latches and every later operation
/// short-circuits on it. Callers must reach `finish` or `abandon` before
/// dropping the builder.
pub struct TableBuilder<'a, W: WritableFile> {
    options: Options,
    file: &'a mut W,
    level: i32,
    offset: u64,
    status: Option<anyhow::Error>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    num_entries: u64,
    num_data_blocks: u64,
    raw_key_size: u64,
    raw_value_size: u64,
    data_size: u64,
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    // The index entry for a finished block is held back until the first key
    // of the next block arrives, so a short separator between the two can be
    // used instead of the block's full last key.
    //
    // Invariant: pending_index_entry is true only if data_block is empty.
    pending_index_entry: bool,
    pending_handle: BlockHandle,

    compressed_output: Vec<u8>,
}

impl<'a, W: WritableFile> TableBuilder<'a, W> {
    pub fn new(options: Options, file: &'a mut W, level: i32) -> Self {
        let filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        let mut builder = Self {
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            options,
            file,
            level,
            offset: 0,
            status: None,
            last_key: Vec::new(),
            num_entries: 0,
            num_data_blocks: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            data_size: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            compressed_output: Vec::new(),
        };
        if let Some(filter) = builder.filter_block.as_mut() {
            filter.start_block(0);
        }
        builder
    }

    /// Flushes a memtable into a table file. Every entry is stored under its
    /// encoded internal key, ordered by the internal-key comparator wrapping
    /// the options' user comparator, the way an L0 flush writes tables.
    /// Returns the final file size.
    pub fn build_from_memtable(
        mem: &MemTable,
        options: Options,
        file: &'a mut W,
        level: i32,
    ) -> Result<u64> {
        let comparator: Arc<dyn Comparator> =
            Arc::new(InternalKeyComparator::new(options.comparator.clone()));
        let options = Options {
            comparator,
            ..options
        };
        let mut builder = TableBuilder::new(options, file, level);
        let mut key_buf = Vec::new();
        for (key, value) in mem.iter() {
            key_buf.clear();
            append_internal_key(&mut key_buf, key.user_key(), key.sequence(), key.value_type());
            if let Err(e) = builder.add(&key_buf, value) {
                builder.abandon();
                return Err(e);
            }
        }
        builder.finish()?;
        Ok(builder.file_size())
    }

    /// Swapping the comparator mid-build is rejected; other fields take
    /// effect on the live block builders.
    pub fn change_options(&mut self, options: Options) -> Result<()> {
        if options.comparator.name() != self.options.comparator.name() {
            bail!(DBError::InvalidArgument(
                "changing comparator while building table".into()
            ));
        }
        self.data_block
            .set_restart_interval(options.block_restart_interval);
        // the index block keeps restarting on every entry so its keys stay
        // uncompressed
        self.options = options;
        Ok(())
    }

    pub fn ok(&self) -> bool {
        self.status.is_none()
    }

    /// The latched error from the first failed sink write, if any.
    pub fn status(&self) -> Option<&anyhow::Error> {
        self.status.as_ref()
    }

    fn check(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(anyhow!("{e:#}")),
        }
    }

    fn latch(&mut self, e: anyhow::Error) -> anyhow::Error {
        let propagated = anyhow!("{e:#}");
        if self.status.is_none() {
            self.status = Some(e);
        }
        propagated
    }

    /// Appends one entry. Keys must arrive in strictly increasing order
    /// under the configured comparator; violating that is a caller bug, not
    /// a recoverable error.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.closed, "add on a finished or abandoned builder");
        self.check()?;
        if self.num_entries > 0 {
            assert_eq!(
                self.options.comparator.compare(key, &self.last_key),
                Ordering::Greater,
                "keys must be added in strictly increasing order"
            );
        }

        let cur_size = self.data_block.current_size_estimate();
        let size_after_kv = self.data_block.estimate_size_after_kv(key, value);
        if should_flush(
            cur_size,
            size_after_kv,
            self.options.block_size,
            self.options.block_size_deviation,
        ) {
            self.flush()?;
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.data_block.add(key, value);
        self.num_entries += 1;
        self.raw_key_size += key.len() as u64;
        self.raw_value_size += value.len() as u64;
        Ok(())
    }

    /// Cuts the current data block and writes it out. No-op when the block
    /// is empty.
    pub fn flush(&mut self) -> Result<()> {
        assert!(!self.closed, "flush on a finished or abandoned builder");
        self.check()?;
        self.flush_data_block()
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);
        let raw = self.data_block.finish();
        self.data_block.reset();
        self.pending_handle = self.write_block(raw)?;
        self.pending_index_entry = true;
        if let Err(e) = self.file.flush() {
            return Err(self.latch(e));
        }
        if let Some(filter) = self.filter_block.as_mut() {
            filter.start_block(self.offset);
        }
        self.data_size = self.offset;
        self.num_data_blocks += 1;
        Ok(())
    }

    fn pick_compression(&self) -> CompressionType {
        let per_level = &self.options.compression_per_level;
        if per_level.is_empty() {
            return self.options.compression;
        }
        // files of unknown level (-1) use the level-0 choice; levels past
        // the end of the list clamp to its last entry
        let index = (self.level.max(0) as usize).min(per_level.len() - 1);
        per_level[index]
    }

    /// Runs the block through the compression pipeline and writes it with
    /// its trailer. Compressed bytes are kept only when they beat the raw
    /// form by enough; otherwise (or when the codec is unavailable) the raw
    /// form goes out under tag 0.
    fn write_block(&mut self, raw: Vec<u8>) -> Result<BlockHandle> {
        let mut compression = self.pick_compression();
        let mut contents = raw;
        if compression != CompressionType::None {
            match compression.compress(&contents) {
                Some(compressed) if good_compression_ratio(compressed.len(), contents.len()) => {
                    self.compressed_output = compressed;
                    std::mem::swap(&mut contents, &mut self.compressed_output);
                }
                _ => compression = CompressionType::None,
            }
        }
        let handle = self.write_raw_block(&contents, compression);
        self.compressed_output.clear();
        handle
    }

    /// Appends `contents ∥ tag ∥ masked_crc32c_le(contents ∥ tag)` and
    /// advances the offset past the trailer.
    fn write_raw_block(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        if let Err(e) = self.append_block_with_trailer(contents, compression) {
            return Err(self.latch(e));
        }
        self.offset += contents.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    fn append_block_with_trailer(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<()> {
        self.file.append(contents)?;
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compression.tag();
        let crc = checksum::crc32c_extend(checksum::crc32c(contents), &trailer[..1]);
        trailer[1..].copy_from_slice(&checksum::mask(crc).to_le_bytes());
        self.file.append(&trailer)?;
        Ok(())
    }

    /// Writes everything that trails the data region, in order: filter
    /// block, stats block, metaindex block, index block, footer. Each step
    /// is gated on the running status; a failure mid-way stops the rest but
    /// stays readable through `status`.
    pub fn finish(&mut self) -> Result<()> {
        assert!(!self.closed, "finish on a finished or abandoned builder");
        if self.ok() {
            let _ = self.flush_data_block();
        }
        self.closed = true;

        // filter block, always stored raw
        let mut filter_entry: Option<(Vec<u8>, Vec<u8>)> = None;
        if self.ok() {
            if let Some(mut filter) = self.filter_block.take() {
                let contents = filter.finish();
                if let Ok(handle) = self.write_raw_block(&contents, CompressionType::None) {
                    if let Some(policy) = self.options.filter_policy.as_ref() {
                        let mut name = FILTER_BLOCK_PREFIX.as_bytes().to_vec();
                        name.extend_from_slice(policy.name().as_bytes());
                        let mut handle_encoding = Vec::new();
                        handle.encode_to(&mut handle_encoding);
                        filter_entry = Some((name, handle_encoding));
                    }
                }
            }
        }

        // the final index entry covers a block with no next key, so a short
        // successor of the last key stands in for a separator
        if self.ok() && self.pending_index_entry {
            self.options
                .comparator
                .find_short_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        // meta blocks, then the metaindex mapping their names to handles.
        // The index block is finished after the stats block so the stat can
        // carry its (exact) size estimate.
        let mut metaindex_block_handle = BlockHandle::default();
        if self.ok() {
            let mut meta_block_handles: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

            if let Some((name, handle_encoding)) = filter_entry {
                meta_block_handles.insert(name, handle_encoding);
            }

            let mut table_stats: BTreeMap<&'static str, u64> = BTreeMap::new();
            table_stats.insert(stats::RAW_KEY_SIZE, self.raw_key_size);
            table_stats.insert(stats::RAW_VALUE_SIZE, self.raw_value_size);
            table_stats.insert(stats::DATA_SIZE, self.data_size);
            table_stats.insert(
                stats::INDEX_SIZE,
                (self.index_block.current_size_estimate() + BLOCK_TRAILER_SIZE) as u64,
            );
            table_stats.insert(stats::NUM_ENTRIES, self.num_entries);
            table_stats.insert(stats::NUM_DATA_BLOCKS, self.num_data_blocks);

            let mut stats_block = BlockBuilder::new(self.options.block_restart_interval);
            for (name, value) in &table_stats {
                stats_block.add(name.as_bytes(), &value.encode_var_vec());
            }
            let raw = stats_block.finish();
            if let Ok(handle) = self.write_block(raw) {
                let mut handle_encoding = Vec::new();
                handle.encode_to(&mut handle_encoding);
                meta_block_handles.insert(STATS_BLOCK_KEY.as_bytes().to_vec(), handle_encoding);
            }

            if self.ok() {
                let mut metaindex_block = BlockBuilder::new(self.options.block_restart_interval);
                for (name, handle_encoding) in &meta_block_handles {
                    metaindex_block.add(name, handle_encoding);
                }
                let raw = metaindex_block.finish();
                if let Ok(handle) = self.write_block(raw) {
                    metaindex_block_handle = handle;
                }
            }
        }

        // index block
        let mut index_block_handle = BlockHandle::default();
        if self.ok() {
            let raw = self.index_block.finish();
            if let Ok(handle) = self.write_block(raw) {
                index_block_handle = handle;
            }
        }

        // footer
        if self.ok() {
            let footer = Footer::new(metaindex_block_handle, index_block_handle);
            let mut footer_encoding = Vec::new();
            footer.encode_to(&mut footer_encoding);
            match self.file.append(&footer_encoding) {
                Ok(()) => self.offset += footer_encoding.len() as u64,
                Err(e) => {
                    self.latch(e);
                }
            }
        }

        if self.ok() {
            debug!(
                "table finished: {} entries in {} data blocks, {} bytes",
                self.num_entries, self.num_data_blocks, self.offset
            );
        }
        self.check()
    }

    /// Marks the builder closed without writing a footer. The partial file
    /// is not a valid table.
    pub fn abandon(&mut self) {
        assert!(!self.closed, "abandon on a finished or abandoned builder");
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Total bytes appended to the sink so far; after `finish` this is the
    /// final file size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}

impl<W: WritableFile> Drop for TableBuilder<'_, W> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.closed,
                "table builder dropped without finish or abandon"
            );
        }
    }
}
