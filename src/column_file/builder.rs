//! ColumnFile writer — builds a complete ColumnFile file from sorted iterators.
//!
//! The [`ColumnFileWriter`] struct accepts two sorted streams:
//!
//! - **Point entries** ([`PointEntry`](crate::engine::PointEntry)): key/value pairs or point tombstones.
//! - **Range tombstones** ([`RangeTombstone`](crate::engine::RangeTombstone)):
//!   delete intervals covering key ranges.
//!
//! and writes a fully-structured ColumnFile containing header, data blocks, bloom
//! filter, range tombstone block, properties block, metaindex block, index
//! block, and footer.
//!
//! # Input Requirements
//!
//! - `point_entries` **must be sorted by key** so that all entries for a given
//!   key are **grouped (adjacent)**. Duplicate keys are allowed — ColumnFiles may
//!   store multiple versions of the same logical key.
//! - `range_tombstones` **must be sorted by start key**. Overlapping range
//!   tombstones are allowed; per-key resolution prefers the tombstone with the
//!   highest sequence number (tie-breaker: timestamp).
//!
//! # Output Guarantees
//!
//! - All point entries are grouped into data blocks and written with per-block CRC32.
//! - Bloom filter is built from keys (including point tombstones).
//! - Properties capture min/max keys, sequence numbers, timestamps and counts.
//! - The final blob is written atomically through the [`BlockStore`].
//!
//! # Atomicity
//!
//! The writer assembles the whole file in memory and hands it to
//! [`BlockStore::put`] once, which itself writes to a temp name and renames —
//! a crash cannot produce a partially-written ColumnFile.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;

use crate::block_store::BlockStore;
use crate::encoding;
use crate::engine::utils::{compare_values, decode_row, Value};
use crate::engine::{PointEntry, RangeTombstone};
use crate::schema::Schema;

use super::{
    BlockHandle, CF_BLOOM_FILTER_FALSE_POSITIVE_RATE, CF_DATA_BLOCK_CHECKSUM_SIZE,
    CF_DATA_BLOCK_LEN_SIZE, CF_DATA_BLOCK_MAX_SIZE, CF_HDR_MAGIC, CF_HDR_VERSION,
    ColumnFileBloomBlock, ColumnFileCell, ColumnFileDataBlock, ColumnFileError, ColumnFileFooter,
    ColumnFileHeader, ColumnFileIndexEntry, MetaIndexEntry, ColumnFilePropertiesBlock,
    ColumnFileRangeTombstoneCell, ColumnFileRangeTombstoneDataBlock, ColumnStats,
};

/// Cap on the encoded-value set a [`ColumnStatsAccumulator`] tracks for its
/// distinct-value estimate. A simplified stand-in for a HyperLogLog sketch:
/// once a column is observed to have at least this many distinct values,
/// further tracking stops mattering for the selectivity gate, which only
/// ever needs to tell "selective" apart from "not selective".
const DISTINCT_CAP: usize = 256;

// ------------------------------------------------------------------------------------------------
// BuildStats — accumulates metadata during ColumnFile construction
// ------------------------------------------------------------------------------------------------

/// Statistics gathered while iterating point entries and range tombstones.
///
/// Fed into [`ColumnFilePropertiesBlock`] at the end of construction.
struct BuildStats {
    record_count: u64,
    tombstone_count: u64,
    min_seq: u64,
    max_seq: u64,
    min_timestamp: u64,
    max_timestamp: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
}

impl BuildStats {
    fn new() -> Self {
        Self {
            record_count: 0,
            tombstone_count: 0,
            min_seq: u64::MAX,
            max_seq: 0,
            min_timestamp: u64::MAX,
            max_timestamp: 0,
            min_key: None,
            max_key: None,
        }
    }

    fn track(&mut self, seq: u64, timestamp: u64) {
        self.min_seq = self.min_seq.min(seq);
        self.max_seq = self.max_seq.max(seq);
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
    }

    fn into_properties(self, range_count: usize, column_stats: Vec<ColumnStats>) -> ColumnFilePropertiesBlock {
        ColumnFilePropertiesBlock {
            creation_timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before UNIX epoch")
                .as_nanos() as u64,
            record_count: self.record_count,
            tombstone_count: self.tombstone_count,
            range_tombstones_count: range_count as u64,
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
            column_stats,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ColumnStatsAccumulator — per-column min/max/null/distinct tracking
// ------------------------------------------------------------------------------------------------

/// Accumulates min/max/null-count/distinct-estimate for one schema column
/// across the rows observed so far. One set tracks a single row group
/// (reset on every block flush); a second, longer-lived set tracks the
/// whole file.
struct ColumnStatsAccumulator {
    name: String,
    min: Option<Value>,
    max: Option<Value>,
    null_count: u64,
    distinct: HashSet<Vec<u8>>,
}

impl ColumnStatsAccumulator {
    fn new(name: &str) -> Self {
        Self { name: name.to_string(), min: None, max: None, null_count: 0, distinct: HashSet::new() }
    }

    fn observe(&mut self, value: &Value) {
        if matches!(value, Value::Null) {
            self.null_count += 1;
            return;
        }
        if self.distinct.len() < DISTINCT_CAP {
            if let Ok(encoded) = encoding::encode_to_vec(value) {
                self.distinct.insert(encoded);
            }
        }
        if self.min.as_ref().is_none_or(|cur| matches!(compare_values(value, cur), Some(std::cmp::Ordering::Less))) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().is_none_or(|cur| matches!(compare_values(value, cur), Some(std::cmp::Ordering::Greater))) {
            self.max = Some(value.clone());
        }
    }

    fn finish(self) -> ColumnStats {
        ColumnStats { name: self.name, min: self.min, max: self.max, null_count: self.null_count, distinct_estimate: self.distinct.len() as u64 }
    }
}

fn new_accumulators(schema: Option<&Schema>) -> Vec<ColumnStatsAccumulator> {
    schema.map(|s| s.columns.iter().map(|c| ColumnStatsAccumulator::new(&c.name)).collect()).unwrap_or_default()
}

fn observe_row(accumulators: &mut [ColumnStatsAccumulator], columns: &[Value]) {
    for (acc, value) in accumulators.iter_mut().zip(columns.iter()) {
        acc.observe(value);
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Appends a checksummed block `[len_le (4 B)][data][crc32_le (4 B)]` to `out`.
///
/// Returns `(block_offset, data_byte_len)` within `out`.
fn write_checksummed_block(out: &mut Vec<u8>, data: &[u8]) -> (u64, usize) {
    let offset = out.len() as u64;
    let len = data.len() as u32;

    let mut hasher = Crc32::new();
    hasher.update(data);
    let checksum = hasher.finalize();

    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&checksum.to_le_bytes());

    (offset, data.len())
}

/// Appends the ColumnFile header with embedded and trailing CRC32.
fn write_header(out: &mut Vec<u8>) -> Result<(), ColumnFileError> {
    let header = ColumnFileHeader {
        magic: CF_HDR_MAGIC,
        version: CF_HDR_VERSION,
        header_crc: 0,
    };
    let zeroed_bytes = encoding::encode_to_vec(&header)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed_bytes);
    let inner_crc = hasher.finalize();

    let header = ColumnFileHeader {
        header_crc: inner_crc,
        ..header
    };
    let header_bytes = encoding::encode_to_vec(&header)?;
    let mut hasher = Crc32::new();
    hasher.update(&header_bytes);
    let outer_crc = hasher.finalize();

    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&outer_crc.to_le_bytes());

    Ok(())
}

/// Encodes and appends the current data-block buffer, pushing a new index
/// entry. Each data block is also a row group: `row_group_id`/`row_count`
/// identify it and `column_stats` carries its per-column statistics.
fn flush_data_block(
    out: &mut Vec<u8>,
    current_block: &mut Vec<u8>,
    block_first_key: &mut Option<Vec<u8>>,
    index_entries: &mut Vec<ColumnFileIndexEntry>,
    row_group_id: u32,
    row_count: u32,
    column_stats: Vec<ColumnStats>,
) -> Result<(), ColumnFileError> {
    let block = ColumnFileDataBlock {
        data: std::mem::take(current_block),
    };
    let block_bytes = encoding::encode_to_vec(&block)?;
    let (offset, data_len) = write_checksummed_block(out, &block_bytes);

    index_entries.push(ColumnFileIndexEntry {
        separator_key: block_first_key.take().unwrap(),
        handle: BlockHandle {
            offset,
            size: (CF_DATA_BLOCK_LEN_SIZE + data_len + CF_DATA_BLOCK_CHECKSUM_SIZE) as u64,
        },
        row_group_id,
        row_count,
        column_stats,
    });

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Phase helpers — one per logical section of the ColumnFile
// ------------------------------------------------------------------------------------------------

/// Iterates point entries, encodes them into data blocks, populates the
/// bloom filter, and tracks statistics — both file-level and per-row-group.
///
/// When `schema` is `None` (no schema could be resolved for this write),
/// no per-column statistics are computed; both index entries and the
/// returned file-level stats carry empty `column_stats`.
fn write_data_blocks(
    out: &mut Vec<u8>,
    entries: impl Iterator<Item = PointEntry>,
    bloom: &mut Bloom<Vec<u8>>,
    schema: Option<&Schema>,
) -> Result<(BuildStats, Vec<ColumnFileIndexEntry>, Vec<ColumnStats>), ColumnFileError> {
    let mut stats = BuildStats::new();
    let mut index_entries = Vec::new();
    let mut current_block = Vec::<u8>::new();
    let mut block_first_key: Option<Vec<u8>> = None;
    let mut row_group_id: u32 = 0;
    let mut rows_in_block: u32 = 0;
    let mut block_accumulators = new_accumulators(schema);
    let mut file_accumulators = new_accumulators(schema);

    for entry in entries {
        stats.record_count += 1;
        if entry.value.is_none() {
            stats.tombstone_count += 1;
        }
        stats.track(entry.seq, entry.timestamp);

        if stats.min_key.is_none() {
            stats.min_key = Some(entry.key.clone());
        }
        stats.max_key = Some(entry.key.clone());

        if block_first_key.is_none() {
            block_first_key = Some(entry.key.clone());
        }
        bloom.set(&entry.key);

        if let Some(row) = entry.value.as_ref() {
            if let Ok(columns) = decode_row(row) {
                observe_row(&mut block_accumulators, &columns);
                observe_row(&mut file_accumulators, &columns);
            }
        }

        let cell = ColumnFileCell {
            key_len: entry.key.len() as u32,
            value_len: entry.value.as_ref().map_or(0, |v| v.len()) as u32,
            version: entry.version,
            timestamp: entry.timestamp,
            is_delete: entry.value.is_none(),
            seq: entry.seq,
        };
        let mut cell_bytes = encoding::encode_to_vec(&cell)?;
        cell_bytes.extend_from_slice(&entry.key);
        if let Some(value) = entry.value {
            cell_bytes.extend_from_slice(&value);
        }
        current_block.extend_from_slice(&cell_bytes);
        rows_in_block += 1;

        if current_block.len() >= CF_DATA_BLOCK_MAX_SIZE {
            let group_stats = std::mem::replace(&mut block_accumulators, new_accumulators(schema)).into_iter().map(|a| a.finish()).collect();
            flush_data_block(out, &mut current_block, &mut block_first_key, &mut index_entries, row_group_id, rows_in_block, group_stats)?;
            row_group_id += 1;
            rows_in_block = 0;
        }
    }

    if !current_block.is_empty() {
        let group_stats = block_accumulators.into_iter().map(|a| a.finish()).collect();
        flush_data_block(out, &mut current_block, &mut block_first_key, &mut index_entries, row_group_id, rows_in_block, group_stats)?;
    }

    let file_stats = file_accumulators.into_iter().map(|a| a.finish()).collect();
    Ok((stats, index_entries, file_stats))
}

/// Iterates range tombstones, updates stats, and appends the range-delete block.
fn write_range_tombstones(
    out: &mut Vec<u8>,
    entries: impl Iterator<Item = RangeTombstone>,
    stats: &mut BuildStats,
) -> Result<(u64, usize), ColumnFileError> {
    let mut block = ColumnFileRangeTombstoneDataBlock { data: Vec::new() };

    for entry in entries {
        stats.track(entry.seq, entry.timestamp);
        block.data.push(ColumnFileRangeTombstoneCell {
            start_key: entry.start,
            end_key: entry.end,
            timestamp: entry.timestamp,
            seq: entry.seq,
        });
    }

    let mut buf = Vec::new();
    encoding::encode_vec(&block.data, &mut buf)?;
    Ok(write_checksummed_block(out, &buf))
}

/// Builds and appends the metaindex block pointing to bloom, properties,
/// and range-delete blocks.
fn write_metaindex(
    out: &mut Vec<u8>,
    bloom: BlockHandle,
    properties: BlockHandle,
    range_deletes: BlockHandle,
) -> Result<(u64, usize), ColumnFileError> {
    let meta_entries = vec![
        MetaIndexEntry { name: "filter.bloom".to_string(), handle: bloom },
        MetaIndexEntry { name: "meta.properties".to_string(), handle: properties },
        MetaIndexEntry { name: "meta.range_deletes".to_string(), handle: range_deletes },
    ];

    let mut buf = Vec::new();
    encoding::encode_vec(&meta_entries, &mut buf)?;
    Ok(write_checksummed_block(out, &buf))
}

/// Appends the ColumnFile footer (with CRC).
fn write_footer(
    out: &mut Vec<u8>,
    metaindex: BlockHandle,
    index: BlockHandle,
) -> Result<(), ColumnFileError> {
    let current_pos = out.len() as u64;

    let footer = ColumnFileFooter {
        metaindex,
        index,
        total_file_size: current_pos + super::CF_FOOTER_SIZE as u64,
        footer_crc32: 0,
    };

    let footer_bytes = encoding::encode_to_vec(&footer)?;
    let mut hasher = Crc32::new();
    hasher.update(&footer_bytes);
    let footer_crc = hasher.finalize();

    let footer_with_crc = ColumnFileFooter { footer_crc32: footer_crc, ..footer };
    let footer_bytes = encoding::encode_to_vec(&footer_with_crc)?;

    out.extend_from_slice(&footer_bytes);
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// ColumnFileWriter — public entry point
// ------------------------------------------------------------------------------------------------

/// Builds a complete ColumnFile blob and writes it through a [`BlockStore`].
pub struct ColumnFileWriter<'a> {
    store: &'a dyn BlockStore,
    name: String,
}

impl<'a> ColumnFileWriter<'a> {
    /// Create a writer targeting the given blob name within `store`.
    pub fn new(store: &'a dyn BlockStore, name: impl Into<String>) -> Self {
        Self { store, name: name.into() }
    }

    /// Consume sorted iterators and write a complete ColumnFile.
    ///
    /// # Parameters
    ///
    /// - `point_entries` — sorted iterator of [`PointEntry`] values.
    /// - `point_count` — expected number of point entries (sizes bloom filter).
    /// - `range_tombstones` — sorted iterator of [`RangeTombstone`] values.
    /// - `range_count` — expected number of range tombstones.
    /// - `schema` — resolves each row's columns for per-row-group and
    ///   file-level statistics. `None` skips statistics (index entries and
    ///   the properties block carry empty `column_stats`).
    ///
    /// # Errors
    ///
    /// - [`ColumnFileError::Internal`] if both iterators are empty.
    /// - I/O or encoding errors while assembling the blob.
    pub fn build(
        self,
        point_entries: impl Iterator<Item = PointEntry>,
        point_count: usize,
        range_tombstones: impl Iterator<Item = RangeTombstone>,
        range_count: usize,
        schema: Option<&Schema>,
    ) -> Result<(), ColumnFileError> {
        let mut point_entries = point_entries.peekable();
        let mut range_tombstones = range_tombstones.peekable();

        if point_count == 0
            && point_entries.peek().is_none()
            && range_count == 0
            && range_tombstones.peek().is_none()
        {
            return Err(ColumnFileError::Internal(
                "Empty iterators cannot build ColumnFile".into(),
            ));
        }

        let mut out = Vec::new();

        // 1. Header
        write_header(&mut out)?;

        // 2. Data blocks (point entries → blocks + bloom filter + stats)
        let mut bloom = Bloom::new_for_fp_rate(point_count + range_count, CF_BLOOM_FILTER_FALSE_POSITIVE_RATE)
            .map_err(|e| ColumnFileError::Internal(e.to_string()))?;

        let (mut stats, index_entries, file_column_stats) = write_data_blocks(&mut out, point_entries, &mut bloom, schema)?;

        // 3. Bloom filter block
        let bloom_block = ColumnFileBloomBlock { data: bloom.as_slice().to_vec() };
        let bloom_bytes = encoding::encode_to_vec(&bloom_block)?;
        let (bloom_off, bloom_len) = write_checksummed_block(&mut out, &bloom_bytes);

        // 4. Range tombstones block
        let (rt_off, rt_len) = write_range_tombstones(&mut out, range_tombstones, &mut stats)?;

        // 5. Properties block
        let properties = stats.into_properties(range_count, file_column_stats);
        let props_bytes = encoding::encode_to_vec(&properties)?;
        let (props_off, props_len) = write_checksummed_block(&mut out, &props_bytes);

        // 6. Metaindex block
        let (meta_off, meta_len) = write_metaindex(
            &mut out,
            BlockHandle { offset: bloom_off, size: bloom_len as u64 },
            BlockHandle { offset: props_off, size: props_len as u64 },
            BlockHandle { offset: rt_off, size: rt_len as u64 },
        )?;

        // 7. Index block
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&index_entries, &mut index_bytes)?;
        let (idx_off, idx_len) = write_checksummed_block(&mut out, &index_bytes);

        // 8. Footer
        write_footer(
            &mut out,
            BlockHandle { offset: meta_off, size: meta_len as u64 },
            BlockHandle { offset: idx_off, size: idx_len as u64 },
        )?;

        self.store
            .put(&self.name, &out)
            .map_err(|e| ColumnFileError::Internal(e.to_string()))?;
        Ok(())
    }
}
