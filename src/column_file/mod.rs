//! Sorted String Table (ColumnFile) Module
//!
//! This module implements an **immutable**, **disk-backed**, and **versioned** sorted string table
//! suitable for embedded databases and key-value storage engines.
//! It provides **multi-version support**, **range tombstones**, **bloom filter-based point lookups**,
//! and **sequence number+timestamp ordering** for crash-safe reads and merges.
//!
//! ## Design Overview
//!
//! ColumnFiles store key-value data in **sorted blocks**, allowing efficient point queries and range scans.
//! Each ColumnFile is immutable once written. Updates (including deletes) are represented as new entries
//! with higher **sequence number** (Log Sequence Number) and **timestamp**, enabling multiple versions of the same key.
//!
//! **Point deletes** and **range tombstones** are stored as special entries to allow fast pruning
//! during reads and merges. Bloom filters are maintained per ColumnFile for quick existence checks
//! before scanning blocks.
//!
//! Data is serialized using a custom [`encoding`] module with **fixed integer encoding**, and block-level CRC32
//! checksums ensure corruption detection.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_FILTER_LEN_LE][BLOOM_FILTER_BYTES][BLOOM_FILTER_CRC32_LE]
//! [RANGE_DELETES_LEN_LE][RANGE_DELETES_BYTES][RANGE_DELETES_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Header** — `ColumnFileHeader` structure with CRC32 checksum.
//! - **Data blocks** — store serialized `ColumnFileCell` entries (key-value or tombstone).
//! - **Bloom filter block** — fast existence checks for point keys.
//! - **Range deletes block** — serialized `ColumnFileRangeTombstoneCell` entries.
//! - **Properties block** — table metadata such as min/max key, LSNs, timestamps, record counts,
//!   and file-level per-column statistics aggregated across every row group.
//! - **Metaindex block** — directory of blocks (bloom, properties, range deletes) for easy lookup.
//! - **Index block** — directory of data blocks, allowing binary search for keys. Each entry
//!   doubles as a row group, carrying its own per-column min/max/null/distinct-estimate stats.
//! - **Footer** — `ColumnFileFooter` structure containing offsets, sizes, and CRC32 checksum.
//!
//! # Sub-modules
//!
//! - [`builder`] — [`ColumnFileWriter`] for building ColumnFiles from sorted streams.
//! - [`iterator`] — [`BlockIterator`], [`BlockEntry`], and [`ScanIterator`] for reading.
//! - [`secondary_index`] — persisted `value -> row_keys` map, consulted only for
//!   selective configured columns.
//!
//! # Concurrency model
//!
//! - ColumnFiles are **immutable**, so reads are lock-free and thread-safe.
//! - Multiple readers can safely access the same ColumnFile concurrently.
//! - No writes occur in-place; updates are appended via **new ColumnFiles**.
//! - Multi-versioning ensures that readers always see a consistent snapshot.
//!
//! # Guarantees
//!
//! - **Immutability:** Once written, an ColumnFile is never modified.
//! - **Multi-version support:** Multiple versions of the same key are preserved with sequence number+timestamp ordering.
//! - **Range deletes:** Efficient representation and merging of point/range deletions.
//! - **Integrity:** Each block and footer contains CRC32 checksums to detect corruption.
//! - **Fast point lookups:** Bloom filter reduces unnecessary block scans.
//! - **Safe merges:** ColumnFiles can be safely merged without affecting existing readers.
//! - **Crash recovery:** Files are written atomically using temporary paths and rename-on-success.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod iterator;
pub mod secondary_index;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

#[allow(unused_imports)] // public API surface for downstream consumers
pub use crate::engine::{PointEntry, RangeTombstone, Record};
pub use builder::ColumnFileWriter;
#[allow(unused_imports)] // public API surface for downstream consumers
pub use iterator::{BlockEntry, BlockIterator, ScanIterator};
#[allow(unused_imports)] // public API surface for downstream consumers
pub use secondary_index::{build_secondary_indexes, SecondaryIndex, SecondaryIndexConfig, SecondaryIndexError};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;

use crate::block_store::{BlockReader, BlockStore};
use crate::encoding::{self, EncodingError};
use crate::engine::utils::Value;
use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const CF_HDR_MAGIC: [u8; 4] = *b"COL0";
const CF_HDR_VERSION: u32 = 1;
const CF_BLOOM_FILTER_FALSE_POSITIVE_RATE: f64 = 0.01;
const CF_DATA_BLOCK_MAX_SIZE: usize = 4096;
const CF_FOOTER_SIZE: usize = 44;
const CF_HDR_SIZE: usize = 12;
const CF_DATA_BLOCK_LEN_SIZE: usize = 4;
const CF_DATA_BLOCK_CHECKSUM_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by ColumnFile operations (read, write, build).
#[derive(Debug, Error)]
pub enum ColumnFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Checksum mistmatch.
    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// ColumnFile file header, written at the beginning of the ColumnFile.
/// Contains a magic number, version, and CRC32 checksum for integrity.
#[derive(Default)]
#[derive(Debug)]
pub(crate) struct ColumnFileHeader {
    /// Magic bytes to identify ColumnFile format (`b"SST0"`).
    magic: [u8; 4],

    /// ColumnFile format version.
    version: u32,

    /// CRC32 checksum of the header (excluding this field).
    header_crc: u32,
}

/// Represents a data block in the ColumnFile, which contains serialized key-value entries.
pub(crate) struct ColumnFileDataBlock {
    /// Raw serialized block data.
    pub(crate) data: Vec<u8>,
}

/// Represents a Bloom filter block used to quickly check the presence of point keys.
#[derive(Debug)]
pub(crate) struct ColumnFileBloomBlock {
    /// Serialized bloom filter bytes.
    pub(crate) data: Vec<u8>,
}

/// Represents a block containing range tombstones.
#[derive(Debug)]
pub(crate) struct ColumnFileRangeTombstoneDataBlock {
    /// List of serialized range tombstone cells.
    pub(crate) data: Vec<ColumnFileRangeTombstoneCell>,
}

/// Per-column statistics captured over a row group or an entire ColumnFile.
///
/// `distinct_estimate` is a capped-cardinality approximation (see
/// [`builder::DISTINCT_CAP`]), not a true HyperLogLog estimator — good
/// enough to decide whether a column is selective, not to report exact
/// cardinality.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: u64,
    pub distinct_estimate: u64,
}

impl encoding::Encode for ColumnStats {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.name, buf)?;
        encoding::Encode::encode_to(&self.min.is_some(), buf)?;
        if let Some(v) = &self.min {
            encoding::Encode::encode_to(v, buf)?;
        }
        encoding::Encode::encode_to(&self.max.is_some(), buf)?;
        if let Some(v) = &self.max {
            encoding::Encode::encode_to(v, buf)?;
        }
        encoding::Encode::encode_to(&self.null_count, buf)?;
        encoding::Encode::encode_to(&self.distinct_estimate, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnStats {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (has_min, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let min = if has_min {
            let (v, n) = Value::decode_from(&buf[off..])?;
            off += n;
            Some(v)
        } else {
            None
        };
        let (has_max, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let max = if has_max {
            let (v, n) = Value::decode_from(&buf[off..])?;
            off += n;
            Some(v)
        } else {
            None
        };
        let (null_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (distinct_estimate, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                name,
                min,
                max,
                null_count,
                distinct_estimate,
            },
            off,
        ))
    }
}

/// Metadata block containing ColumnFile-level properties and statistics.
#[derive(Debug)]
pub struct ColumnFilePropertiesBlock {
    /// Creation timestamp (UNIX epoch nanos).
    pub creation_timestamp: u64,

    /// Total number of records in the ColumnFile.
    pub record_count: u64,

    /// Number of point deletions.
    pub tombstone_count: u64,

    /// Number of range tombstones.
    pub range_tombstones_count: u64,

    /// Minimum sequence number present in this ColumnFile.
    pub min_seq: u64,

    /// Maximum sequence number present in this ColumnFile.
    pub max_seq: u64,

    /// Minimum timestamp in this ColumnFile.
    pub min_timestamp: u64,

    /// Maximum timestamp in this ColumnFile.
    pub max_timestamp: u64,

    /// Minimum key in the ColumnFile.
    pub min_key: Vec<u8>,

    /// Maximum key in the ColumnFile.
    pub max_key: Vec<u8>,

    /// File-level per-column statistics, aggregated across every row group.
    pub column_stats: Vec<ColumnStats>,
}

/// Index entry pointing to a specific data block.
///
/// Each data block doubles as a row group: `row_group_id`/`row_count`
/// identify it and `column_stats` carries its per-column min/max/null/
/// distinct-estimate, the unit footer-statistics pruning reasons about.
#[derive(Debug)]
pub(crate) struct ColumnFileIndexEntry {
    /// Key that separates this block from the next in sorted order.
    pub(crate) separator_key: Vec<u8>,

    /// Block handle containing offset and size of the data block.
    pub(crate) handle: BlockHandle,

    /// Ordinal position of this row group within the file.
    pub(crate) row_group_id: u32,

    /// Number of rows in this row group.
    pub(crate) row_count: u32,

    /// Per-column statistics for this row group.
    pub(crate) column_stats: Vec<ColumnStats>,
}

/// ColumnFile footer, stored at the very end of the file.
#[derive(Debug)]
pub(crate) struct ColumnFileFooter {
    /// Handle of the metaindex block, containing references to:
    /// - bloom filter block
    /// - properties block
    /// - range tombstone blocks
    pub(crate) metaindex: BlockHandle,

    /// Handle of the main index block, mapping separator keys to data blocks.
    pub(crate) index: BlockHandle,

    /// Total size of the ColumnFile file, including this footer.
    pub(crate) total_file_size: u64,

    /// CRC32 checksum computed over the footer fields except this one.
    pub(crate) footer_crc32: u32,
}

/// Represents a single key-value entry (or tombstone) in a data block.
pub(crate) struct ColumnFileCell {
    /// Length of the key in bytes.
    pub(crate) key_len: u32,

    /// Length of the value in bytes (0 if deleted).
    pub(crate) value_len: u32,

    /// Schema version the value bytes were encoded against (0 for tombstones).
    pub(crate) version: u32,

    /// Timestamp of the operation.
    pub(crate) timestamp: u64,

    /// Whether this entry represents a deletion.
    pub(crate) is_delete: bool,

    /// Log Sequence Number for versioning.
    pub(crate) seq: u64,
}

/// Represents a range tombstone marking deletion of keys in `[start_key, end_key)`.
#[derive(Debug)]
pub(crate) struct ColumnFileRangeTombstoneCell {
    /// Start key of the deleted range (inclusive).
    pub(crate) start_key: Vec<u8>,

    /// End key of the deleted range (exclusive).
    pub(crate) end_key: Vec<u8>,

    /// Timestamp of the deletion.
    pub(crate) timestamp: u64,

    /// sequence number of the deletion.
    pub(crate) seq: u64,
}

/// Handle to a block in the ColumnFile file, specifying its offset and size.
#[derive(Debug)]
pub(crate) struct BlockHandle {
    /// Offset of the block in the ColumnFile file.
    pub(crate) offset: u64,

    /// Size of the block in bytes, including length prefix and checksum.
    pub(crate) size: u64,
}

/// Represents a single entry in the metaindex block.
#[derive(Debug)]
pub(crate) struct MetaIndexEntry {
    /// Name of the block (e.g., "filter.bloom", "meta.properties").
    pub(crate) name: String,

    /// Handle pointing to the block location.
    pub(crate) handle: BlockHandle,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

impl encoding::Encode for ColumnFileHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.header_crc, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (header_crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                header_crc,
            },
            off,
        ))
    }
}

impl encoding::Encode for ColumnFileDataBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.data, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileDataBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (data, n) = <Vec<u8>>::decode_from(buf)?;
        Ok((Self { data }, n))
    }
}

impl encoding::Encode for ColumnFileBloomBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.data, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileBloomBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (data, n) = <Vec<u8>>::decode_from(buf)?;
        Ok((Self { data }, n))
    }
}

impl encoding::Encode for ColumnFileCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.key_len, buf)?;
        encoding::Encode::encode_to(&self.value_len, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.is_delete, buf)?;
        encoding::Encode::encode_to(&self.seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (is_delete, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let (seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key_len,
                value_len,
                version,
                timestamp,
                is_delete,
                seq,
            },
            off,
        ))
    }
}

impl encoding::Encode for ColumnFileRangeTombstoneCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.start_key, buf)?;
        encoding::Encode::encode_to(&self.end_key, buf)?;
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileRangeTombstoneCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (start_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (end_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                start_key,
                end_key,
                timestamp,
                seq,
            },
            off,
        ))
    }
}

impl encoding::Encode for ColumnFileRangeTombstoneDataBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.data, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileRangeTombstoneDataBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (data, n) = encoding::decode_vec::<ColumnFileRangeTombstoneCell>(buf)?;
        Ok((Self { data }, n))
    }
}

impl encoding::Encode for ColumnFilePropertiesBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.creation_timestamp, buf)?;
        encoding::Encode::encode_to(&self.record_count, buf)?;
        encoding::Encode::encode_to(&self.tombstone_count, buf)?;
        encoding::Encode::encode_to(&self.range_tombstones_count, buf)?;
        encoding::Encode::encode_to(&self.min_seq, buf)?;
        encoding::Encode::encode_to(&self.max_seq, buf)?;
        encoding::Encode::encode_to(&self.min_timestamp, buf)?;
        encoding::Encode::encode_to(&self.max_timestamp, buf)?;
        encoding::Encode::encode_to(&self.min_key, buf)?;
        encoding::Encode::encode_to(&self.max_key, buf)?;
        encoding::encode_vec(&self.column_stats, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFilePropertiesBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (creation_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (record_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tombstone_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (range_tombstones_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (column_stats, n) = encoding::decode_vec::<ColumnStats>(&buf[off..])?;
        off += n;
        Ok((
            Self {
                creation_timestamp,
                record_count,
                tombstone_count,
                range_tombstones_count,
                min_seq,
                max_seq,
                min_timestamp,
                max_timestamp,
                min_key,
                max_key,
                column_stats,
            },
            off,
        ))
    }
}

impl encoding::Encode for ColumnFileIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.separator_key, buf)?;
        encoding::Encode::encode_to(&self.handle, buf)?;
        encoding::Encode::encode_to(&self.row_group_id, buf)?;
        encoding::Encode::encode_to(&self.row_count, buf)?;
        encoding::encode_vec(&self.column_stats, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (separator_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (row_group_id, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (row_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (column_stats, n) = encoding::decode_vec::<ColumnStats>(&buf[off..])?;
        off += n;
        Ok((
            Self {
                separator_key,
                handle,
                row_group_id,
                row_count,
                column_stats,
            },
            off,
        ))
    }
}

impl encoding::Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.name, buf)?;
        encoding::Encode::encode_to(&self.handle, buf)?;
        Ok(())
    }
}

impl encoding::Decode for MetaIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { name, handle }, off))
    }
}

impl encoding::Encode for ColumnFileFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.metaindex, buf)?;
        encoding::Encode::encode_to(&self.index, buf)?;
        encoding::Encode::encode_to(&self.total_file_size, buf)?;
        encoding::Encode::encode_to(&self.footer_crc32, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ColumnFileFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (metaindex, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                metaindex,
                index,
                total_file_size,
                footer_crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// GetResult
// ------------------------------------------------------------------------------------------------

/// Result of a single key lookup in an ColumnFile.
#[derive(Debug, PartialEq, Clone)]
pub enum GetResult {
    /// A value stored in this SST.
    Put {
        /// Stored value.
        value: Vec<u8>,
        /// Schema version the value was encoded against.
        version: u32,
        /// sequence number of this version.
        seq: u64,
        /// Timestamp of this version.
        timestamp: u64,
    },

    /// A point delete for this key.
    Delete {
        /// sequence number of the delete.
        seq: u64,
        /// Timestamp of the delete.
        timestamp: u64,
    },

    /// The key falls inside a range deletion.
    RangeDelete {
        /// sequence number of the range tombstone.
        seq: u64,
        /// Timestamp of the range tombstone.
        timestamp: u64,
    },

    /// This SST has no information about the key.
    NotFound,
}

impl GetResult {
    /// Returns the **sequence number** (logical sequence number) associated with this get result.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Put { seq, .. } => *seq,
            Self::Delete { seq, .. } => *seq,
            Self::RangeDelete { seq, .. } => *seq,
            Self::NotFound => 0,
        }
    }

    /// Returns the **timestamp** associated with this get result.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Put { timestamp, .. } => *timestamp,
            Self::Delete { timestamp, .. } => *timestamp,
            Self::RangeDelete { timestamp, .. } => *timestamp,
            Self::NotFound => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ColumnFile — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable **Sorted String Table (ColumnFile)**.
#[derive(Debug)]
pub struct ColumnFile {
    /// Unique identifier assigned by the engine (from the catalog).
    /// Set to 0 by `ColumnFile::open()` — the engine sets the correct value after loading.
    pub id: u64,

    /// Memory-mapped blob containing the full ColumnFile bytes.
    pub reader: BlockReader,

    /// Parsed header block containing magic/version information.
    pub(crate) header: ColumnFileHeader,

    /// Bloom filter block for fast membership tests.
    pub(crate) bloom: ColumnFileBloomBlock,

    /// Properties block with statistics and metadata.
    pub properties: ColumnFilePropertiesBlock,

    /// Range delete tombstone block.
    pub(crate) range_deletes: ColumnFileRangeTombstoneDataBlock,

    /// Index entries mapping key ranges to data blocks.
    pub(crate) index: Vec<ColumnFileIndexEntry>,

    /// Footer containing block handles and file integrity data.
    pub(crate) footer: ColumnFileFooter,
}

impl ColumnFile {
    /// Returns the on-disk file size of this ColumnFile in bytes.
    pub fn file_size(&self) -> u64 {
        self.footer.total_file_size
    }

    /// Checks whether `key` *might* exist in this ColumnFile according to the
    /// bloom filter.
    ///
    /// Returns `true` if the bloom says "maybe present" or no bloom exists.
    /// Returns `false` only when the bloom definitively says "not present".
    pub fn bloom_may_contain(&self, key: &[u8]) -> bool {
        if self.bloom.data.is_empty() {
            return true; // no bloom → cannot exclude
        }
        match Bloom::from_slice(&self.bloom.data) {
            Ok(bloom) => bloom.check(key),
            Err(_) => true, // corrupted bloom → assume present
        }
    }

    /// Returns an iterator over the range tombstones stored in this ColumnFile.
    pub fn range_tombstone_iter(&self) -> impl Iterator<Item = crate::engine::RangeTombstone> + '_ {
        self.range_deletes
            .data
            .iter()
            .map(|rd| crate::engine::RangeTombstone {
                start: rd.start_key.clone(),
                end: rd.end_key.clone(),
                seq: rd.seq,
                timestamp: rd.timestamp,
            })
    }

    /// Opens an ColumnFile from disk, verifies its integrity, and loads all top-level
    /// metadata structures.
    ///
    /// # Overview
    ///
    /// This method performs the full ColumnFile loading pipeline:
    ///
    /// 1. **Open and mmap the file**
    ///    The entire table is memory-mapped for fast zero-copy block access.
    ///
    /// 2. **Decode and verify the header**
    ///    - Deserialized using custom encoding
    ///    - Header CRC verified after zeroing the `header_crc` field
    ///    - Magic string and version must match engine constants
    ///
    /// 3. **Decode and verify the footer**
    ///    - Footer CRC is verified similarly
    ///    - Contains block handles for `metaindex` and `index`
    ///
    /// 4. **Load the metaindex block**
    ///    This tells us where the bloom filter, properties block,
    ///    and range deletions block are stored.
    ///
    /// 5. **Load individual blocks**
    ///    - Bloom filter (optional; missing filter → empty bloom)
    ///    - Properties block (required)
    ///    - Range tombstones block (optional)
    ///    - Index block (required)
    ///
    /// 6. **Return a fully initialized `ColumnFile` instance**
    ///
    /// # Errors
    ///
    /// - [`ColumnFileError::ChecksumMismatch`]
    ///   If header or footer checksums fail.
    ///
    /// - [`ColumnFileError::Internal`]
    ///   For malformed blocks, mismatched magic/version, missing properties block,
    ///   out-of-bounds reads, truncated block data, or unrecognized metaindex entries.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because:
    ///
    /// - The file is never written after creation (immutable)
    /// - The mmap is read-only
    /// - All block boundaries are verified before slicing
    pub fn open(store: &dyn BlockStore, name: &str) -> Result<Self, ColumnFileError> {
        let reader = store
            .open_reader(name)
            .map_err(|e| ColumnFileError::Internal(e.to_string()))?;

        let mmap = reader.as_slice();

        let file_len = mmap.len();
        if file_len < CF_FOOTER_SIZE {
            return Err(ColumnFileError::Internal("File too small".into()));
        }

        let (mut header, _) = encoding::decode_from_slice::<ColumnFileHeader>(&mmap[..CF_HDR_SIZE])?;
        let header_checksum = header.header_crc;

        header.header_crc = 0;

        let header_bytes = encoding::encode_to_vec(&header)?;

        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);
        let header_comp_checksum = hasher.finalize();

        if header_checksum != header_comp_checksum {
            return Err(ColumnFileError::ChecksumMismatch);
        }

        if header.magic != CF_HDR_MAGIC {
            return Err(ColumnFileError::Internal(
                "ColumnFile header magic mismatch".into(),
            ));
        }

        if header.version != CF_HDR_VERSION {
            return Err(ColumnFileError::Internal(
                "ColumnFile header version mismatch".into(),
            ));
        }

        let footer_start = file_len - CF_FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<ColumnFileFooter>(&mmap[footer_start..])?;

        let footer_checksum = footer.footer_crc32;
        footer.footer_crc32 = 0;

        let footer_bytes = encoding::encode_to_vec(&footer)?;

        let mut hasher = Crc32::new();
        hasher.update(&footer_bytes);
        let footer_comp_checksum = hasher.finalize();

        if footer_checksum != footer_comp_checksum {
            return Err(ColumnFileError::ChecksumMismatch);
        }

        let metaindex_data = Self::read_block_bytes(&mmap, &footer.metaindex)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&metaindex_data)?;

        let mut bloom_block: Option<BlockHandle> = None;
        let mut propertires_block: Option<BlockHandle> = None;
        let mut range_deletes_block: Option<BlockHandle> = None;

        for entry in meta_entries {
            match entry.name.as_str() {
                "filter.bloom" => bloom_block = Some(entry.handle),
                "meta.properties" => propertires_block = Some(entry.handle),
                "meta.range_deletes" => range_deletes_block = Some(entry.handle),
                _ => return Err(ColumnFileError::Internal("Unexpected match".into())),
            }
        }

        let bloom = if let Some(bh) = bloom_block {
            let bloom_bytes = Self::read_block_bytes(&mmap, &bh)?;
            let (bloom, _) = encoding::decode_from_slice::<ColumnFileBloomBlock>(&bloom_bytes)
                .map_err(|e| ColumnFileError::Internal(e.to_string()))?;
            bloom
        } else {
            let bloom: Bloom<Vec<u8>> =
                Bloom::new_for_fp_rate(1, CF_BLOOM_FILTER_FALSE_POSITIVE_RATE)
                    .map_err(|e| ColumnFileError::Internal(e.to_string()))?;
            ColumnFileBloomBlock {
                data: bloom.as_slice().to_vec(),
            }
        };

        let properties = if let Some(pb) = propertires_block {
            let pbytes = Self::read_block_bytes(&mmap, &pb)?;
            let (properties, _) = encoding::decode_from_slice::<ColumnFilePropertiesBlock>(&pbytes)?;
            properties
        } else {
            return Err(ColumnFileError::Internal("ColumnFile missing properties".into()));
        };

        let range_deletes = if let Some(rh) = range_deletes_block {
            let rbytes = Self::read_block_bytes(&mmap, &rh)?;
            let (ranges, _) = encoding::decode_vec::<ColumnFileRangeTombstoneCell>(&rbytes)?;
            ColumnFileRangeTombstoneDataBlock { data: ranges }
        } else {
            ColumnFileRangeTombstoneDataBlock { data: Vec::new() }
        };

        let index_bytes = Self::read_block_bytes(&mmap, &footer.index)?;
        let (index_entries, _) = encoding::decode_vec::<ColumnFileIndexEntry>(&index_bytes)?;

        Ok(Self {
            id: 0,
            reader,
            header,
            bloom,
            properties,
            range_deletes,
            index: index_entries,
            footer,
        })
    }

    /// Performs a **single-SST lookup** of a key.
    ///
    /// Returns the "raw MVCC" result from this ColumnFile alone. Higher-level LSM
    /// layers apply merging across tables.
    ///
    /// # Lookup pipeline
    ///
    /// 1. **Check range tombstones**
    ///    Determines whether the key is inside a range deletion.
    ///
    /// 2. **Bloom filter check**
    ///    If the bloom filter says the key is impossible, skip data block search.
    ///
    /// 3. **Find data block using the index**
    ///    Binary search on separator keys.
    ///
    /// 4. **Search inside the block**
    ///    Using `BlockIterator`, seek to the key and collect the newest version.
    ///
    /// 5. **Merge point entries with range tombstone**
    ///    Range deletes override older point entries.
    ///
    /// # Returns
    ///
    /// A [`GetResult`] variant:
    /// - `Put` – newest put
    /// - `Delete` – newest point delete
    /// - `RangeDelete` – covered by a tombstone
    /// - `NotFound` – no information in this ColumnFile
    ///
    /// # MVCC rules
    ///
    /// Version comparison uses:
    /// - Primary: sequence number
    /// - Secondary: timestamp (tie-breaking)
    pub fn get(&self, key: &[u8]) -> Result<GetResult, ColumnFileError> {
        // 1) Check range tombstones first
        let range_info = self.covering_range_for_key(key);

        // 2) Bloom filter check (only point keys)
        let bloom_maybe_present = if !self.bloom.data.is_empty() {
            match Bloom::from_slice(&self.bloom.data) {
                Ok(bloom) => bloom.check(key),
                Err(_) => true, // corrupted bloom → fallback to full search
            }
        } else {
            true // no bloom → always search block
        };

        if !bloom_maybe_present {
            return Ok(match range_info {
                Some((seq, timestamp)) => GetResult::RangeDelete { seq, timestamp },
                None => GetResult::NotFound,
            });
        }

        // 3) Find the block (if any)
        if self.index.is_empty() {
            return Ok(match range_info {
                Some((seq, timestamp)) => GetResult::RangeDelete { seq, timestamp },
                None => GetResult::NotFound,
            });
        }

        let block_idx = self.find_block_for_key(key);
        let entry = &self.index[block_idx];

        let raw = Self::read_block_bytes(self.reader.as_slice(), &entry.handle)?;
        let (block, _) = encoding::decode_from_slice::<ColumnFileDataBlock>(&raw)?;

        // 4) Scan block using BlockIterator (point keys)
        let mut iter = BlockIterator::new(block.data);
        iter.seek_to(key);
        let mut latest: Option<GetResult> = None;

        for item in iter {
            if item.key != key {
                break;
            }

            let candidate = if item.is_delete {
                GetResult::Delete {
                    seq: item.seq,
                    timestamp: item.timestamp,
                }
            } else {
                GetResult::Put {
                    value: item.value.to_vec(),
                    version: item.version,
                    seq: item.seq,
                    timestamp: item.timestamp,
                }
            };

            latest = Some(match &latest {
                Some(existing) => {
                    if candidate.seq() > existing.seq() {
                        candidate
                    } else if candidate.seq() == existing.seq() {
                        // tie-breaker by timestamp
                        if candidate.timestamp() > existing.timestamp() {
                            candidate
                        } else {
                            existing.clone()
                        }
                    } else {
                        existing.clone()
                    }
                }
                None => candidate,
            });
        }

        // 5) Merge point vs range tombstone (sequence number + timestamp)
        match (latest, range_info) {
            // No point, no range delete → not found
            (None, None) => Ok(GetResult::NotFound),

            // Point exists, no range delete → point result wins
            (Some(r), None) => Ok(r),

            // No point entry, but we have a range delete
            (None, Some((seq, timestamp))) => Ok(GetResult::RangeDelete { seq, timestamp }),

            // Everything else: point_result = Some(_), range_lsn = Some(_)
            (Some(point), Some((r_lsn, r_ts))) => {
                let result = match point {
                    GetResult::Put {
                        value,
                        version,
                        seq: p_lsn,
                        timestamp: p_ts,
                    } => {
                        if r_lsn > p_lsn || (r_lsn == p_lsn && r_ts > p_ts) {
                            GetResult::RangeDelete {
                                seq: r_lsn,
                                timestamp: r_ts,
                            }
                        } else {
                            GetResult::Put {
                                value,
                                version,
                                seq: p_lsn,
                                timestamp: p_ts,
                            }
                        }
                    }
                    GetResult::Delete {
                        seq: d_lsn,
                        timestamp: d_ts,
                    } => {
                        if r_lsn > d_lsn || (r_lsn == d_lsn && r_ts > d_ts) {
                            GetResult::RangeDelete {
                                seq: r_lsn,
                                timestamp: r_ts,
                            }
                        } else {
                            GetResult::Delete {
                                seq: d_lsn,
                                timestamp: d_ts,
                            }
                        }
                    }
                    GetResult::RangeDelete {
                        seq: rd_lsn,
                        timestamp: rd_ts,
                    } => {
                        let (seq, ts) = if r_lsn > rd_lsn || (r_lsn == rd_lsn && r_ts > rd_ts) {
                            (r_lsn, r_ts)
                        } else {
                            (rd_lsn, rd_ts)
                        };
                        GetResult::RangeDelete { seq, timestamp: ts }
                    }
                    GetResult::NotFound => GetResult::RangeDelete {
                        seq: r_lsn,
                        timestamp: r_ts,
                    },
                };

                Ok(result)
            }
        }
    }

    /// Returns a range-scan iterator over this ColumnFile.
    ///
    /// The iterator yields **raw MVCC entries** (Put/Delete/RangeDelete) in key order.
    /// Key ordered ascending with sequence number ordered descending within each key.
    /// Higher layers of the LSM tree (merging iterators) are responsible for
    /// de-duplicating versions and reconciling deletes.
    ///
    /// # Parameters
    ///
    /// - `start_key` — inclusive start of scan
    /// - `end_key` — exclusive upper bound of scan
    ///
    /// # Returns
    ///
    /// [`ScanIterator`] which merges:
    ///
    /// - data blocks covering the range
    /// - range tombstone iterator
    ///
    /// to produce sorted MVCC entries.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<impl Iterator<Item = Record> + use<'_>, ColumnFileError> {
        ScanIterator::new(self, start_key.to_vec(), end_key.to_vec())
    }

    /// Reads a block referenced by a [`BlockHandle`] from the mmap and verifies
    /// its checksum.
    pub(crate) fn read_block_bytes(
        mmap: &[u8],
        handle: &BlockHandle,
    ) -> Result<Vec<u8>, ColumnFileError> {
        let start = usize::try_from(handle.offset)
            .map_err(|_| ColumnFileError::Internal("block offset exceeds addressable range".into()))?;
        let size = usize::try_from(handle.size)
            .map_err(|_| ColumnFileError::Internal("block size exceeds addressable range".into()))?;

        if start + size > mmap.len() {
            return Err(ColumnFileError::Internal("Block out of range".into()));
        }

        let mut cursor = start;

        let len_bytes: [u8; CF_DATA_BLOCK_LEN_SIZE] = mmap
            [cursor..cursor + CF_DATA_BLOCK_LEN_SIZE]
            .try_into()
            .map_err(|_| ColumnFileError::Internal("Short block length".into()))?;
        let content_len = u32::from_le_bytes(len_bytes) as usize;
        cursor += CF_DATA_BLOCK_LEN_SIZE;

        if start + content_len > mmap.len() {
            return Err(ColumnFileError::Internal("Block out of range".into()));
        }

        let content = &mmap[cursor..cursor + content_len];
        cursor += content_len;

        let checksum_bytes: [u8; CF_DATA_BLOCK_CHECKSUM_SIZE] = mmap
            [cursor..cursor + CF_DATA_BLOCK_CHECKSUM_SIZE]
            .try_into()
            .map_err(|_| ColumnFileError::Internal("Short checksum".into()))?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut hasher = Crc32::new();
        hasher.update(content);
        let computed_checksum = hasher.finalize();

        if computed_checksum != stored_checksum {
            return Err(ColumnFileError::ChecksumMismatch);
        }

        Ok(content.to_vec())
    }

    /// Locates the index entry whose block may contain the given `key`.
    ///
    /// Uses binary search over `separator_key`, which stores the first key in each
    /// block.
    pub(crate) fn find_block_for_key(&self, key: &[u8]) -> usize {
        if self.index.is_empty() {
            return 0;
        }

        match self
            .index
            .binary_search_by(|entry| entry.separator_key.as_slice().cmp(key))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Returns the newest (highest sequence number, then highest timestamp) range tombstone
    /// that covers the given `key`, if any.
    fn covering_range_for_key(&self, key: &[u8]) -> Option<(u64, u64)> {
        let mut res: Option<(u64, u64)> = None;
        for rd in &self.range_deletes.data {
            if key >= rd.start_key.as_slice() && key < rd.end_key.as_slice() {
                res = Some(match res {
                    Some((prev_lsn, prev_ts)) => {
                        if rd.seq > prev_lsn || (rd.seq == prev_lsn && rd.timestamp > prev_ts) {
                            (rd.seq, rd.timestamp)
                        } else {
                            (prev_lsn, prev_ts)
                        }
                    }
                    None => (rd.seq, rd.timestamp),
                });
            }
        }
        res
    }
}
