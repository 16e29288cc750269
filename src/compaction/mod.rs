//! # Compaction Engine
//!
//! Implements **leveled compaction**: L0 admits overlapping files straight
//! from memtable flushes; L1..LN maintain non-overlapping key ranges per
//! level, with level byte budgets growing geometrically (`levels.multiplier`,
//! default 10x). The concrete trigger policy, input selection, and worker
//! scheduling live in [`leveled`]; this module holds the parts shared by any
//! future strategy: the merge/retention pass and output-file construction.
//!
//! ## Version retention
//!
//! During a merge, a key's older versions are reclaimable once a strictly
//! newer version exists in the input *and* no snapshot held by any reader is
//! at or below that newer version's sequence minus one — see
//! [`dedup_and_retain`]. Point and range tombstones are dropped outright only
//! when the job's output targets the deepest level currently holding data
//! for the tenant (`is_bottom_level`): below that point no older data can
//! exist anywhere in the store for the tombstone to still be shadowing.

pub mod leveled;

use crate::block_store::BlockStoreError;
use crate::catalog::CatalogError;
use crate::catalog::Catalog;
use crate::column_file::{build_secondary_indexes, ColumnFileError, ColumnFileWriter, PointEntry, RangeTombstone, Record, SecondaryIndexConfig};
use crate::encoding::EncodingError;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Unified error type for the compaction engine.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("column file error: {0}")]
    ColumnFile(#[from] ColumnFileError),

    #[error("block store error: {0}")]
    Store(#[from] BlockStoreError),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("internal compaction error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tuning knobs for the leveled compaction engine.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// L0 is compacted once its live file count exceeds this threshold.
    pub l0_file_count_trigger: usize,

    /// Writers are stalled once L0's live file count reaches this threshold.
    pub l0_file_count_stall: usize,

    /// Geometric growth factor applied to each level's byte budget.
    pub level_multiplier: u64,

    /// Byte budget of L1; `max_size(k) = l1_max_bytes * multiplier^(k-1)`.
    pub l1_max_bytes: u64,

    /// Target output file size for L1; grows by `level_multiplier.sqrt()`-ish
    /// modest steps per level, capped so individual files stay manageable.
    pub l1_target_file_bytes: u64,

    /// Deepest level (`N`); levels are `0..=max_level`.
    pub max_level: u32,

    /// Background compaction worker count.
    pub workers: usize,

    /// Columns to maintain a persisted secondary index for, and the
    /// selectivity gate that decides when the query executor consults it.
    pub secondary_index: SecondaryIndexConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            l0_file_count_trigger: 4,
            l0_file_count_stall: 12,
            level_multiplier: 10,
            l1_max_bytes: 64 * 1024 * 1024,
            l1_target_file_bytes: 64 * 1024 * 1024,
            max_level: 6,
            workers: 2,
            secondary_index: SecondaryIndexConfig::default(),
        }
    }
}

impl CompactionConfig {
    /// Byte budget that triggers compaction out of level `k` (`k >= 1`).
    pub fn max_size(&self, level: u32) -> u64 {
        debug_assert!(level >= 1);
        self.l1_max_bytes.saturating_mul(self.level_multiplier.saturating_pow(level - 1))
    }

    /// Target size of a single output file written into level `k` (`k >= 1`).
    /// Grows modestly with depth so bottom levels aren't pinned to L1-sized
    /// shards forever, without reproducing the full level byte budget.
    pub fn target_file_bytes(&self, level: u32) -> u64 {
        debug_assert!(level >= 1);
        let steps = level.saturating_sub(1).min(3);
        self.l1_target_file_bytes.saturating_mul(1u64 << steps)
    }
}

/// Blob name under which a column file for `(tenant_id, level, file_id)` is stored.
pub fn file_blob_name(tenant_id: &str, level: u32, file_id: u64) -> String {
    format!("files/{tenant_id}/L{level}/{file_id:012}.col")
}

/// Blob name for the persisted secondary index of `column` over the column
/// file identified by `(tenant_id, level, file_id)`.
pub fn sidx_blob_name(tenant_id: &str, level: u32, file_id: u64, column: &str) -> String {
    format!("files/{tenant_id}/L{level}/{file_id:012}.sidx.{column}")
}

// ------------------------------------------------------------------------------------------------
// Version retention / tombstone drop
// ------------------------------------------------------------------------------------------------

/// Consumes a `(key ASC, seq DESC)`-sorted [`Record`] stream and emits the
/// surviving point entries and range tombstones.
///
/// For each row key, keeps every version with `seq > min_active_snapshot`,
/// plus the first version at or below it (the "newest version <= snapshot"
/// a low-snapshot reader still needs); everything older than that is
/// reclaimed. With no held snapshot (`min_active_snapshot = None`), only the
/// newest version per key survives.
///
/// When `drop_shadowed_tombstones` is set (the job's output targets the
/// deepest level holding data for this tenant), a key whose sole surviving
/// version is a point delete is dropped entirely, and no range tombstones
/// are emitted at all — nothing further down the store could still depend
/// on them.
pub fn dedup_and_retain(
    records: impl Iterator<Item = Record>,
    min_active_snapshot: Option<u64>,
    drop_shadowed_tombstones: bool,
) -> (Vec<PointEntry>, Vec<RangeTombstone>) {
    let mut points = Vec::new();
    let mut ranges = Vec::new();

    let mut current_key: Option<Vec<u8>> = None;
    let mut emitted_le_snapshot = false;
    let mut current_key_survivors = 0usize;
    let mut pending_tombstone: Option<PointEntry> = None;

    let flush_pending = |pending: &mut Option<PointEntry>, survivors: usize, points: &mut Vec<PointEntry>| {
        if let Some(entry) = pending.take() {
            if !(drop_shadowed_tombstones && survivors == 1) {
                points.push(entry);
            }
        }
    };

    for record in records {
        match record {
            Record::RangeDelete { start, end, seq, timestamp } => {
                if drop_shadowed_tombstones {
                    continue;
                }
                if min_active_snapshot.is_none_or(|snap| seq > snap) {
                    ranges.push(RangeTombstone { start, end, seq, timestamp });
                }
                // Range tombstones below the snapshot but needed by lower
                // snapshots are still retained conservatively — the
                // overlap/shadow analysis across files is not attempted here.
                else {
                    ranges.push(RangeTombstone { start, end, seq, timestamp });
                }
            }
            Record::Put { key, columns, version, seq, timestamp } => {
                if current_key.as_deref() != Some(key.as_slice()) {
                    flush_pending(&mut pending_tombstone, current_key_survivors, &mut points);
                    current_key = Some(key.clone());
                    emitted_le_snapshot = false;
                    current_key_survivors = 0;
                }

                let keep = match min_active_snapshot {
                    None => current_key_survivors == 0,
                    Some(snap) => {
                        if seq > snap {
                            true
                        } else if !emitted_le_snapshot {
                            emitted_le_snapshot = true;
                            true
                        } else {
                            false
                        }
                    }
                };

                if keep {
                    current_key_survivors += 1;
                    let value = crate::engine::utils::encode_row(&columns)
                        .expect("compaction input row re-encodes deterministically");
                    points.push(PointEntry { key, value: Some(value), version, seq, timestamp });
                }
            }
            Record::Delete { key, seq, timestamp } => {
                if current_key.as_deref() != Some(key.as_slice()) {
                    flush_pending(&mut pending_tombstone, current_key_survivors, &mut points);
                    current_key = Some(key.clone());
                    emitted_le_snapshot = false;
                    current_key_survivors = 0;
                }

                let keep = match min_active_snapshot {
                    None => current_key_survivors == 0,
                    Some(snap) => {
                        if seq > snap {
                            true
                        } else if !emitted_le_snapshot {
                            emitted_le_snapshot = true;
                            true
                        } else {
                            false
                        }
                    }
                };

                if keep {
                    current_key_survivors += 1;
                    let entry = PointEntry { key, value: None, version: 0, seq, timestamp };
                    if current_key_survivors == 1 {
                        pending_tombstone = Some(entry);
                    } else {
                        points.push(entry);
                    }
                }
            }
        }
    }

    flush_pending(&mut pending_tombstone, current_key_survivors, &mut points);
    (points, ranges)
}

// ------------------------------------------------------------------------------------------------
// Output file construction
// ------------------------------------------------------------------------------------------------

/// One file's worth of content, ready to be written and registered.
pub struct OutputChunk {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub min_seq: u64,
    pub max_seq: u64,
    pub row_count: u64,
    pub schema_version: u32,
    pub points: Vec<PointEntry>,
    pub ranges: Vec<RangeTombstone>,
}

/// Splits `points`/`ranges` into size-bounded chunks, each destined for one
/// output column file. Range tombstones all travel with the last chunk —
/// queries reunite records across every file a key range touches, via
/// [`crate::engine::visibility::VisibilityFilter`] over the merged scan, so a
/// tombstone does not need to live in the same physical file as the point
/// entries it shadows.
pub fn chunk_outputs(points: Vec<PointEntry>, ranges: Vec<RangeTombstone>, target_bytes: u64) -> Vec<OutputChunk> {
    if points.is_empty() {
        if ranges.is_empty() {
            return Vec::new();
        }
        let min_key = ranges.iter().map(|r| r.start.clone()).min().unwrap_or_default();
        let max_key = ranges.iter().map(|r| r.end.clone()).max().unwrap_or_default();
        let min_seq = ranges.iter().map(|r| r.seq).min().unwrap_or(0);
        let max_seq = ranges.iter().map(|r| r.seq).max().unwrap_or(0);
        return vec![OutputChunk {
            min_key,
            max_key,
            min_seq,
            max_seq,
            row_count: 0,
            schema_version: 0,
            points: Vec::new(),
            ranges,
        }];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<PointEntry> = Vec::new();
    let mut current_bytes = 0u64;

    for entry in points {
        let entry_bytes = (entry.key.len() + entry.value.as_ref().map_or(0, |v| v.len()) + 32) as u64;
        if !current.is_empty() && current_bytes + entry_bytes > target_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += entry_bytes;
        current.push(entry);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, points)| {
            let min_key = points.first().map(|p| p.key.clone()).unwrap_or_default();
            let max_key = points.last().map(|p| p.key.clone()).unwrap_or_default();
            let min_seq = points.iter().map(|p| p.seq).min().unwrap_or(0);
            let max_seq = points.iter().map(|p| p.seq).max().unwrap_or(0);
            let schema_version = points.iter().map(|p| p.version).max().unwrap_or(0);
            let row_count = points.len() as u64;
            OutputChunk {
                min_key,
                max_key,
                min_seq,
                max_seq,
                row_count,
                schema_version,
                points,
                ranges: if i == last { ranges.clone() } else { Vec::new() },
            }
        })
        .collect()
}

/// Writes `chunk` through `store` at `name`, along with any secondary
/// indexes configured for `tenant_id`'s schema.
pub fn write_chunk(
    store: &dyn crate::block_store::BlockStore,
    name: &str,
    chunk: &OutputChunk,
    catalog: &Catalog,
    tenant_id: &str,
    level: u32,
    file_id: u64,
    secondary_index: &SecondaryIndexConfig,
) -> Result<(), CompactionError> {
    let point_count = chunk.points.len();
    let range_count = chunk.ranges.len();
    let schema = catalog.get_schema(tenant_id, chunk.schema_version)?;

    ColumnFileWriter::new(store, name).build(chunk.points.clone().into_iter(), point_count, chunk.ranges.clone().into_iter(), range_count, schema.as_ref())?;

    build_secondary_indexes(store, &chunk.points, schema.as_ref(), secondary_index, |column| sidx_blob_name(tenant_id, level, file_id, column))
        .map_err(|e| CompactionError::Internal(e.to_string()))?;
    Ok(())
}
