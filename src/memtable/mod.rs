//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - All writes are WAL-first and assigned a monotonically increasing sequence number.
//! - The memtable may contain multiple versions per row key; the highest-sequence
//!   version is considered authoritative.
//! - Deletes are represented via tombstones, not physical removal.
//! - Range tombstones logically delete all keys in `[start, end)` with lower sequence numbers.
//! - Reads (`get`, `scan`) always resolve point entries against range tombstones.
//! - One memtable instance holds the rows of a single tenant; the engine owns one active
//!   memtable per tenant so that a tenant's flush/compaction cadence never blocks another's.
//!
//! ## Flush Semantics
//!
//! - `iter_for_flush` returns a *logical snapshot* of the memtable state.
//! - Returned records are sufficient to reconstruct the same memtable state via WAL replay.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Frozen Memtable
//!
//! - A `FrozenMemtable` is read-only.
//! - It retains ownership of the WAL to guarantee durability until data is persisted to
//!   column files.

#[cfg(test)]
mod tests;

mod encoding_impls;

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::block_store::BlockStore;
use crate::wal::{FsyncPolicy, Wal, WalError};
use thiserror::Error;
use tracing::{error, info, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    WAL(#[from] WalError),

    /// Write buffer limit reached; a flush is required before further writes.
    #[error("Flush required")]
    FlushRequired,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer for one tenant's rows.
///
/// The memtable:
/// - Accepts writes (`put`, `delete`, `delete_range`)
/// - Persists all mutations to a WAL
/// - Serves reads (`get`, `scan`)
/// - Can be logically flushed via `iter_for_flush`
///
/// Internally, the memtable stores **multiple versions per row key** ordered
/// by descending sequence number. Resolution is deferred to read time.
///
/// # Concurrency
/// - Writers acquire an exclusive lock
/// - Readers may proceed concurrently
///
/// # Durability
/// - Every mutation is appended to the WAL *before* being applied in memory
pub struct Memtable {
    tenant_id: String,
    inner: Arc<RwLock<MemtableInner>>,
    pub wal: Wal<MemtableRecord>,
    next_seq: AtomicU64,
}

/// A single versioned point entry stored in the memtable.
///
/// A row key may have multiple `MemtableSingleEntry` versions, ordered by sequence number.
/// The highest-sequence entry is considered the latest. Deletions are represented by
/// tombstones (`is_delete = true`). `row` holds the encoded `Vec<Value>` column payload
/// (see [`crate::engine::utils::Value`]), validated against schema `version` at write time.
#[derive(Debug, PartialEq, Clone)]
pub struct MemtableSingleEntry {
    pub row: Option<Vec<u8>>,
    pub version: u32,
    pub timestamp: u64,
    pub is_delete: bool,
    pub seq: u64,
}

/// A range tombstone that logically deletes rows in `[start, end)`.
///
/// Range tombstones are versioned via sequence number and may overlap. During reads, the
/// highest-sequence tombstone covering a row key takes precedence.
#[derive(Clone, Debug)]
pub struct MemtableRangeTombstone {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seq: u64,
    pub timestamp: u64,
}

/// A logical WAL record representing a memtable mutation.
///
/// These records are appended to the WAL, replayed during recovery, and emitted during
/// memtable flush. Together, they form a complete, replayable history.
#[derive(Debug, PartialEq)]
pub enum MemtableRecord {
    /// Insert or update a single row, `row` being its encoded column values.
    Put {
        key: Vec<u8>,
        row: Vec<u8>,
        version: u32,
        seq: u64,
        timestamp: u64,
    },

    /// Delete a single row.
    Delete { key: Vec<u8>, seq: u64, timestamp: u64 },

    /// Delete all rows in `[start, end)`.
    RangeDelete {
        start: Vec<u8>,
        end: Vec<u8>,
        seq: u64,
        timestamp: u64,
    },
}

impl MemtableRecord {
    pub fn seq(&self) -> u64 {
        match self {
            MemtableRecord::Put { seq, .. }
            | MemtableRecord::Delete { seq, .. }
            | MemtableRecord::RangeDelete { seq, .. } => *seq,
        }
    }
}

impl crate::wal::WalData for MemtableRecord {
    fn sequence_number(&self) -> u64 {
        self.seq()
    }
}

/// Result of a `get` operation on the memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Row found, with the schema version it was written under.
    Put(Vec<u8>, u32),
    /// Row was deleted by a point tombstone.
    Delete,
    /// Row was deleted by a range tombstone.
    RangeDelete,
    /// Row not present.
    NotFound,
}

/// Internal shared state of the memtable.
///
/// This structure is protected by an `RwLock` and must never be accessed directly outside
/// the memtable implementation.
struct MemtableInner {
    tree: BTreeMap<Vec<u8>, BTreeMap<Reverse<u64>, MemtableSingleEntry>>,
    range_tombstones: BTreeMap<Vec<u8>, BTreeMap<Reverse<u64>, MemtableRangeTombstone>>,
    approximate_size: usize,
    write_buffer_size: usize,
}

impl Memtable {
    /// Creates a new mutable [`Memtable`] for `tenant_id`, backed by a write-ahead log segment
    /// named `wal_name` within `store`.
    ///
    /// Replays the WAL (if present) to reconstruct the in-memory state, and restores the
    /// highest observed sequence number so subsequent writes continue monotonically.
    pub fn new(
        tenant_id: impl Into<String>,
        store: Arc<dyn BlockStore>,
        wal_name: &str,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
        fsync_policy: FsyncPolicy,
    ) -> Result<Self, MemtableError> {
        let tenant_id = tenant_id.into();
        info!(tenant = %tenant_id, "initializing memtable with WAL replay");

        let wal = Wal::open(store, wal_name, max_record_size, fsync_policy, Self::current_timestamp())?;

        let mut inner = MemtableInner {
            tree: BTreeMap::new(),
            range_tombstones: BTreeMap::new(),
            approximate_size: 0,
            write_buffer_size,
        };

        let mut max_seq_seen: u64 = 0;

        for record in wal.replay_iter()? {
            let record: MemtableRecord = record?;
            match record {
                MemtableRecord::Put { key, row, version, seq, timestamp } => {
                    let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len() + row.len();
                    inner.approximate_size += record_size;
                    max_seq_seen = max_seq_seen.max(seq);

                    let entry = MemtableSingleEntry { row: Some(row), version, timestamp, is_delete: false, seq };
                    inner.tree.entry(key).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
                }
                MemtableRecord::Delete { key, seq, timestamp } => {
                    let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len();
                    inner.approximate_size += record_size;
                    max_seq_seen = max_seq_seen.max(seq);

                    let entry = MemtableSingleEntry { row: None, version: 0, timestamp, is_delete: true, seq };
                    inner.tree.entry(key).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
                }
                MemtableRecord::RangeDelete { start, end, seq, timestamp } => {
                    let record_size = std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len();
                    inner.approximate_size += record_size;
                    max_seq_seen = max_seq_seen.max(seq);

                    let entry = MemtableRangeTombstone { start: start.clone(), end, seq, timestamp };
                    inner.range_tombstones.entry(start).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
                }
            }
        }

        info!(tenant = %tenant_id, max_seq = max_seq_seen, "memtable initialized");

        Ok(Self {
            tenant_id,
            inner: Arc::new(RwLock::new(inner)),
            wal,
            next_seq: AtomicU64::new(max_seq_seen.saturating_add(1)),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Inserts or updates a row. `row` is the caller's already-encoded `Vec<Value>` payload,
    /// validated against schema `version` before this call.
    pub fn put(&self, key: Vec<u8>, row: Vec<u8>, version: u32) -> Result<u64, MemtableError> {
        trace!(key = %HexKey(&key), "put() started");

        if key.is_empty() {
            return Err(MemtableError::Internal("key is empty".to_string()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len() + row.len();

        let record = MemtableRecord::Put { key: key.clone(), row: row.clone(), version, seq, timestamp };

        let mut guard = self.inner.write().map_err(|_| {
            error!("read-write lock poisoned during put");
            MemtableError::Internal("read-write lock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append(&record)?;

        let entry = MemtableSingleEntry { row: Some(row), version, timestamp, is_delete: false, seq };
        guard.tree.entry(key).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
        guard.approximate_size += record_size;

        trace!(seq, "put completed");
        Ok(seq)
    }

    /// Deletes a row by inserting a point tombstone.
    pub fn delete(&self, key: Vec<u8>) -> Result<u64, MemtableError> {
        trace!(key = %HexKey(&key), "delete() started");

        if key.is_empty() {
            return Err(MemtableError::Internal("key is empty".to_string()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len();

        let record = MemtableRecord::Delete { key: key.clone(), seq, timestamp };

        let mut guard = self.inner.write().map_err(|_| {
            error!("read-write lock poisoned during delete");
            MemtableError::Internal("read-write lock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append(&record)?;

        let entry = MemtableSingleEntry { row: None, version: 0, timestamp, is_delete: true, seq };
        guard.tree.entry(key).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
        guard.approximate_size += record_size;

        trace!(seq, "delete completed");
        Ok(seq)
    }

    /// Deletes all rows in `[start, end)`.
    pub fn delete_range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<u64, MemtableError> {
        trace!(start = %HexKey(&start), end = %HexKey(&end), "delete_range() started");

        if start.is_empty() || end.is_empty() {
            return Err(MemtableError::Internal("start or end key is empty".to_string()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len();

        let record = MemtableRecord::RangeDelete { start: start.clone(), end: end.clone(), seq, timestamp };

        let mut guard = self.inner.write().unwrap();

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append(&record)?;

        let entry = MemtableRangeTombstone { start: start.clone(), end, seq, timestamp };
        guard.range_tombstones.entry(start).or_insert_with(BTreeMap::new).insert(Reverse(seq), entry);
        guard.approximate_size += record_size;

        trace!(seq, "delete_range completed");
        Ok(seq)
    }

    /// Retrieves the latest visible row for `key`.
    ///
    /// Resolution rules: select the highest-sequence point entry, check all covering range
    /// tombstones, and treat a tombstone with a higher sequence number as a delete.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        trace!(key = %HexKey(key), "get() started");

        let guard = self.inner.read().map_err(|_| {
            error!("read-write lock poisoned during get");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let point_opt = guard.tree.get(key).and_then(|versions| versions.values().next());

        let mut covering_tombstone_seq: Option<u64> = None;
        for (_start, versions) in guard.range_tombstones.range(..=key.to_vec()) {
            if let Some(tombstone) = versions.values().next() {
                if tombstone.start.as_slice() <= key && key < tombstone.end.as_slice() {
                    covering_tombstone_seq =
                        Some(covering_tombstone_seq.map(|s| s.max(tombstone.seq)).unwrap_or(tombstone.seq));
                }
            }
        }

        match (point_opt, covering_tombstone_seq) {
            (None, None) => Ok(MemtableGetResult::NotFound),
            (None, Some(_)) => Ok(MemtableGetResult::RangeDelete),
            (Some(point), None) => {
                if point.is_delete {
                    Ok(MemtableGetResult::Delete)
                } else {
                    Ok(MemtableGetResult::Put(
                        point.row.clone().expect("non-delete point entry must have a row"),
                        point.version,
                    ))
                }
            }
            (Some(point), Some(tombstone_seq)) => {
                if tombstone_seq > point.seq {
                    Ok(MemtableGetResult::RangeDelete)
                } else if point.is_delete {
                    Ok(MemtableGetResult::Delete)
                } else {
                    Ok(MemtableGetResult::Put(
                        point.row.clone().expect("non-delete point entry must have a row"),
                        point.version,
                    ))
                }
            }
        }
    }

    /// Performs an ordered range scan over `[start, end)`. Deleted rows are omitted.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableSingleEntry)>, MemtableError> {
        trace!(start = %HexKey(start), end = %HexKey(end), "scan() started");

        if start >= end {
            return Ok(Vec::new().into_iter());
        }

        let guard = self.inner.read().map_err(|_| {
            error!("read-write lock poisoned during scan");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut records = Vec::new();

        for (key, versions) in guard.tree.range(start.to_vec()..end.to_vec()) {
            let Some(point) = versions.values().next() else { continue };
            if point.is_delete {
                continue;
            }

            let mut tombstone_seq = 0;
            for (_start, t_versions) in guard.range_tombstones.range(..=key.clone()) {
                if let Some(t) = t_versions.values().next() {
                    if t.start.as_slice() <= key.as_slice() && key.as_slice() < t.end.as_slice() {
                        tombstone_seq = tombstone_seq.max(t.seq);
                    }
                }
            }

            if tombstone_seq > point.seq {
                continue;
            }

            records.push((key.clone(), point.clone()));
        }

        Ok(records.into_iter())
    }

    /// Returns a logical snapshot of the memtable suitable for flushing: the latest version
    /// of every row key (put or delete), plus all range tombstones. Does not mutate state.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        let guard = self.inner.read().map_err(|_| {
            error!("read-write lock poisoned during iter_for_flush");
            MemtableError::Internal("read-write lock poisoned".into())
        })?;

        let mut records = Vec::new();

        for (key, versions) in guard.tree.iter() {
            if let Some(entry) = versions.values().next() {
                let record = if entry.is_delete {
                    MemtableRecord::Delete { key: key.clone(), seq: entry.seq, timestamp: entry.timestamp }
                } else {
                    MemtableRecord::Put {
                        key: key.clone(),
                        row: entry.row.clone().unwrap(),
                        version: entry.version,
                        seq: entry.seq,
                        timestamp: entry.timestamp,
                    }
                };
                records.push(record);
            }
        }

        for (start, versions) in guard.range_tombstones.iter() {
            for entry in versions.values() {
                records.push(MemtableRecord::RangeDelete {
                    start: start.clone(),
                    end: entry.end.clone(),
                    seq: entry.seq,
                    timestamp: entry.timestamp,
                });
            }
        }

        Ok(records.into_iter())
    }

    /// Converts this mutable memtable into an immutable [`FrozenMemtable`], retaining the WAL
    /// until the data is durably reflected in a flushed column file.
    pub fn frozen(self) -> Result<FrozenMemtable, MemtableError> {
        Ok(FrozenMemtable::new(self))
    }

    /// Overrides the current sequence counter with a recovered value. Must only be called
    /// during recovery, before any writes.
    pub fn inject_max_seq(&self, seq: u64) {
        self.next_seq.store(seq.saturating_add(1), Ordering::SeqCst);
    }

    /// Returns the highest assigned sequence number so far.
    pub fn max_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
    }

    fn current_timestamp() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before UNIX epoch").as_nanos() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only view of a memtable, representing one in the process of being
/// flushed to an on-disk column file. Retains ownership of the WAL until that flush commits.
pub struct FrozenMemtable {
    pub memtable: Memtable,
    pub creation_timestamp: u64,
}

impl FrozenMemtable {
    pub fn new(memtable: Memtable) -> Self {
        Self { memtable, creation_timestamp: Memtable::current_timestamp() }
    }

    pub fn tenant_id(&self) -> &str {
        self.memtable.tenant_id()
    }

    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        self.memtable.get(key)
    }

    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableSingleEntry)>, MemtableError> {
        self.memtable.scan(start, end)
    }

    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    pub fn max_seq(&self) -> u64 {
        self.memtable.max_seq()
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

struct HexKey<'a>(&'a [u8]);

impl<'a> std::fmt::Display for HexKey<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
