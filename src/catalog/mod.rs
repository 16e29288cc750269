//! # Catalog Component
//!
//! The **Catalog** is the central metadata authority for the storage engine.
//! It tracks the engine's durable state across every tenant, including:
//!
//! - the file inventory (which column files are live, which are retiring),
//! - the per-tenant schema registry and its evolution history,
//! - the globally observed sequence number and the set of snapshots
//!   currently held open by readers.
//!
//! The catalog acts as a *miniature WAL-driven metadata database* — the same
//! shape as the rest of the engine's durability story, applied to metadata
//! instead of row data.
//!
//! ## Data durability strategy
//!
//! Catalog metadata is persisted using a **journal + periodic checkpoint**
//! model:
//!
//! 1. **Catalog journal** records every mutation: file registration, file
//!    retirement, atomic compaction commits, schema puts, and sequence
//!    advancement.
//!
//! 2. **Catalog snapshot** is a compact encoded dump of the whole metadata
//!    structure, checksummed to detect corruption.
//!
//! 3. On startup:
//!    - If a valid snapshot exists → load snapshot, replay journal entries
//!      recorded after it.
//!    - If the snapshot is corrupted → fall back to a full journal replay
//!      (the journal is the ground truth; the snapshot is an optimisation).
//!
//! All persistent bytes are addressed through [`crate::block_store::BlockStore`],
//! never through `std::fs` directly.
//!
//! ## Thread safety
//!
//! - The journal is internally synchronized — no external lock required.
//! - `CatalogData` is wrapped in a `Mutex` so mutations serialise on a
//!   single writer while reads take a short-lived lock.
//! - The set of held snapshots is tracked separately in a
//!   [`SnapshotRegistry`] so that dropping a [`SnapshotGuard`] never needs
//!   to touch the journal.

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{info, warn};

use crate::block_store::{BlockStore, BlockStoreError};
use crate::encoding::{self, Decode, Encode, EncodingError, decode_vec, encode_vec};
use crate::schema::{Schema, SchemaError};
use crate::wal::{FsyncPolicy, Wal, WalData, WalError};

const JOURNAL_NAME: &str = "catalog/wal-0.log";
const SNAPSHOT_NAME: &str = "catalog/snapshot_1.cat";

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying journal I/O failure.
    #[error("journal error: {0}")]
    Journal(#[from] WalError),

    /// Underlying block store failure.
    #[error("block store error: {0}")]
    Store(#[from] BlockStoreError),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Rejected schema evolution.
    #[error("schema rejected: {0}")]
    SchemaRejected(#[from] SchemaError),

    /// Snapshot checksum mismatch or structural corruption — falls back to
    /// a full journal replay on open.
    #[error("catalog snapshot corrupt")]
    CatalogCorrupt,

    /// A file id referenced by a mutation is not present in the inventory.
    #[error("file {0} not registered in catalog")]
    UnknownFile(u64),

    /// Internal invariant violation or poisoned lock.
    #[error("internal catalog error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// File inventory types
// ------------------------------------------------------------------------------------------------

/// Liveness state of a column file tracked by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Visible to queries.
    Live,
    /// Superseded by compaction job `job_id`; retained until no reader
    /// holds an open handle, then deleted by the reaper.
    RetiringAfter(u64),
}

/// One entry in the catalog's file inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub file_id: u64,
    pub tenant_id: String,
    pub level: u32,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub min_seq: u64,
    pub max_seq: u64,
    pub row_count: u64,
    pub byte_size: u64,
    pub schema_version: u32,
    /// Opaque digest of the per-column statistics recorded by the column
    /// file writer (distinct-estimate, null counts, ...), carried here so
    /// the compaction engine can make selection decisions without opening
    /// every candidate file.
    pub stats_digest: u64,
    pub created_at: u64,
    pub state: FileState,
}

impl FileEntry {
    /// Returns `true` if `[start, end)` intersects this file's key range.
    pub fn intersects_key_range(&self, start: &[u8], end: &[u8]) -> bool {
        self.min_key.as_slice() < end && start <= self.max_key.as_slice()
    }

    /// Returns `true` if this file's sequence range intersects `[0, snapshot]`.
    pub fn intersects_snapshot(&self, snapshot: u64) -> bool {
        self.min_seq <= snapshot
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, FileState::Live)
    }
}

// ------------------------------------------------------------------------------------------------
// In-memory catalog state
// ------------------------------------------------------------------------------------------------

/// In-memory representation of the catalog's durable state.
#[derive(Debug, Clone, Default)]
pub(crate) struct CatalogData {
    version: u64,
    max_observed_seq: u64,
    next_file_id: u64,
    next_job_id: u64,
    files: Vec<FileEntry>,
    schemas: Vec<Schema>,
    dirty: bool,
}

impl CatalogData {
    fn schema_slot(&self, tenant_id: &str, version: u32) -> Option<usize> {
        self.schemas
            .iter()
            .position(|s| s.tenant_id == tenant_id && s.version == version)
    }

    fn latest_schema(&self, tenant_id: &str) -> Option<&Schema> {
        self.schemas
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .max_by_key(|s| s.version)
    }
}

// ------------------------------------------------------------------------------------------------
// Journal record type
// ------------------------------------------------------------------------------------------------

/// Record stored in the catalog journal. Each variant describes a single
/// metadata mutation applied to [`CatalogData`].
#[derive(Debug)]
pub enum CatalogEvent {
    RegisterFile {
        seq: u64,
        entry: FileEntry,
    },
    RetireFiles {
        seq: u64,
        ids: Vec<u64>,
        job_id: u64,
    },
    /// Atomic compaction swap: new files become `Live`, retired inputs
    /// move to `RetiringAfter(job_id)`, in one journal record.
    CommitCompaction {
        seq: u64,
        job_id: u64,
        new_entries: Vec<FileEntry>,
        retired_ids: Vec<u64>,
    },
    /// Removes a file from the inventory entirely — issued by the reaper
    /// once a retiring file's last reader has dropped its handle.
    DeleteFile {
        seq: u64,
        id: u64,
    },
    PutSchema {
        seq: u64,
        schema: Schema,
    },
    /// Advances the catalog's view of the globally assigned sequence
    /// number, used by `next_snapshot()`.
    ObserveSequence {
        seq: u64,
    },
}

impl WalData for CatalogEvent {
    fn sequence_number(&self) -> u64 {
        match self {
            CatalogEvent::RegisterFile { seq, .. }
            | CatalogEvent::RetireFiles { seq, .. }
            | CatalogEvent::CommitCompaction { seq, .. }
            | CatalogEvent::DeleteFile { seq, .. }
            | CatalogEvent::PutSchema { seq, .. }
            | CatalogEvent::ObserveSequence { seq } => *seq,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for FileState {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            FileState::Live => 0u32.encode_to(buf),
            FileState::RetiringAfter(job_id) => {
                1u32.encode_to(buf)?;
                job_id.encode_to(buf)
            }
        }
    }
}

impl Decode for FileState {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => Ok((FileState::Live, offset)),
            1 => {
                let (job_id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((FileState::RetiringAfter(job_id), offset))
            }
            _ => Err(EncodingError::InvalidTag { tag, type_name: "FileState" }),
        }
    }
}

impl Encode for FileEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.file_id.encode_to(buf)?;
        self.tenant_id.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.min_seq.encode_to(buf)?;
        self.max_seq.encode_to(buf)?;
        self.row_count.encode_to(buf)?;
        self.byte_size.encode_to(buf)?;
        self.schema_version.encode_to(buf)?;
        self.stats_digest.encode_to(buf)?;
        self.created_at.encode_to(buf)?;
        self.state.encode_to(buf)
    }
}

impl Decode for FileEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (file_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (tenant_id, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (min_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (max_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (min_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (row_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (byte_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (schema_version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (stats_digest, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (created_at, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (state, n) = FileState::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                file_id,
                tenant_id,
                level,
                min_key,
                max_key,
                min_seq,
                max_seq,
                row_count,
                byte_size,
                schema_version,
                stats_digest,
                created_at,
                state,
            },
            offset,
        ))
    }
}

impl Encode for CatalogData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.version.encode_to(buf)?;
        self.max_observed_seq.encode_to(buf)?;
        self.next_file_id.encode_to(buf)?;
        self.next_job_id.encode_to(buf)?;
        encode_vec(&self.files, buf)?;
        encode_vec(&self.schemas, buf)?;
        Ok(())
    }
}

impl Decode for CatalogData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_observed_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (next_file_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (next_job_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (files, n) = decode_vec::<FileEntry>(&buf[offset..])?;
        offset += n;
        let (schemas, n) = decode_vec::<Schema>(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                max_observed_seq,
                next_file_id,
                next_job_id,
                files,
                schemas,
                dirty: false,
            },
            offset,
        ))
    }
}

impl Encode for CatalogEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            CatalogEvent::RegisterFile { seq, entry } => {
                0u32.encode_to(buf)?;
                seq.encode_to(buf)?;
                entry.encode_to(buf)
            }
            CatalogEvent::RetireFiles { seq, ids, job_id } => {
                1u32.encode_to(buf)?;
                seq.encode_to(buf)?;
                encode_vec(ids, buf)?;
                job_id.encode_to(buf)
            }
            CatalogEvent::CommitCompaction { seq, job_id, new_entries, retired_ids } => {
                2u32.encode_to(buf)?;
                seq.encode_to(buf)?;
                job_id.encode_to(buf)?;
                encode_vec(new_entries, buf)?;
                encode_vec(retired_ids, buf)
            }
            CatalogEvent::DeleteFile { seq, id } => {
                3u32.encode_to(buf)?;
                seq.encode_to(buf)?;
                id.encode_to(buf)
            }
            CatalogEvent::PutSchema { seq, schema } => {
                4u32.encode_to(buf)?;
                seq.encode_to(buf)?;
                schema.encode_to(buf)
            }
            CatalogEvent::ObserveSequence { seq } => {
                5u32.encode_to(buf)?;
                seq.encode_to(buf)
            }
        }
    }
}

impl Decode for CatalogEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (entry, n) = FileEntry::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::RegisterFile { seq, entry }, offset))
            }
            1 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (ids, n) = decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                let (job_id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::RetireFiles { seq, ids, job_id }, offset))
            }
            2 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (job_id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (new_entries, n) = decode_vec::<FileEntry>(&buf[offset..])?;
                offset += n;
                let (retired_ids, n) = decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::CommitCompaction { seq, job_id, new_entries, retired_ids }, offset))
            }
            3 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::DeleteFile { seq, id }, offset))
            }
            4 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (schema, n) = Schema::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::PutSchema { seq, schema }, offset))
            }
            5 => {
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((CatalogEvent::ObserveSequence { seq }, offset))
            }
            _ => Err(EncodingError::InvalidTag { tag, type_name: "CatalogEvent" }),
        }
    }
}

/// Serialized snapshot stored at [`SNAPSHOT_NAME`].
#[derive(Debug)]
struct CatalogSnapshot {
    data: CatalogData,
    checksum: u32,
}

impl Encode for CatalogSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.data.encode_to(buf)?;
        self.checksum.encode_to(buf)
    }
}

impl Decode for CatalogSnapshot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (data, n) = CatalogData::decode_from(&buf[offset..])?;
        offset += n;
        let (checksum, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { data, checksum }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot reference counting
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SnapshotRegistry {
    held: Mutex<BTreeMap<u64, u64>>,
}

impl SnapshotRegistry {
    fn acquire(&self, seq: u64) {
        let mut held = self.held.lock().expect("snapshot registry mutex poisoned");
        *held.entry(seq).or_insert(0) += 1;
    }

    fn release(&self, seq: u64) {
        let mut held = self.held.lock().expect("snapshot registry mutex poisoned");
        if let Some(count) = held.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                held.remove(&seq);
            }
        }
    }

    /// The smallest snapshot sequence currently held by any reader, or
    /// `None` if no reader holds one open.
    fn min_held(&self) -> Option<u64> {
        self.held.lock().expect("snapshot registry mutex poisoned").keys().next().copied()
    }

    /// Count of distinct snapshot sequences currently held by at least one
    /// reader.
    fn open_count(&self) -> usize {
        self.held.lock().expect("snapshot registry mutex poisoned").len()
    }
}

/// A held read snapshot. Dropping it releases the catalog's reference on
/// that sequence number, allowing compaction to reclaim versions superseded
/// at or below it once no other reader holds the same snapshot.
pub struct SnapshotGuard {
    seq: u64,
    registry: Arc<SnapshotRegistry>,
}

impl SnapshotGuard {
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.registry.release(self.seq);
    }
}

// ------------------------------------------------------------------------------------------------
// Catalog core
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager of the storage engine.
///
/// Provides crash-safe metadata operations using a journal-driven model.
/// Many readers may query concurrently; mutations serialise on an internal
/// mutex mirroring the single-writer queue described for this component.
pub struct Catalog {
    store: Arc<dyn BlockStore>,
    journal: Mutex<Wal<CatalogEvent>>,
    data: Mutex<CatalogData>,
    snapshots: Arc<SnapshotRegistry>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    /// Opens the catalog against `store`.
    ///
    /// Loads the last snapshot (if present and valid) then replays journal
    /// entries recorded after it. A corrupt snapshot is not fatal: the
    /// journal is the ground truth and the catalog falls back to a full
    /// replay from empty state.
    pub fn open(store: Arc<dyn BlockStore>) -> Result<Self, CatalogError> {
        let mut data = CatalogData::default();

        match store.get(SNAPSHOT_NAME) {
            Ok(bytes) => match Self::decode_snapshot(&bytes) {
                Ok(snap) => {
                    data = snap;
                    info!("loaded catalog snapshot");
                }
                Err(e) => {
                    warn!(error = %e, "catalog snapshot corrupt, falling back to full journal replay");
                }
            },
            Err(BlockStoreError::NotFound(_)) => {}
            Err(e) => return Err(CatalogError::Store(e)),
        }

        let journal = Wal::<CatalogEvent>::open(
            Arc::clone(&store),
            JOURNAL_NAME,
            None,
            FsyncPolicy::PerWrite,
            now_unix(),
        )?;

        let catalog = Catalog {
            store,
            journal: Mutex::new(journal),
            data: Mutex::new(data),
            snapshots: Arc::new(SnapshotRegistry::default()),
        };

        catalog.replay_journal()?;
        Ok(catalog)
    }

    fn decode_snapshot(bytes: &[u8]) -> Result<CatalogData, CatalogError> {
        let (snap, _) = encoding::decode_from_slice::<CatalogSnapshot>(bytes).map_err(|_| CatalogError::CatalogCorrupt)?;
        let verify = CatalogSnapshot { data: snap.data.clone(), checksum: 0 };
        let verify_bytes = encoding::encode_to_vec(&verify).map_err(|_| CatalogError::CatalogCorrupt)?;
        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        if hasher.finalize() != snap.checksum {
            return Err(CatalogError::CatalogCorrupt);
        }
        Ok(snap.data)
    }

    fn replay_journal(&self) -> Result<(), CatalogError> {
        let iter = self.journal.lock().map_err(|_| CatalogError::Internal("catalog journal mutex poisoned".into()))?.replay_iter()?;
        let mut count = 0u64;
        for item in iter {
            match item {
                Ok(event) => {
                    self.apply(&event)?;
                    count += 1;
                }
                Err(e) => {
                    warn!(error = %e, "catalog journal replay stopped at first invalid entry");
                    break;
                }
            }
        }
        info!(entries = count, "catalog journal replay complete");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CatalogData>, CatalogError> {
        self.data.lock().map_err(|_| CatalogError::Internal("catalog mutex poisoned".into()))
    }

    fn append_and_apply(&self, event: CatalogEvent) -> Result<(), CatalogError> {
        self.journal
            .lock()
            .map_err(|_| CatalogError::Internal("catalog journal mutex poisoned".into()))?
            .append(&event)?;
        self.apply(&event)
    }

    fn apply(&self, event: &CatalogEvent) -> Result<(), CatalogError> {
        let mut data = self.lock()?;
        match event {
            CatalogEvent::RegisterFile { entry, .. } => {
                if !data.files.iter().any(|f| f.file_id == entry.file_id) {
                    data.files.push(entry.clone());
                }
                if entry.file_id >= data.next_file_id {
                    data.next_file_id = entry.file_id + 1;
                }
            }
            CatalogEvent::RetireFiles { ids, job_id, .. } => {
                for file in data.files.iter_mut().filter(|f| ids.contains(&f.file_id)) {
                    file.state = FileState::RetiringAfter(*job_id);
                }
                if *job_id >= data.next_job_id {
                    data.next_job_id = job_id + 1;
                }
            }
            CatalogEvent::CommitCompaction { job_id, new_entries, retired_ids, .. } => {
                for file in data.files.iter_mut().filter(|f| retired_ids.contains(&f.file_id)) {
                    file.state = FileState::RetiringAfter(*job_id);
                }
                for entry in new_entries {
                    if !data.files.iter().any(|f| f.file_id == entry.file_id) {
                        data.files.push(entry.clone());
                    }
                    if entry.file_id >= data.next_file_id {
                        data.next_file_id = entry.file_id + 1;
                    }
                }
                if *job_id >= data.next_job_id {
                    data.next_job_id = job_id + 1;
                }
            }
            CatalogEvent::DeleteFile { id, .. } => {
                data.files.retain(|f| f.file_id != *id);
            }
            CatalogEvent::PutSchema { schema, .. } => {
                if let Some(slot) = data.schema_slot(&schema.tenant_id, schema.version) {
                    data.schemas[slot] = schema.clone();
                } else {
                    data.schemas.push(schema.clone());
                }
            }
            CatalogEvent::ObserveSequence { seq } => {
                data.max_observed_seq = data.max_observed_seq.max(*seq);
            }
        }
        data.max_observed_seq = data.max_observed_seq.max(event.sequence_number());
        data.dirty = true;
        Ok(())
    }

    // --------------------------------------------------------------------
    // File inventory
    // --------------------------------------------------------------------

    /// Allocates the next file id without registering anything.
    pub fn allocate_file_id(&self) -> Result<u64, CatalogError> {
        let mut data = self.lock()?;
        let id = data.next_file_id;
        data.next_file_id += 1;
        Ok(id)
    }

    /// Registers a newly written column file. Used by the flusher for
    /// level-0 outputs.
    pub fn register_file(&self, entry: FileEntry) -> Result<(), CatalogError> {
        let seq = self.bump_seq(entry.max_seq)?;
        self.append_and_apply(CatalogEvent::RegisterFile { seq, entry })
    }

    /// Marks `ids` as retiring under `job_id`, without yet removing them
    /// from the inventory (they stay visible to readers mid-flight until
    /// the reaper deletes them).
    pub fn retire_files(&self, ids: Vec<u64>, job_id: u64) -> Result<(), CatalogError> {
        let seq = self.bump_seq(0)?;
        self.append_and_apply(CatalogEvent::RetireFiles { seq, ids, job_id })
    }

    /// Atomically swaps compaction outputs in: new files become `Live`,
    /// input files move to `RetiringAfter(job_id)`. One journal record.
    pub fn commit_compaction(
        &self,
        job_id: u64,
        new_entries: Vec<FileEntry>,
        retired_ids: Vec<u64>,
    ) -> Result<(), CatalogError> {
        let max_seq = new_entries.iter().map(|e| e.max_seq).max().unwrap_or(0);
        let seq = self.bump_seq(max_seq)?;
        self.append_and_apply(CatalogEvent::CommitCompaction { seq, job_id, new_entries, retired_ids })
    }

    /// Permanently removes a retired file from the inventory. Called by
    /// the reaper once the block store bytes have been deleted and no
    /// open reader still holds a handle onto it.
    pub fn delete_file(&self, id: u64) -> Result<(), CatalogError> {
        let seq = self.bump_seq(0)?;
        self.append_and_apply(CatalogEvent::DeleteFile { seq, id })
    }

    /// Returns files for `tenant_id` whose key range intersects
    /// `[start_key, end_key)` and whose sequence range intersects
    /// `[0, snapshot]`. Only `Live` files are returned — retiring files
    /// are invisible to new queries even before the reaper deletes them.
    pub fn list_files(&self, tenant_id: &str, start_key: &[u8], end_key: &[u8], snapshot: u64) -> Result<Vec<FileEntry>, CatalogError> {
        let data = self.lock()?;
        Ok(data
            .files
            .iter()
            .filter(|f| f.tenant_id == tenant_id)
            .filter(|f| f.is_live())
            .filter(|f| f.intersects_snapshot(snapshot))
            .filter(|f| f.intersects_key_range(start_key, end_key))
            .cloned()
            .collect())
    }

    /// Returns every file entry known to the catalog for `tenant_id`,
    /// live or retiring, for compaction candidate selection.
    pub fn files_for_tenant(&self, tenant_id: &str) -> Result<Vec<FileEntry>, CatalogError> {
        let data = self.lock()?;
        Ok(data.files.iter().filter(|f| f.tenant_id == tenant_id).cloned().collect())
    }

    /// Allocates the next compaction job id.
    pub fn allocate_job_id(&self) -> Result<u64, CatalogError> {
        let mut data = self.lock()?;
        let id = data.next_job_id;
        data.next_job_id += 1;
        Ok(id)
    }

    // --------------------------------------------------------------------
    // Schema registry
    // --------------------------------------------------------------------

    /// Returns the schema for `(tenant_id, version)`, if registered.
    pub fn get_schema(&self, tenant_id: &str, version: u32) -> Result<Option<Schema>, CatalogError> {
        let data = self.lock()?;
        Ok(data.schema_slot(tenant_id, version).map(|i| data.schemas[i].clone()))
    }

    /// Returns the highest-versioned schema registered for `tenant_id`.
    pub fn latest_schema(&self, tenant_id: &str) -> Result<Option<Schema>, CatalogError> {
        let data = self.lock()?;
        Ok(data.latest_schema(tenant_id).cloned())
    }

    /// Registers `schema`, validating it as an evolution of the tenant's
    /// current latest schema (if any). The first schema for a tenant is
    /// accepted unconditionally.
    pub fn put_schema(&self, schema: Schema) -> Result<(), CatalogError> {
        {
            let data = self.lock()?;
            if let Some(current) = data.latest_schema(&schema.tenant_id) {
                current.evolve(&schema)?;
            }
        }
        let seq = self.bump_seq(0)?;
        self.append_and_apply(CatalogEvent::PutSchema { seq, schema })
    }

    // --------------------------------------------------------------------
    // Snapshots / MVCC bookkeeping
    // --------------------------------------------------------------------

    /// Records that the global sequence counter has advanced to `seq`,
    /// so that `next_snapshot()` reflects writes acknowledged so far.
    pub fn observe_sequence(&self, seq: u64) -> Result<(), CatalogError> {
        self.append_and_apply(CatalogEvent::ObserveSequence { seq })
    }

    fn bump_seq(&self, candidate: u64) -> Result<u64, CatalogError> {
        let mut data = self.lock()?;
        data.max_observed_seq = data.max_observed_seq.max(candidate) + 1;
        Ok(data.max_observed_seq)
    }

    /// The current globally-assigned sequence upper bound, used by
    /// readers at query start as their default snapshot.
    pub fn next_snapshot(&self) -> Result<u64, CatalogError> {
        Ok(self.lock()?.max_observed_seq)
    }

    /// Acquires a reference-counted hold on `sequence_number`, so
    /// compaction's garbage-collection pass knows not to reclaim versions
    /// still visible to this reader. Drop the guard to release.
    pub fn acquire_snapshot(&self, sequence_number: u64) -> Result<SnapshotGuard, CatalogError> {
        let current = self.next_snapshot()?;
        if sequence_number > current {
            return Err(CatalogError::Internal(format!(
                "snapshot {sequence_number} exceeds current upper bound {current}"
            )));
        }
        self.snapshots.acquire(sequence_number);
        Ok(SnapshotGuard { seq: sequence_number, registry: Arc::clone(&self.snapshots) })
    }

    /// The smallest snapshot sequence currently held open by any reader.
    /// Compaction may reclaim a superseded version only if its successor's
    /// sequence − 1 is still ≥ this bound (or no snapshot is held at all).
    pub fn min_active_snapshot(&self) -> Option<u64> {
        self.snapshots.min_held()
    }

    /// Number of distinct snapshot sequences currently held open by readers.
    pub fn open_snapshot_count(&self) -> usize {
        self.snapshots.open_count()
    }

    // --------------------------------------------------------------------
    // Checkpoint
    // --------------------------------------------------------------------

    /// Writes a compact snapshot of the current state and truncates the
    /// journal. Safe to call concurrently with readers; mutations that
    /// race with the snapshot read are simply captured in the next
    /// checkpoint instead.
    pub fn checkpoint(&self) -> Result<(), CatalogError> {
        let data = self.lock()?.clone();
        let snapshot = CatalogSnapshot { data, checksum: 0 };

        let mut bytes = encoding::encode_to_vec(&snapshot)?;
        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        let checksum = hasher.finalize();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        // `BlockStore::put` writes to a temp path and renames onto the
        // canonical name, so a single call here is already atomic.
        self.store.put(SNAPSHOT_NAME, &bytes)?;

        self.journal
            .lock()
            .map_err(|_| CatalogError::Internal("catalog journal mutex poisoned".into()))?
            .truncate()?;
        self.lock()?.dirty = false;
        info!("catalog checkpoint written");
        Ok(())
    }

    pub fn is_dirty(&self) -> Result<bool, CatalogError> {
        Ok(self.lock()?.dirty)
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
