//! Per-tenant write path: schema validation, WAL-durable memtable writes,
//! freeze-on-full, and background flush of frozen memtables to L0 column
//! files.
//!
//! Each tenant owns one active [`Memtable`] and a FIFO queue of frozen
//! memtables awaiting flush. A write that finds the active memtable full
//! atomically swaps in a fresh one (with a fresh WAL segment) before
//! retrying, so writers never block on flush I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::block_store::BlockStore;
use crate::catalog::{Catalog, FileEntry, FileState};
use crate::column_file::{build_secondary_indexes, ColumnFileWriter, SecondaryIndexConfig};
use crate::compaction::{file_blob_name, sidx_blob_name};
use crate::memtable::{FrozenMemtable, Memtable, MemtableError, MemtableRecord};
use crate::schema::Schema;
use crate::wal::FsyncPolicy;

use super::utils::{PointEntry, RangeTombstone, Value};
use super::EngineError;

struct TenantState {
    active: Mutex<Arc<Memtable>>,
    frozen: Mutex<VecDeque<Arc<FrozenMemtable>>>,
    wal_generation: AtomicU64,
}

/// Owns every tenant's write path: schema validation, durable writes into
/// the active memtable, freeze-on-full, and flush of frozen memtables into
/// L0 column files registered with the [`Catalog`].
pub struct IngestionCoordinator {
    store: Arc<dyn BlockStore>,
    catalog: Arc<Catalog>,
    tenants: RwLock<HashMap<String, Arc<TenantState>>>,
    memtable_max_bytes: usize,
    wal_max_record_size: Option<u32>,
    fsync_policy: FsyncPolicy,
    secondary_index: SecondaryIndexConfig,
}

/// A batch of row mutations sharing a contiguous sequence range: either all
/// of them are durable, or none are.
#[derive(Default)]
pub struct WriteBatch {
    pub puts: Vec<(Vec<u8>, Vec<Value>)>,
    pub deletes: Vec<Vec<u8>>,
    pub range_deletes: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<Vec<u8>>, columns: Vec<Value>) -> Self {
        self.puts.push((key.into(), columns));
        self
    }

    pub fn delete(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.deletes.push(key.into());
        self
    }
}

fn wal_name(tenant_id: &str, generation: u64) -> String {
    format!("wal/{tenant_id}/wal-{generation:06}.log")
}

/// Parses the generation number out of a WAL segment name produced by
/// [`wal_name`], tolerating the leading directory components `list`
/// returns.
fn parse_generation(name: &str) -> Option<u64> {
    let file = name.rsplit('/').next()?;
    let digits = file.strip_prefix("wal-")?.strip_suffix(".log")?;
    digits.parse().ok()
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<dyn BlockStore>,
        catalog: Arc<Catalog>,
        memtable_max_bytes: usize,
        wal_max_record_size: Option<u32>,
        fsync_policy: FsyncPolicy,
        secondary_index: SecondaryIndexConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            tenants: RwLock::new(HashMap::new()),
            memtable_max_bytes,
            wal_max_record_size,
            fsync_policy,
            secondary_index,
        }
    }

    fn tenant_state(&self, tenant_id: &str) -> Result<Arc<TenantState>, EngineError> {
        if let Some(state) = self.tenants.read().unwrap_or_else(|e| e.into_inner()).get(tenant_id) {
            return Ok(Arc::clone(state));
        }

        let mut tenants = self.tenants.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = tenants.get(tenant_id) {
            return Ok(Arc::clone(state));
        }

        let state = Arc::new(self.recover_tenant_state(tenant_id)?);
        tenants.insert(tenant_id.to_string(), Arc::clone(&state));
        Ok(state)
    }

    /// Builds a tenant's initial in-memory state by discovering every WAL
    /// segment left on disk for it (from a prior process that crashed or
    /// exited without flushing) and replaying each. All but the
    /// highest-generation segment become frozen memtables queued for
    /// flush; the highest-generation segment becomes the active memtable
    /// so new writes continue from its last sequence number. A tenant with
    /// no WAL segments on disk starts fresh at generation 0.
    fn recover_tenant_state(&self, tenant_id: &str) -> Result<TenantState, EngineError> {
        let mut generations: Vec<u64> = self
            .store
            .list(&format!("wal/{tenant_id}"))?
            .iter()
            .filter_map(|name| parse_generation(name))
            .collect();
        generations.sort_unstable();

        if generations.is_empty() {
            let memtable = Memtable::new(tenant_id, Arc::clone(&self.store), &wal_name(tenant_id, 0), self.wal_max_record_size, self.memtable_max_bytes, self.fsync_policy.clone())?;
            return Ok(TenantState {
                active: Mutex::new(Arc::new(memtable)),
                frozen: Mutex::new(VecDeque::new()),
                wal_generation: AtomicU64::new(1),
            });
        }

        let last_generation = *generations.last().expect("generations is non-empty");
        let mut frozen = VecDeque::new();
        let mut active = None;
        for generation in &generations {
            let memtable = Memtable::new(tenant_id, Arc::clone(&self.store), &wal_name(tenant_id, *generation), self.wal_max_record_size, self.memtable_max_bytes, self.fsync_policy.clone())?;
            if *generation == last_generation {
                active = Some(memtable);
            } else {
                frozen.push_back(Arc::new(FrozenMemtable::new(memtable)));
            }
        }

        info!(tenant = tenant_id, segments = generations.len(), "recovered tenant write path from WAL segments");

        Ok(TenantState {
            active: Mutex::new(Arc::new(active.expect("active memtable assigned for the highest generation"))),
            frozen: Mutex::new(frozen),
            wal_generation: AtomicU64::new(last_generation + 1),
        })
    }

    /// Returns the tenant's currently registered schema, or an error if none
    /// has been put yet.
    fn require_schema(&self, tenant_id: &str) -> Result<Schema, EngineError> {
        self.catalog.latest_schema(tenant_id)?.ok_or_else(|| EngineError::NoSchema(tenant_id.to_string()))
    }

    /// Validates and writes a single row. Returns the assigned sequence
    /// number once the WAL append and memtable insert both succeed.
    pub fn put(&self, tenant_id: &str, key: Vec<u8>, columns: Vec<Value>) -> Result<u64, EngineError> {
        let schema = self.require_schema(tenant_id)?;
        schema.validate_row(&columns)?;
        let row = super::utils::encode_row(&columns).map_err(|e| EngineError::Internal(e.to_string()))?;

        let seq = self.write_with_freeze(tenant_id, |memtable| memtable.put(key.clone(), row.clone(), schema.version))?;
        self.catalog.observe_sequence(seq)?;
        Ok(seq)
    }

    pub fn delete(&self, tenant_id: &str, key: Vec<u8>) -> Result<u64, EngineError> {
        let seq = self.write_with_freeze(tenant_id, |memtable| memtable.delete(key.clone()))?;
        self.catalog.observe_sequence(seq)?;
        Ok(seq)
    }

    pub fn delete_range(&self, tenant_id: &str, start: Vec<u8>, end: Vec<u8>) -> Result<u64, EngineError> {
        let seq = self.write_with_freeze(tenant_id, |memtable| memtable.delete_range(start.clone(), end.clone()))?;
        self.catalog.observe_sequence(seq)?;
        Ok(seq)
    }

    /// Applies every mutation in `batch` against the same active memtable
    /// generation. Because a WAL segment rotation only happens on
    /// [`MemtableError::FlushRequired`], the sequence numbers assigned to a
    /// batch that does not trigger a freeze are contiguous.
    pub fn apply_batch(&self, tenant_id: &str, batch: WriteBatch) -> Result<Vec<u64>, EngineError> {
        let schema = self.require_schema(tenant_id)?;
        for (_, columns) in &batch.puts {
            schema.validate_row(columns)?;
        }

        let mut seqs = Vec::with_capacity(batch.puts.len() + batch.deletes.len() + batch.range_deletes.len());
        for (key, columns) in batch.puts {
            let row = super::utils::encode_row(&columns).map_err(|e| EngineError::Internal(e.to_string()))?;
            seqs.push(self.write_with_freeze(tenant_id, |memtable| memtable.put(key.clone(), row.clone(), schema.version))?);
        }
        for key in batch.deletes {
            seqs.push(self.write_with_freeze(tenant_id, |memtable| memtable.delete(key.clone()))?);
        }
        for (start, end) in batch.range_deletes {
            seqs.push(self.write_with_freeze(tenant_id, |memtable| memtable.delete_range(start.clone(), end.clone()))?);
        }

        if let Some(max_seq) = seqs.iter().copied().max() {
            self.catalog.observe_sequence(max_seq)?;
        }
        Ok(seqs)
    }

    /// Runs `op` against the tenant's active memtable, freezing and
    /// swapping in a fresh one on [`MemtableError::FlushRequired`] before
    /// retrying exactly once more.
    fn write_with_freeze(&self, tenant_id: &str, op: impl Fn(&Memtable) -> Result<u64, MemtableError>) -> Result<u64, EngineError> {
        let state = self.tenant_state(tenant_id)?;

        let active = { Arc::clone(&*state.active.lock().unwrap_or_else(|e| e.into_inner())) };
        match op(&active) {
            Ok(seq) => Ok(seq),
            Err(MemtableError::FlushRequired) => {
                self.freeze_active(tenant_id, &state, &active)?;
                let fresh = { Arc::clone(&*state.active.lock().unwrap_or_else(|e| e.into_inner())) };
                op(&fresh).map_err(|e| EngineError::DurabilityFailure(e.to_string()))
            }
            Err(e) => Err(EngineError::DurabilityFailure(e.to_string())),
        }
    }

    /// Freezes `expected_active` and installs a fresh memtable, unless
    /// another writer has already done so (checked by pointer identity).
    fn freeze_active(&self, tenant_id: &str, state: &TenantState, expected_active: &Arc<Memtable>) -> Result<(), EngineError> {
        let mut active_slot = state.active.lock().unwrap_or_else(|e| e.into_inner());
        if !Arc::ptr_eq(&*active_slot, expected_active) {
            // Another writer already froze this generation.
            return Ok(());
        }

        let generation = state.wal_generation.fetch_add(1, Ordering::SeqCst);
        let fresh = Memtable::new(tenant_id, Arc::clone(&self.store), &wal_name(tenant_id, generation), self.wal_max_record_size, self.memtable_max_bytes, self.fsync_policy.clone())?;

        let old = std::mem::replace(&mut *active_slot, Arc::new(fresh));
        drop(active_slot);

        // Readers only ever hold this Arc for the duration of a single
        // get/scan call, never across an iterator's full lifetime (the
        // query path copies scan results into owned records promptly), so
        // a short spin reliably reaches sole ownership.
        let mut pending = old;
        let old = loop {
            match Arc::try_unwrap(pending) {
                Ok(memtable) => break memtable,
                Err(arc) => {
                    pending = arc;
                    std::thread::yield_now();
                }
            }
        };

        info!(tenant = tenant_id, "froze active memtable, enqueued for flush");
        state.frozen.lock().unwrap_or_else(|e| e.into_inner()).push_back(Arc::new(FrozenMemtable::new(old)));
        Ok(())
    }

    /// Returns the tenant's active memtable, for the query path.
    pub fn active_memtable(&self, tenant_id: &str) -> Result<Arc<Memtable>, EngineError> {
        let state = self.tenant_state(tenant_id)?;
        Ok(Arc::clone(&*state.active.lock().unwrap_or_else(|e| e.into_inner())))
    }

    /// Returns the tenant's frozen memtables awaiting flush, oldest first.
    pub fn frozen_memtables(&self, tenant_id: &str) -> Result<Vec<Arc<FrozenMemtable>>, EngineError> {
        let state = self.tenant_state(tenant_id)?;
        Ok(state.frozen.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect())
    }

    /// Flushes the oldest frozen memtable of `tenant_id`, if any, writing a
    /// single new L0 column file and registering it with the catalog. Once
    /// registered, the memtable's WAL segment is deleted.
    pub fn flush_oldest(&self, tenant_id: &str) -> Result<bool, EngineError> {
        let state = self.tenant_state(tenant_id)?;
        let Some(frozen) = state.frozen.lock().unwrap_or_else(|e| e.into_inner()).front().cloned() else {
            return Ok(false);
        };

        let (points, ranges) = split_flush_records(frozen.memtable.iter_for_flush()?);
        if points.is_empty() && ranges.is_empty() {
            state.frozen.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            return Ok(true);
        }

        let file_id = self.catalog.allocate_file_id()?;
        let name = file_blob_name(tenant_id, 0, file_id);
        let point_count = points.len();
        let range_count = ranges.len();
        let min_key = points.iter().map(|p| p.key.clone()).chain(ranges.iter().map(|r| r.start.clone())).min().unwrap_or_default();
        let max_key = points.iter().map(|p| p.key.clone()).chain(ranges.iter().map(|r| r.end.clone())).max().unwrap_or_default();
        let min_seq = points.iter().map(|p| p.seq).chain(ranges.iter().map(|r| r.seq)).min().unwrap_or(0);
        let max_seq = points.iter().map(|p| p.seq).chain(ranges.iter().map(|r| r.seq)).max().unwrap_or(0);
        let schema_version = points.iter().map(|p| p.version).max().unwrap_or(0);
        let byte_size: u64 = points.iter().map(|p| (p.key.len() + p.value.as_ref().map_or(0, |v| v.len())) as u64).sum();
        let schema = self.catalog.get_schema(tenant_id, schema_version)?;

        build_secondary_indexes(self.store.as_ref(), &points, schema.as_ref(), &self.secondary_index, |column| sidx_blob_name(tenant_id, 0, file_id, column))
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        ColumnFileWriter::new(self.store.as_ref(), name).build(points.into_iter(), point_count, ranges.into_iter(), range_count, schema.as_ref())?;

        self.catalog.register_file(FileEntry {
            file_id,
            tenant_id: tenant_id.to_string(),
            level: 0,
            min_key,
            max_key,
            min_seq,
            max_seq,
            row_count: point_count as u64,
            byte_size,
            schema_version,
            stats_digest: 0,
            created_at: current_timestamp(),
            state: FileState::Live,
        })?;

        let flushed = state.frozen.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        if let Some(flushed) = flushed {
            let wal_segment = flushed.memtable.wal.name().to_string();
            if let Err(e) = self.store.delete(&wal_segment) {
                warn!(tenant = tenant_id, wal = wal_segment, error = %e, "failed to delete retired WAL segment after flush");
            }
        }

        debug!(tenant = tenant_id, file_id, point_count, range_count, "flushed frozen memtable to L0");
        Ok(true)
    }

    /// Permanently removes every column file, WAL segment, and in-memory
    /// memtable held for `tenant_id`. Schema history is left in the catalog
    /// — a later `put_schema` for the same tenant id starts a fresh table
    /// rather than resurrecting the dropped one's data.
    pub fn drop_tenant(&self, tenant_id: &str) -> Result<(), EngineError> {
        let files = self.catalog.files_for_tenant(tenant_id)?;
        let ids: Vec<u64> = files.iter().map(|f| f.file_id).collect();
        if !ids.is_empty() {
            let job_id = self.catalog.allocate_job_id()?;
            self.catalog.retire_files(ids.clone(), job_id)?;
            for file in &files {
                let name = file_blob_name(tenant_id, file.level, file.file_id);
                if let Err(e) = self.store.delete(&name) {
                    warn!(tenant = tenant_id, file = name, error = %e, "failed to delete column file blob while dropping tenant");
                }
            }
            for id in ids {
                self.catalog.delete_file(id)?;
            }
        }

        for name in self.store.list(&format!("wal/{tenant_id}"))? {
            if let Err(e) = self.store.delete(&name) {
                warn!(tenant = tenant_id, wal = name, error = %e, "failed to delete WAL segment while dropping tenant");
            }
        }

        self.tenants.write().unwrap_or_else(|e| e.into_inner()).remove(tenant_id);
        info!(tenant = tenant_id, "dropped tenant table");
        Ok(())
    }

    /// Flushes every tenant's frozen memtables until each tenant's queue is
    /// empty. Covers both tenants already touched this session and any
    /// tenant with WAL segments left on disk from a prior, un-closed run,
    /// so `Engine::close` durably flushes everything regardless of which
    /// tenants this process happened to read or write.
    pub fn flush_all_pending(&self) -> Result<(), EngineError> {
        let mut tenant_ids: std::collections::HashSet<String> = self.tenants.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        for name in self.store.list("wal")? {
            if let Some(tenant_id) = name.strip_prefix("wal/").and_then(|rest| rest.split('/').next()) {
                tenant_ids.insert(tenant_id.to_string());
            }
        }

        for tenant_id in tenant_ids {
            // Touching the tenant recovers any on-disk WAL segments into
            // its frozen queue before we drain it.
            self.tenant_state(&tenant_id)?;
            while self.flush_oldest(&tenant_id)? {}
        }
        Ok(())
    }
}

fn split_flush_records(records: impl Iterator<Item = MemtableRecord>) -> (Vec<PointEntry>, Vec<RangeTombstone>) {
    let mut points = Vec::new();
    let mut ranges = Vec::new();
    for record in records {
        match record {
            MemtableRecord::Put { key, row, version, seq, timestamp } => {
                points.push(PointEntry { key, value: Some(row), version, seq, timestamp });
            }
            MemtableRecord::Delete { key, seq, timestamp } => {
                points.push(PointEntry { key, value: None, version: 0, seq, timestamp });
            }
            MemtableRecord::RangeDelete { start, end, seq, timestamp } => {
                ranges.push(RangeTombstone { start, end, seq, timestamp });
            }
        }
    }
    (points, ranges)
}
