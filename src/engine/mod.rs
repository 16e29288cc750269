//! # Multi-Tenant Columnar Storage Engine
//!
//! This module implements a **crash-safe**, **multi-tenant** LSM-tree storage
//! engine with multi-version concurrency, point and range tombstones, and
//! leveled compaction.
//!
//! ## Design Overview
//!
//! Each tenant owns an independent write path — one active [`Memtable`] (and
//! WAL) plus a queue of frozen memtables awaiting flush — but shares the
//! engine-wide [`Catalog`] and [`BlockStore`]. Reads merge across a tenant's
//! active/frozen memtables and the on-disk [`ColumnFile`]s the catalog lists
//! for the requested key range and snapshot, resolving MVCC visibility with
//! [`visibility::VisibilityFilter`].
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Engine                              │
//! │  ┌───────────────┐   ┌───────────────┐   ┌──────────────────┐ │
//! │  │ IngestionCoord │   │  QueryExecutor │   │ CompactionWorker │ │
//! │  │ (per tenant:   │   │  (per tenant:  │   │ Pool (leveled)   │ │
//! │  │  active + WAL, │   │  memtables ∪   │   │                  │ │
//! │  │  frozen queue) │   │  column files) │   │                  │ │
//! │  └───────┬────────┘   └───────┬────────┘   └────────┬─────────┘ │
//! │          │                    │                      │           │
//! │          └───────────► Catalog (schemas, file inventory, snapshots) │
//! │                                    │                              │
//! │                              BlockStore                           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Durability:** every write is WAL-appended before acknowledgement.
//! - **Crash recovery:** [`Engine::open`] replays the catalog journal and
//!   every tenant's memtable WAL to reconstruct the last durable state.
//! - **Multi-version reads:** queries resolve against a snapshot sequence
//!   number, seeing the latest committed version at or below it.
//! - **Schema evolution:** writes are validated against a tenant's latest
//!   registered schema; only additive/widening evolutions are accepted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;

use crate::block_store::{BlockStore, BlockStoreError, LocalBlockStore};
use crate::catalog::{Catalog, CatalogError};
use crate::compaction::leveled::CompactionWorkerPool;
use crate::compaction::CompactionConfig;
use crate::memtable::MemtableError;
use crate::schema::SchemaError;

pub mod ingestion;
pub mod query;
pub mod utils;
pub mod visibility;

pub use ingestion::{IngestionCoordinator, WriteBatch};
pub use query::{
    AggregateGroup, AggregateKind, AggregateResult, AggregateSpec, AggregationPlan, PredicateOp, QueryExecutor, QueryPlan, ResultRow, ValuePredicate,
};
pub use utils::{PointEntry, RangeTombstone, Record, Value};


/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    #[error("block store error: {0}")]
    Store(#[from] BlockStoreError),

    #[error("column file error: {0}")]
    ColumnFile(#[from] crate::column_file::ColumnFileError),

    #[error("compaction error: {0}")]
    Compaction(#[from] crate::compaction::CompactionError),

    #[error("row rejected by schema: {0}")]
    SchemaMismatch(#[from] SchemaError),

    #[error("no schema registered for tenant '{0}'")]
    NoSchema(String),

    #[error("write could not be made durable: {0}")]
    DurabilityFailure(String),

    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes buffered per tenant before an active memtable is frozen.
    pub memtable_max_bytes: usize,

    /// Maximum single WAL record size, in bytes. `None` disables the check.
    pub wal_max_record_size: Option<u32>,

    /// WAL durability policy shared by every tenant memtable.
    pub fsync_policy: crate::wal::FsyncPolicy,

    /// Leveled compaction tuning.
    pub compaction: CompactionConfig,
}

/// Per-tenant storage and activity counters, for operational visibility.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Live file count at each level, indexed by level.
    pub files_per_level: Vec<usize>,
    /// Live byte size at each level, indexed by level.
    pub bytes_per_level: Vec<u64>,
    /// Compaction jobs currently running across the whole engine (not
    /// scoped to the queried tenant — the worker pool is shared).
    pub active_jobs: usize,
    /// Frozen memtables still awaiting flush for this tenant.
    pub wal_lag: u64,
    /// Snapshot sequences currently held open by readers, engine-wide.
    pub open_snapshots: usize,
}

/// One step of a query's evaluation plan, as reported by [`Engine::explain`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainResult {
    pub plan_steps: Vec<String>,
    /// Rough cost estimate: number of candidate files/index lookups the
    /// plan is expected to touch, before MVCC resolution and predicates.
    pub estimated_cost: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_max_bytes: 32 * 1024 * 1024,
            wal_max_record_size: None,
            fsync_policy: crate::wal::FsyncPolicy::PerWrite,
            compaction: CompactionConfig::default(),
        }
    }
}

/// Handle to an open storage engine: owns the shared [`BlockStore`] and
/// [`Catalog`], and exposes an [`IngestionCoordinator`] / [`QueryExecutor`]
/// per tenant. Cloning is cheap — every field is `Arc`-backed.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn BlockStore>,
    catalog: Arc<Catalog>,
    config: EngineConfig,
    ingestion: Arc<IngestionCoordinator>,
    compaction_pool: Arc<RwLock<Option<CompactionWorkerPool>>>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `path`, replaying the catalog
    /// journal to recover prior state. Per-tenant memtables are opened
    /// lazily on first write/read.
    pub fn open(path: impl Into<std::path::PathBuf>, config: EngineConfig) -> Result<Self, EngineError> {
        let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::open(path.into())?);
        Self::open_with_store(store, config)
    }

    /// Opens an engine over an already-constructed [`BlockStore`] — the seam
    /// used by tests to run against an in-memory-backed temp directory.
    pub fn open_with_store(store: Arc<dyn BlockStore>, config: EngineConfig) -> Result<Self, EngineError> {
        let catalog = Arc::new(Catalog::open(Arc::clone(&store))?);
        let ingestion = Arc::new(IngestionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            config.memtable_max_bytes,
            config.wal_max_record_size,
            config.fsync_policy.clone(),
            config.compaction.secondary_index.clone(),
        ));

        info!("engine opened");

        Ok(Self {
            store,
            catalog,
            config,
            ingestion,
            compaction_pool: Arc::new(RwLock::new(None)),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn ingestion(&self) -> &Arc<IngestionCoordinator> {
        &self.ingestion
    }

    /// Builds a [`QueryExecutor`] for `tenant_id`, pinned to the engine's
    /// current tenant memtable views and shared catalog/store.
    pub fn query(&self, tenant_id: impl Into<String>) -> QueryExecutor {
        QueryExecutor::new(
            tenant_id.into(),
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            Arc::clone(&self.ingestion),
            self.config.compaction.secondary_index.clone(),
        )
    }

    /// Explains how `plan` would be evaluated against `tenant_id`, without
    /// running it: which candidate files the catalog lists, and whether an
    /// eligible equality predicate would be served from a secondary index.
    pub fn explain(&self, tenant_id: &str, plan: &QueryPlan) -> Result<ExplainResult, EngineError> {
        let snapshot = match plan.snapshot {
            Some(s) => s,
            None => self.catalog.next_snapshot()?,
        };
        let candidate_files = self.catalog.list_files(tenant_id, &plan.start_key, &plan.end_key, snapshot)?;

        let mut plan_steps = vec![
            "scan active memtable".to_string(),
            "scan frozen memtables".to_string(),
            format!("scan {} catalog-listed column file(s)", candidate_files.len()),
        ];

        let eq_predicate = plan
            .predicates
            .iter()
            .find(|p| p.op == query::PredicateOp::Eq && self.config.compaction.secondary_index.columns.iter().any(|c| c == &p.column));
        if let Some(pred) = eq_predicate {
            plan_steps.push(format!("consult secondary index on '{}' where selectivity clears the configured threshold", pred.column));
        }
        if !plan.predicates.is_empty() {
            plan_steps.push(format!("prune candidate files via footer statistics ({} predicate(s))", plan.predicates.len()));
            plan_steps.push("apply remaining predicates after merge".to_string());
        }
        if plan.projection.is_some() {
            plan_steps.push("project requested columns".to_string());
        }

        let estimated_cost = candidate_files.len() as u64 + 2;
        Ok(ExplainResult { plan_steps, estimated_cost })
    }

    /// Point-in-time storage and activity counters for `tenant_id`.
    pub fn get_stats(&self, tenant_id: &str) -> Result<EngineStats, EngineError> {
        let files = self.catalog.files_for_tenant(tenant_id)?;
        let max_level = files.iter().map(|f| f.level).max().unwrap_or(0) as usize;

        let mut files_per_level = vec![0usize; max_level + 1];
        let mut bytes_per_level = vec![0u64; max_level + 1];
        for file in files.iter().filter(|f| f.is_live()) {
            files_per_level[file.level as usize] += 1;
            bytes_per_level[file.level as usize] += file.byte_size;
        }

        let active_jobs = self.compaction_pool.read().unwrap_or_else(|e| e.into_inner()).as_ref().map_or(0, |pool| pool.active_jobs());
        let wal_lag = self.ingestion.frozen_memtables(tenant_id)?.len() as u64;

        Ok(EngineStats {
            files_per_level,
            bytes_per_level,
            active_jobs,
            wal_lag,
            open_snapshots: self.catalog.open_snapshot_count(),
        })
    }

    /// Permanently drops `tenant_id`'s table: every column file, WAL
    /// segment, and in-memory memtable for it. Schema history is left in
    /// the catalog.
    pub fn drop_table(&self, tenant_id: &str) -> Result<(), EngineError> {
        self.ingestion.drop_tenant(tenant_id)
    }

    /// Starts the background leveled-compaction worker pool for the given
    /// tenants. Idempotent: replaces any previously running pool.
    pub fn start_compaction(&self, tenants: Vec<String>) {
        let pool = CompactionWorkerPool::spawn(Arc::clone(&self.catalog), Arc::clone(&self.store), self.config.compaction.clone(), tenants);
        let mut slot = self.compaction_pool.write().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.shutdown();
        }
        *slot = Some(pool);
    }

    /// Runs a single compaction pass for `tenant_id` inline, without the
    /// background worker pool. Returns `true` if a job ran.
    pub fn compact_once(&self, tenant_id: &str) -> Result<bool, EngineError> {
        let mut round_robin = HashMap::new();
        let Some(job) = crate::compaction::leveled::pick_job(&self.catalog, tenant_id, &self.config.compaction, &mut round_robin)? else {
            return Ok(false);
        };
        crate::compaction::leveled::run_job(&self.catalog, self.store.as_ref(), &self.config.compaction, &job)?;
        Ok(true)
    }

    /// Flushes every frozen memtable across every tenant that currently has
    /// one queued. Used by tests and graceful shutdown to make writes
    /// durable as column files before closing.
    pub fn flush_all(&self) -> Result<(), EngineError> {
        self.ingestion.flush_all_pending()
    }

    /// Checkpoints the catalog and flushes all pending memtables. Should be
    /// called before dropping the engine to bound WAL replay time on the
    /// next open.
    pub fn close(&self) -> Result<(), EngineError> {
        self.flush_all()?;
        if let Some(pool) = self.compaction_pool.write().unwrap_or_else(|e| e.into_inner()).take() {
            pool.shutdown();
        }
        self.catalog.checkpoint()?;
        Ok(())
    }
}
