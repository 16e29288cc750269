//! Trigger policy, input selection, and job execution for leveled compaction.
//!
//! L0 is compacted into L1 once its live file count passes
//! [`CompactionConfig::l0_file_count_trigger`], taking every overlapping L1
//! file along with it. From L1 downward, a single file is picked per job
//! (round-robin across calls, to avoid starving the tail of a level) together
//! with every file it overlaps in the level below.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::block_store::BlockStore;
use crate::catalog::{Catalog, FileEntry};
use crate::column_file::ColumnFile;

use super::{chunk_outputs, dedup_and_retain, file_blob_name, write_chunk, CompactionConfig, CompactionError};

/// A selected unit of compaction work.
#[derive(Debug, Clone)]
pub struct CompactionJob {
    pub tenant_id: String,
    pub target_level: u32,
    pub inputs: Vec<FileEntry>,
    /// True when `target_level` is at or beyond the deepest level currently
    /// holding data for this tenant — no file outside `inputs` can hold an
    /// older version of any key in range, so shadowed tombstones can be
    /// dropped outright.
    pub is_bottom_level: bool,
}

fn key_ranges_overlap(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    a_min <= b_max && b_min <= a_max
}

/// Picks the next compaction job for `tenant_id`, if any level is over
/// threshold. `round_robin` tracks, per `(tenant, level)`, the index of the
/// next L_k file to consider so repeated calls sweep the whole level instead
/// of always picking the same file.
pub fn pick_job(catalog: &Catalog, tenant_id: &str, config: &CompactionConfig, round_robin: &mut HashMap<(String, u32), usize>) -> Result<Option<CompactionJob>, CompactionError> {
    let files = catalog.files_for_tenant(tenant_id)?;
    let mut by_level: BTreeMap<u32, Vec<FileEntry>> = BTreeMap::new();
    for f in files.into_iter().filter(|f| f.is_live()) {
        by_level.entry(f.level).or_default().push(f);
    }

    let deepest = by_level.keys().copied().max().unwrap_or(0);

    let l0 = by_level.get(&0).cloned().unwrap_or_default();
    if l0.len() > config.l0_file_count_trigger {
        let l0_min = l0.iter().map(|f| f.min_key.clone()).min().unwrap();
        let l0_max = l0.iter().map(|f| f.max_key.clone()).max().unwrap();
        let l1 = by_level.get(&1).cloned().unwrap_or_default();
        let mut inputs = l0;
        inputs.extend(l1.into_iter().filter(|f| key_ranges_overlap(&f.min_key, &f.max_key, &l0_min, &l0_max)));
        let is_bottom_level = deepest <= 1;
        return Ok(Some(CompactionJob { tenant_id: tenant_id.to_string(), target_level: 1, inputs, is_bottom_level }));
    }

    // Find the level (k >= 1) with the largest overflow ratio over its byte budget.
    let mut best: Option<(u32, f64)> = None;
    for (level, entries) in by_level.iter() {
        let level = *level;
        if level == 0 {
            continue;
        }
        let total: u64 = entries.iter().map(|f| f.byte_size).sum();
        let budget = config.max_size(level);
        if total > budget {
            let ratio = total as f64 / budget as f64;
            if best.map(|(_, r)| ratio > r).unwrap_or(true) {
                best = Some((level, ratio));
            }
        }
    }

    let Some((level, _)) = best else {
        return Ok(None);
    };

    let source = by_level.get(&level).cloned().unwrap_or_default();
    if source.is_empty() {
        return Ok(None);
    }
    let mut sorted = source;
    sorted.sort_by(|a, b| a.min_key.cmp(&b.min_key));

    let rr_key = (tenant_id.to_string(), level);
    let start = *round_robin.get(&rr_key).unwrap_or(&0) % sorted.len();
    round_robin.insert(rr_key, (start + 1) % sorted.len().max(1));

    let chosen = sorted[start].clone();
    let next = by_level.get(&(level + 1)).cloned().unwrap_or_default();
    let mut inputs = vec![chosen.clone()];
    inputs.extend(next.into_iter().filter(|f| key_ranges_overlap(&f.min_key, &f.max_key, &chosen.min_key, &chosen.max_key)));

    let target_level = level + 1;
    let is_bottom_level = target_level >= deepest;
    Ok(Some(CompactionJob { tenant_id: tenant_id.to_string(), target_level, inputs, is_bottom_level }))
}

/// Runs `job` to completion: merges inputs, writes output files, and commits
/// the result atomically through the catalog. On any error prior to commit,
/// partially written output blobs are removed and inputs are left untouched.
pub fn run_job(catalog: &Catalog, store: &dyn BlockStore, config: &CompactionConfig, job: &CompactionJob) -> Result<(), CompactionError> {
    let job_id = catalog.allocate_job_id()?;
    info!(tenant = %job.tenant_id, target_level = job.target_level, inputs = job.inputs.len(), job_id, "starting compaction job");

    let min_key = job.inputs.iter().map(|f| f.min_key.clone()).min().unwrap_or_default();
    let mut max_key = job.inputs.iter().map(|f| f.max_key.clone()).max().unwrap_or_default();
    max_key.push(0xFF);

    let mut readers = Vec::with_capacity(job.inputs.len());
    for input in &job.inputs {
        let name = file_blob_name(&job.tenant_id, input.level, input.file_id);
        let mut cf = ColumnFile::open(store, &name)?;
        cf.id = input.file_id;
        readers.push(cf);
    }

    let mut iters: Vec<Box<dyn Iterator<Item = crate::column_file::Record> + '_>> = Vec::with_capacity(readers.len());
    for reader in &readers {
        iters.push(Box::new(reader.scan(&min_key, &max_key)?));
    }

    let merged = crate::engine::utils::MergeIterator::new(iters);
    let min_active_snapshot = catalog.min_active_snapshot();
    let (points, ranges) = dedup_and_retain(merged, min_active_snapshot, job.is_bottom_level);

    let retired_ids: Vec<u64> = job.inputs.iter().map(|f| f.file_id).collect();

    if points.is_empty() && ranges.is_empty() {
        catalog.commit_compaction(job_id, vec![], retired_ids)?;
        info!(job_id, "compaction job dropped all input rows");
        return Ok(());
    }

    let chunks = chunk_outputs(points, ranges, config.target_file_bytes(job.target_level));
    let mut new_entries = Vec::with_capacity(chunks.len());
    let mut written_names = Vec::with_capacity(chunks.len());

    for chunk in &chunks {
        let file_id = match catalog.allocate_file_id() {
            Ok(id) => id,
            Err(e) => {
                cleanup_outputs(store, &written_names);
                return Err(e.into());
            }
        };
        let name = file_blob_name(&job.tenant_id, job.target_level, file_id);
        if let Err(e) = write_chunk(store, &name, chunk, catalog, &job.tenant_id, job.target_level, file_id, &config.secondary_index) {
            cleanup_outputs(store, &written_names);
            return Err(e);
        }
        written_names.push(name);
        new_entries.push(FileEntry {
            file_id,
            tenant_id: job.tenant_id.clone(),
            level: job.target_level,
            min_key: chunk.min_key.clone(),
            max_key: chunk.max_key.clone(),
            min_seq: chunk.min_seq,
            max_seq: chunk.max_seq,
            row_count: chunk.row_count,
            byte_size: chunk.points.iter().map(|p| (p.key.len() + p.value.as_ref().map_or(0, |v| v.len())) as u64).sum(),
            schema_version: chunk.schema_version,
            stats_digest: 0,
            created_at: chunk.max_seq,
            state: crate::catalog::FileState::Live,
        });
    }

    if let Err(e) = catalog.commit_compaction(job_id, new_entries, retired_ids) {
        cleanup_outputs(store, &written_names);
        return Err(e.into());
    }

    info!(job_id, outputs = chunks.len(), "compaction job committed");
    Ok(())
}

fn cleanup_outputs(store: &dyn BlockStore, names: &[String]) {
    for name in names {
        if let Err(e) = store.delete(name) {
            warn!(name, error = %e, "failed to clean up orphaned compaction output");
        }
    }
}

/// A bounded pool of background workers that repeatedly pick and run
/// compaction jobs for a fixed set of tenants. The scheduler keeps an
/// in-flight set of file ids so two jobs never touch the same file
/// concurrently; jobs with disjoint inputs proceed in parallel.
pub struct CompactionWorkerPool {
    shutdown: Sender<()>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
    state: Arc<SharedState>,
}

struct SharedState {
    catalog: Arc<Catalog>,
    store: Arc<dyn BlockStore>,
    config: CompactionConfig,
    tenants: Vec<String>,
    round_robin: Mutex<HashMap<(String, u32), usize>>,
    in_flight: Mutex<std::collections::HashSet<u64>>,
    active_jobs: std::sync::atomic::AtomicUsize,
}

impl CompactionWorkerPool {
    pub fn spawn(catalog: Arc<Catalog>, store: Arc<dyn BlockStore>, config: CompactionConfig, tenants: Vec<String>) -> Self {
        let (shutdown_tx, shutdown_rx): (Sender<()>, Receiver<()>) = channel::bounded(0);
        let workers = config.workers.max(1);
        let state = Arc::new(SharedState {
            catalog,
            store,
            config,
            tenants,
            round_robin: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(std::collections::HashSet::new()),
            active_jobs: std::sync::atomic::AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let worker_state = Arc::clone(&state);
            let shutdown_rx = shutdown_rx.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("compaction-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, worker_state, shutdown_rx))
                    .expect("failed to spawn compaction worker thread"),
            );
        }

        Self { shutdown: shutdown_tx, handles: Mutex::new(handles), state }
    }

    /// Number of compaction jobs currently running across all workers.
    pub fn active_jobs(&self) -> usize {
        self.state.active_jobs.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Signals all workers to stop and blocks until they exit.
    pub fn shutdown(self) {
        drop(self.shutdown);
        for handle in self.handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker_id: usize, state: Arc<SharedState>, shutdown_rx: Receiver<()>) {
    let mut backoff = Duration::from_millis(50);
    loop {
        match shutdown_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => return,
            Err(channel::RecvTimeoutError::Disconnected) => return,
            Err(channel::RecvTimeoutError::Timeout) => {}
        }

        let mut ran_job = false;
        for tenant in &state.tenants {
            let job = {
                let mut rr = state.round_robin.lock().unwrap();
                match pick_job(&state.catalog, tenant, &state.config, &mut rr) {
                    Ok(job) => job,
                    Err(e) => {
                        warn!(worker_id, tenant, error = %e, "failed to pick compaction job");
                        continue;
                    }
                }
            };

            let Some(job) = job else { continue };

            let ids: Vec<u64> = job.inputs.iter().map(|f| f.file_id).collect();
            {
                let mut in_flight = state.in_flight.lock().unwrap();
                if ids.iter().any(|id| in_flight.contains(id)) {
                    continue;
                }
                in_flight.extend(ids.iter().copied());
            }

            debug!(worker_id, tenant, target_level = job.target_level, "running compaction job");
            state.active_jobs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let result = run_job(&state.catalog, state.store.as_ref(), &state.config, &job);
            state.active_jobs.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

            state.in_flight.lock().unwrap().retain(|id| !ids.contains(id));

            match result {
                Ok(()) => {
                    ran_job = true;
                    backoff = Duration::from_millis(50);
                }
                Err(e) => {
                    warn!(worker_id, tenant, error = %e, backoff_ms = backoff.as_millis() as u64, "compaction job failed, will retry with backoff");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
        }

        if !ran_job {
            std::thread::sleep(Duration::from_millis(200));
        }
    }
}
