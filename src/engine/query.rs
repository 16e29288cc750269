//! Query execution: snapshot acquisition, file/memtable fan-in, MVCC
//! resolution, predicate evaluation, projection, and aggregation.
//!
//! A query merges three kinds of sorted record streams — the tenant's
//! active memtable, its frozen-but-not-yet-flushed memtables, and every
//! on-disk column file the catalog lists as overlapping the requested key
//! range and snapshot — through [`crate::engine::utils::MergeIterator`],
//! truncates to the requested snapshot, then resolves tombstones with
//! [`crate::engine::visibility::VisibilityFilter`]. Value predicates are
//! applied after merge for correctness; footer statistics prune whole
//! candidate files beforehand, and a configured column's equality
//! predicate may instead be served straight from its secondary index when
//! the column is selective enough.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::block_store::BlockStore;
use crate::catalog::Catalog;
use crate::column_file::secondary_index::{SecondaryIndex, SecondaryIndexConfig};
use crate::column_file::{ColumnFile, ColumnFilePropertiesBlock, GetResult};
use crate::schema::Schema;

use super::ingestion::IngestionCoordinator;
use super::utils::{compare_values, decode_row, value_as_f64, Record, Value};
use super::visibility::VisibilityFilter;
use super::EngineError;

/// A single column comparison applied to every surviving row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// `column <op> value`, evaluated against a row's decoded columns.
#[derive(Debug, Clone)]
pub struct ValuePredicate {
    pub column: String,
    pub op: PredicateOp,
    pub value: Value,
}

impl ValuePredicate {
    pub fn new(column: impl Into<String>, op: PredicateOp, value: Value) -> Self {
        Self { column: column.into(), op, value }
    }

    /// Resolves `self.column` against `schema` and compares. A column the
    /// schema doesn't carry, or a comparison with no defined ordering,
    /// fails the predicate rather than panicking.
    fn matches(&self, schema: &Schema, columns: &[Value]) -> bool {
        let Some(idx) = schema.columns.iter().position(|c| c.name == self.column) else { return false };
        let Some(actual) = columns.get(idx) else { return false };
        let Some(ordering) = compare_values(actual, &self.value) else { return false };
        match self.op {
            PredicateOp::Eq => ordering == Ordering::Equal,
            PredicateOp::Ne => ordering != Ordering::Equal,
            PredicateOp::Lt => ordering == Ordering::Less,
            PredicateOp::Le => ordering != Ordering::Greater,
            PredicateOp::Gt => ordering == Ordering::Greater,
            PredicateOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A resolved query against one tenant's key space.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    /// Read snapshot. `None` acquires the latest observed sequence number.
    pub snapshot: Option<u64>,
    /// Column names to keep, in order. `None` returns every column.
    pub projection: Option<Vec<String>>,
    /// Value predicates every surviving row must satisfy (conjunction).
    pub predicates: Vec<ValuePredicate>,
}

impl QueryPlan {
    pub fn scan(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self { start_key: start_key.into(), end_key: end_key.into(), snapshot: None, projection: None, predicates: Vec::new() }
    }

    pub fn point(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        let mut end = key.clone();
        end.push(0x00);
        Self { start_key: key, end_key: end, snapshot: None, projection: None, predicates: Vec::new() }
    }

    pub fn at_snapshot(mut self, snapshot: u64) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_projection(mut self, columns: Vec<String>) -> Self {
        self.projection = Some(columns);
        self
    }

    pub fn with_predicates(mut self, predicates: Vec<ValuePredicate>) -> Self {
        self.predicates = predicates;
        self
    }
}

/// One row surviving MVCC resolution, predicates, and projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub key: Vec<u8>,
    pub columns: Vec<Value>,
    pub schema_version: u32,
}

/// The five aggregation kinds the query executor can compute per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate to compute per group. `column` is ignored for `Count`.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    pub column: String,
}

/// A query plus a grouping and a list of aggregates to compute per group.
#[derive(Debug, Clone)]
pub struct AggregationPlan {
    pub query: QueryPlan,
    pub group_by: Vec<String>,
    pub aggregates: Vec<AggregateSpec>,
}

/// One output row of an aggregation: the group key followed by each
/// aggregate's computed value, in `aggregates` order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateGroup {
    pub key: Vec<Value>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub groups: Vec<AggregateGroup>,
}

struct AggregateAccumulator {
    kind: AggregateKind,
    count: u64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggregateAccumulator {
    fn new(kind: AggregateKind) -> Self {
        Self { kind, count: 0, sum: 0.0, min: None, max: None }
    }

    fn observe(&mut self, value: Option<&Value>) {
        match self.kind {
            AggregateKind::Count => self.count += 1,
            AggregateKind::Sum | AggregateKind::Avg => {
                if let Some(n) = value.and_then(value_as_f64) {
                    self.sum += n;
                    self.count += 1;
                }
            }
            AggregateKind::Min => {
                if let Some(v) = value.filter(|v| !matches!(v, Value::Null)) {
                    if self.min.as_ref().is_none_or(|cur| matches!(compare_values(v, cur), Some(Ordering::Less))) {
                        self.min = Some(v.clone());
                    }
                }
            }
            AggregateKind::Max => {
                if let Some(v) = value.filter(|v| !matches!(v, Value::Null)) {
                    if self.max.as_ref().is_none_or(|cur| matches!(compare_values(v, cur), Some(Ordering::Greater))) {
                        self.max = Some(v.clone());
                    }
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self.kind {
            AggregateKind::Count => Value::I64(self.count as i64),
            AggregateKind::Sum => Value::F64(self.sum),
            AggregateKind::Avg if self.count == 0 => Value::Null,
            AggregateKind::Avg => Value::F64(self.sum / self.count as f64),
            AggregateKind::Min => self.min.unwrap_or(Value::Null),
            AggregateKind::Max => self.max.unwrap_or(Value::Null),
        }
    }
}

/// Executes [`QueryPlan`]s against one tenant's memtables and catalog-listed
/// column files.
pub struct QueryExecutor {
    tenant_id: String,
    store: Arc<dyn BlockStore>,
    catalog: Arc<Catalog>,
    ingestion: Arc<IngestionCoordinator>,
    secondary_index: SecondaryIndexConfig,
}

impl QueryExecutor {
    pub fn new(
        tenant_id: String,
        store: Arc<dyn BlockStore>,
        catalog: Arc<Catalog>,
        ingestion: Arc<IngestionCoordinator>,
        secondary_index: SecondaryIndexConfig,
    ) -> Self {
        Self { tenant_id, store, catalog, ingestion, secondary_index }
    }

    /// Runs `plan` to completion, returning every surviving row eagerly.
    ///
    /// The wire contract this executes against (snapshot-bounded, tombstone
    /// resolved, predicate filtered, projected) matches a lazily-streamed
    /// cursor; eager collection here trades the "restartable checkpoint
    /// stream" behavior for a simpler implementation, since query results
    /// in this engine are not currently large enough to require
    /// back-pressure.
    pub fn run(&self, plan: QueryPlan) -> Result<Vec<ResultRow>, EngineError> {
        let snapshot = match plan.snapshot {
            Some(s) => s,
            None => self.catalog.next_snapshot()?,
        };
        let _guard = self.catalog.acquire_snapshot(snapshot)?;

        let mut owned_records: Vec<Record> = Vec::new();

        let active = self.ingestion.active_memtable(&self.tenant_id)?;
        collect_memtable_records(active.iter_for_flush().map_err(EngineError::from)?, &plan.start_key, &plan.end_key, &mut owned_records);

        for frozen in self.ingestion.frozen_memtables(&self.tenant_id)? {
            collect_memtable_records(frozen.iter_for_flush().map_err(EngineError::from)?, &plan.start_key, &plan.end_key, &mut owned_records);
        }

        let eq_predicate = self.secondary_eligible_predicate(&plan);

        let candidate_files = self.catalog.list_files(&self.tenant_id, &plan.start_key, &plan.end_key, snapshot)?;
        let mut readers = Vec::with_capacity(candidate_files.len());
        let mut pruned = 0usize;
        for entry in &candidate_files {
            let name = crate::compaction::file_blob_name(&self.tenant_id, entry.level, entry.file_id);
            let mut cf = ColumnFile::open(self.store.as_ref(), &name)?;
            cf.id = entry.file_id;

            if !plan.predicates.is_empty() && !file_may_satisfy(&cf.properties, &plan.predicates) {
                pruned += 1;
                continue;
            }

            if let Some(pred) = eq_predicate {
                if let Some(hits) = self.try_secondary_index(&cf, entry.level, entry.file_id, pred, &plan.start_key, &plan.end_key)? {
                    owned_records.extend(hits);
                    continue;
                }
            }

            readers.push(cf);
        }
        if pruned > 0 {
            debug!(tenant = %self.tenant_id, pruned, "skipped column files via footer statistics pruning");
        }

        owned_records.sort();

        let mut iters: Vec<Box<dyn Iterator<Item = Record> + '_>> = Vec::with_capacity(readers.len() + 1);
        iters.push(Box::new(owned_records.into_iter()));
        for reader in &readers {
            iters.push(Box::new(reader.scan(&plan.start_key, &plan.end_key)?));
        }

        let merged = super::utils::MergeIterator::new(iters);
        let bounded = merged.filter(move |record| record.seq() <= snapshot);
        let visible = VisibilityFilter::new(bounded);

        let mut rows = Vec::new();
        for (key, columns, schema_version) in visible {
            if key.as_slice() < plan.start_key.as_slice() || key.as_slice() >= plan.end_key.as_slice() {
                continue;
            }

            let needs_schema = !plan.predicates.is_empty() || plan.projection.is_some();
            let schema = if needs_schema {
                Some(self.catalog.get_schema(&self.tenant_id, schema_version)?.ok_or_else(|| EngineError::NoSchema(self.tenant_id.clone()))?)
            } else {
                None
            };

            if let Some(schema) = &schema {
                if !plan.predicates.iter().all(|p| p.matches(schema, &columns)) {
                    continue;
                }
            }

            let columns = match (&schema, plan.projection.as_deref()) {
                (Some(schema), Some(wanted)) => project_with_schema(schema, &columns, wanted),
                _ => columns,
            };

            rows.push(ResultRow { key, columns, schema_version });
        }

        Ok(rows)
    }

    /// Runs `plan.query`, groups the surviving rows by `plan.group_by`, and
    /// computes each of `plan.aggregates` per group.
    pub fn aggregate(&self, plan: AggregationPlan) -> Result<AggregateResult, EngineError> {
        let rows = self.run(plan.query)?;

        let mut groups: Vec<(Vec<Value>, Vec<AggregateAccumulator>)> = Vec::new();

        for row in rows {
            let schema = self.catalog.get_schema(&self.tenant_id, row.schema_version)?.ok_or_else(|| EngineError::NoSchema(self.tenant_id.clone()))?;

            let key: Vec<Value> = plan
                .group_by
                .iter()
                .map(|name| {
                    schema.columns.iter().position(|c| &c.name == name).and_then(|i| row.columns.get(i)).cloned().unwrap_or(Value::Null)
                })
                .collect();

            let slot = match groups.iter().position(|(k, _)| k == &key) {
                Some(i) => i,
                None => {
                    groups.push((key, plan.aggregates.iter().map(|spec| AggregateAccumulator::new(spec.kind)).collect()));
                    groups.len() - 1
                }
            };

            for (spec, acc) in plan.aggregates.iter().zip(groups[slot].1.iter_mut()) {
                let value = schema.columns.iter().position(|c| &c.name == &spec.column).and_then(|i| row.columns.get(i));
                acc.observe(value);
            }
        }

        let groups = groups.into_iter().map(|(key, accs)| AggregateGroup { key, values: accs.into_iter().map(|a| a.finish()).collect() }).collect();
        Ok(AggregateResult { groups })
    }

    /// Point lookup convenience wrapper over [`Self::run`].
    pub fn get(&self, key: &[u8], snapshot: Option<u64>) -> Result<Option<ResultRow>, EngineError> {
        let mut plan = QueryPlan::point(key.to_vec());
        plan.snapshot = snapshot;
        Ok(self.run(plan)?.into_iter().next())
    }

    /// The equality predicate, if any, whose column is configured for
    /// secondary indexing.
    fn secondary_eligible_predicate<'a>(&self, plan: &'a QueryPlan) -> Option<&'a ValuePredicate> {
        plan.predicates.iter().find(|p| p.op == PredicateOp::Eq && self.secondary_index.columns.iter().any(|c| c == &p.column))
    }

    /// Consults `cf`'s secondary index for `pred` when the column's
    /// footer-reported selectivity clears the configured threshold.
    /// Returns `None` when the index isn't worth consulting (or isn't
    /// present), leaving the caller to fall back to a full file scan.
    fn try_secondary_index(
        &self,
        cf: &ColumnFile,
        level: u32,
        file_id: u64,
        pred: &ValuePredicate,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<Vec<Record>>, EngineError> {
        let Some(stats) = cf.properties.column_stats.iter().find(|s| s.name == pred.column) else { return Ok(None) };
        let row_count = cf.properties.record_count.max(1);
        let selectivity = stats.distinct_estimate as f64 / row_count as f64;
        if selectivity >= self.secondary_index.selectivity_threshold {
            return Ok(None);
        }

        let name = crate::compaction::sidx_blob_name(&self.tenant_id, level, file_id, &pred.column);
        let sidx = match SecondaryIndex::open(self.store.as_ref(), &name) {
            Ok(sidx) => sidx,
            Err(_) => return Ok(None),
        };

        let Some(row_keys) = sidx.lookup_eq(&pred.value) else { return Ok(Some(Vec::new())) };

        let mut out = Vec::with_capacity(row_keys.len());
        for key in row_keys {
            if key.as_slice() < start || key.as_slice() >= end {
                continue;
            }
            match cf.get(key)? {
                GetResult::Put { value, version, seq, timestamp } => {
                    let columns = decode_row(&value).map_err(|e| EngineError::Internal(e.to_string()))?;
                    out.push(Record::Put { key: key.clone(), columns, version, seq, timestamp });
                }
                GetResult::Delete { seq, timestamp } => out.push(Record::Delete { key: key.clone(), seq, timestamp }),
                GetResult::RangeDelete { seq, timestamp } => out.push(Record::Delete { key: key.clone(), seq, timestamp }),
                GetResult::NotFound => {}
            }
        }

        debug!(tenant = %self.tenant_id, column = %pred.column, selectivity, hits = out.len(), "served equality predicate from secondary index");
        Ok(Some(out))
    }
}

/// Returns `false` only when the footer's recorded `[min, max]` range for
/// `predicate.column` provably cannot satisfy `predicate`. A column
/// without recorded stats, or a predicate this check can't reason about,
/// is treated as potentially satisfiable.
fn file_may_satisfy(properties: &ColumnFilePropertiesBlock, predicates: &[ValuePredicate]) -> bool {
    for predicate in predicates {
        let Some(stats) = properties.column_stats.iter().find(|s| s.name == predicate.column) else { continue };
        let (Some(min), Some(max)) = (&stats.min, &stats.max) else { continue };

        let feasible = match predicate.op {
            PredicateOp::Eq => compare_values(&predicate.value, min) != Some(Ordering::Less) && compare_values(&predicate.value, max) != Some(Ordering::Greater),
            PredicateOp::Lt => compare_values(min, &predicate.value) == Some(Ordering::Less),
            PredicateOp::Le => compare_values(min, &predicate.value) != Some(Ordering::Greater),
            PredicateOp::Gt => compare_values(max, &predicate.value) == Some(Ordering::Greater),
            PredicateOp::Ge => compare_values(max, &predicate.value) != Some(Ordering::Less),
            PredicateOp::Ne => true,
        };

        if !feasible {
            return false;
        }
    }
    true
}

fn collect_memtable_records(records: impl Iterator<Item = crate::memtable::MemtableRecord>, start: &[u8], end: &[u8], out: &mut Vec<Record>) {
    for record in records {
        let converted = match record {
            crate::memtable::MemtableRecord::Put { key, row, version, seq, timestamp } => {
                if key.as_slice() < start || key.as_slice() >= end {
                    continue;
                }
                let columns = match decode_row(&row) {
                    Ok(columns) => columns,
                    Err(_) => continue,
                };
                Record::Put { key, columns, version, seq, timestamp }
            }
            crate::memtable::MemtableRecord::Delete { key, seq, timestamp } => {
                if key.as_slice() < start || key.as_slice() >= end {
                    continue;
                }
                Record::Delete { key, seq, timestamp }
            }
            crate::memtable::MemtableRecord::RangeDelete { start: rstart, end: rend, seq, timestamp } => {
                if rend.as_slice() <= start || rstart.as_slice() >= end {
                    continue;
                }
                Record::RangeDelete { start: rstart, end: rend, seq, timestamp }
            }
        };
        out.push(converted);
    }
}

fn project_with_schema(schema: &Schema, columns: &[Value], wanted: &[String]) -> Vec<Value> {
    let mut out = Vec::with_capacity(wanted.len());
    for name in wanted {
        let idx = schema.columns.iter().position(|c| &c.name == name);
        out.push(match idx.and_then(|i| columns.get(i)) {
            Some(value) => value.clone(),
            None => Value::Null,
        });
    }
    out
}
