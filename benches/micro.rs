//! Micro-benchmarks for AeternusDB's core engine operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use colstrata::engine::query::QueryPlan;
use colstrata::engine::utils::Value;
use colstrata::engine::{Engine, EngineConfig};
use colstrata::schema::{Column, ColumnType, Schema};
use std::sync::Arc;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Tenant used by every benchmark in this file.
const TENANT: &str = "bench";

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

fn row(bytes: &[u8]) -> Vec<Value> {
    vec![Value::Bytes(bytes.to_vec())]
}

fn register_schema(engine: &Engine) {
    let schema = Schema::new(TENANT, 1, vec![Column::new("value", ColumnType::Bytes, true)]);
    engine.catalog().put_schema(schema).expect("schema registration");
}

/// Open a fresh engine with a small memtable so freezes/flushes happen
/// quickly during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Engine {
    let engine = Engine::open(
        dir,
        EngineConfig { memtable_max_bytes: 4 * 1024, ..EngineConfig::default() },
    )
    .expect("open");
    register_schema(&engine);
    engine
}

/// Open an engine with a large memtable so all data stays resident (no
/// background freezes).
fn open_memtable_only(dir: &std::path::Path) -> Engine {
    let engine = Engine::open(
        dir,
        EngineConfig { memtable_max_bytes: 64 * 1024 * 1024, ..EngineConfig::default() },
    )
    .expect("open");
    register_schema(&engine);
    engine
}

/// Pre-populate an engine with `count` sequential keys and close it, so
/// column files exist on disk.
fn prepopulate(dir: &std::path::Path, count: u64, value: &[u8]) {
    let engine = open_small_buffer(dir);
    for i in 0..count {
        engine.ingestion().put(TENANT, make_key(i), row(value)).unwrap();
    }
    engine.close().unwrap();
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

/// Benchmark group for write (`put`) operations.
///
/// # Sub-benchmarks
///
/// ## `memtable_only/128B` and `memtable_only/1K`
///
/// **Scenario:** Inserts a single key-value pair into an engine configured with a 64 MiB
/// memtable, ensuring no background freezes occur during measurement.
///
/// **What it measures:** The raw cost of writing to the WAL and inserting into the
/// memtable. Two payload sizes (128 B and 1 KiB) reveal how throughput scales with value
/// size.
///
/// ## `sequential_with_flush`
///
/// **Scenario:** Continuously writes 128 B values with a tiny 4 KiB memtable that forces
/// frequent freezes and column-file flushes.
///
/// **What it measures:** Sustained write throughput including the amortised cost of
/// background flushes and I/O. This reflects real-world write-heavy workloads.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for &(label, value) in &[("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.bench_function(BenchmarkId::new("memtable_only", label), |b| {
            let dir = TempDir::new().unwrap();
            let engine = open_memtable_only(dir.path());
            let mut seq = 0u64;

            b.iter(|| {
                let key = make_key(seq);
                engine.ingestion().put(TENANT, black_box(key), row(black_box(value))).unwrap();
                seq += 1;
            });

            engine.close().unwrap();
        });
    }

    group.bench_function("sequential_with_flush", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq);
            engine.ingestion().put(TENANT, black_box(key), row(VALUE_128B.as_slice())).unwrap();
            seq += 1;
        });

        engine.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

/// Benchmark group for read (`get`) operations.
///
/// # Sub-benchmarks
///
/// ## `memtable_hit` / `memtable_miss`
///
/// **Scenario:** Reads randomly from 10,000 keys that all reside in the active memtable.
///
/// **What it measures:** Pure in-memory lookup latency, and the cost of a negative lookup.
///
/// ## `column_file_hit` / `column_file_miss`
///
/// **Scenario:** Reads randomly from 5,000 keys flushed to column files. The engine is
/// reopened so the memtable is empty.
///
/// **What it measures:** Full on-disk read path: bloom filter probe, block index lookup,
/// block decode, and binary search within the block.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let n = 10_000u64;
        for i in 0..n {
            engine.ingestion().put(TENANT, make_key(i), row(VALUE_128B.as_slice())).unwrap();
        }

        group.bench_function("memtable_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
        });

        group.bench_function("memtable_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
        });

        engine.close().unwrap();
    }

    {
        let dir = TempDir::new().unwrap();
        let n = 5_000u64;
        prepopulate(dir.path(), n, VALUE_128B);
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

        group.bench_function("column_file_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
        });

        group.bench_function("column_file_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
        });

        engine.close().unwrap();
    }

    group.finish();
}

// ================================================================================================
// Delete benchmarks
// ================================================================================================

/// Benchmark group for delete operations.
///
/// # Sub-benchmarks
///
/// ## `point`
///
/// **Scenario:** Deletes a single unique key per iteration using a large memtable
/// (no freezes).
///
/// **What it measures:** The cost of inserting a point tombstone into the WAL and memtable.
///
/// ## `range`
///
/// **Scenario:** Issues a range-delete covering 100 consecutive keys per iteration.
///
/// **What it measures:** Range tombstone insertion cost — the engine records one
/// `[start, end)` entry regardless of how many keys the range covers.
fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    group.bench_function("point", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq);
            engine.ingestion().delete(TENANT, black_box(key)).unwrap();
            seq += 1;
        });

        engine.close().unwrap();
    });

    group.bench_function("range", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let mut seq = 0u64;

        b.iter(|| {
            let start = make_key(seq);
            let end = make_key(seq + 100);
            engine.ingestion().delete_range(TENANT, black_box(start), black_box(end)).unwrap();
            seq += 100;
        });

        engine.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Scan benchmarks
// ================================================================================================

/// Benchmark group for ordered range-scan operations.
///
/// Tests scan performance across two storage layers (memtable and column file) and three
/// range sizes (10, 100, 1,000 keys). Criterion's `Throughput::Elements` annotation enables
/// per-key throughput reporting in the output.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let n = 10_000u64;
        for i in 0..n {
            engine.ingestion().put(TENANT, make_key(i), row(VALUE_128B.as_slice())).unwrap();
        }

        for &range_size in &[10u64, 100, 1000] {
            group.throughput(Throughput::Elements(range_size));
            group.bench_function(
                BenchmarkId::new("memtable", format!("{range_size}_keys")),
                |b| {
                    let mut offset = 0u64;
                    b.iter(|| {
                        let start = make_key(offset % (n - range_size));
                        let end = make_key(offset % (n - range_size) + range_size);
                        let plan = QueryPlan::scan(black_box(start), black_box(end));
                        let results = engine.query(TENANT).run(plan).unwrap();
                        black_box(&results);
                        offset += 1;
                    });
                },
            );
        }

        engine.close().unwrap();
    }

    {
        let dir = TempDir::new().unwrap();
        let n = 5_000u64;
        prepopulate(dir.path(), n, VALUE_128B);
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

        for &range_size in &[10u64, 100, 1000] {
            group.throughput(Throughput::Elements(range_size));
            group.bench_function(
                BenchmarkId::new("column_file", format!("{range_size}_keys")),
                |b| {
                    let mut offset = 0u64;
                    b.iter(|| {
                        let start = make_key(offset % (n - range_size));
                        let end = make_key(offset % (n - range_size) + range_size);
                        let plan = QueryPlan::scan(black_box(start), black_box(end));
                        let results = engine.query(TENANT).run(plan).unwrap();
                        black_box(&results);
                        offset += 1;
                    });
                },
            );
        }

        engine.close().unwrap();
    }

    group.finish();
}

// ================================================================================================
// Compaction benchmarks
// ================================================================================================

/// Benchmark group for compaction operations.
///
/// # Sub-benchmarks
///
/// ## `drain_l0/1000` and `drain_l0/5000`
///
/// **Scenario:** Prepopulates N keys via a small memtable (triggering multiple freezes and
/// column files), reopens the engine with the L0 trigger lowered to 1, and drains every
/// pending compaction job via `compact_once`.
///
/// **What it measures:** End-to-end compaction latency — reading overlapping column files,
/// performing a K-way merge, dropping obsolete entries, and writing the merged output.
/// Sample size is reduced to 10 because each iteration is slow.
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    for &count in &[1_000u64, 5_000] {
        group.bench_function(BenchmarkId::new("drain_l0", count), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    prepopulate(dir.path(), count, VALUE_128B);
                    let mut config = EngineConfig::default();
                    config.compaction.l0_file_count_trigger = 1;
                    let engine = Engine::open(dir.path(), config).unwrap();
                    (dir, engine)
                },
                |(_dir, engine)| {
                    while black_box(engine.compact_once(TENANT).unwrap()) {}
                    engine.close().unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Recovery benchmark
// ================================================================================================

/// Benchmark group for engine recovery (open) latency.
///
/// # Sub-benchmarks
///
/// ## `open_existing/1000` and `open_existing/10000`
///
/// **Scenario:** An engine is prepopulated with N keys and closed. Each iteration reopens
/// the engine from that existing state, which rebuilds the catalog and replays any
/// unflushed WAL segments.
///
/// **What it measures:** Cold-start recovery time — catalog journal replay, column-file
/// inventory reconstruction, and bloom-filter initialisation.
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");
    group.sample_size(10);

    for &count in &[1_000u64, 10_000] {
        group.bench_function(BenchmarkId::new("open_existing", count), |b| {
            let dir = TempDir::new().unwrap();
            prepopulate(dir.path(), count, VALUE_128B);

            b.iter(|| {
                let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
                black_box(&engine);
                engine.close().unwrap();
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Value-size scaling
// ================================================================================================

/// Benchmark group for value-size scaling analysis.
///
/// ## `put/{64B,256B,1K,4K}`
///
/// **Scenario:** Writes a single key with a value of the specified size into a memtable-
/// only engine. Criterion's `Throughput::Bytes` annotation enables bytes-per-second
/// reporting.
///
/// **What it measures:** How write latency and throughput scale with value size.
fn bench_value_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_size");

    let sizes: &[(&str, usize)] = &[("64B", 64), ("256B", 256), ("1K", 1024), ("4K", 4096)];

    for &(label, size) in sizes {
        let value = vec![0xEF_u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("put", label), |b| {
            let dir = TempDir::new().unwrap();
            let engine = open_memtable_only(dir.path());
            let mut seq = 0u64;
            b.iter(|| {
                let key = make_key(seq);
                engine.ingestion().put(TENANT, black_box(key), row(black_box(&value))).unwrap();
                seq += 1;
            });
            engine.close().unwrap();
        });
    }

    group.finish();
}

// ================================================================================================
// Concurrent access benchmarks
// ================================================================================================

/// Benchmark group for concurrent (multi-threaded) engine access.
///
/// `Engine` is `Send + Sync` and designed for shared access via `Arc<Engine>`. These
/// benchmarks verify that read throughput scales with reader count and measure the impact
/// of concurrent writes on read latency.
///
/// # Sub-benchmarks
///
/// ## `readers/{1,2,4}`
///
/// **Scenario:** N threads perform random point reads against 10,000 keys in column files.
/// Each thread executes 1,000 reads.
///
/// **What it measures:** Read throughput scaling under contention.
///
/// ## `read_under_write/{1_writer,2_writers}`
///
/// **Scenario:** 2 reader threads perform random reads while 1 or 2 writer threads
/// concurrently insert new keys.
///
/// **What it measures:** Read latency degradation under write pressure.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    let reads_per_thread = 1_000u64;
    let n = 10_000u64;

    for &num_readers in &[1u32, 2, 4] {
        group.bench_function(BenchmarkId::new("readers", num_readers), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    prepopulate(dir.path(), n, VALUE_128B);
                    let engine = Arc::new(Engine::open(dir.path(), EngineConfig::default()).unwrap());
                    (dir, engine)
                },
                |(_dir, engine)| {
                    let mut handles = Vec::new();
                    for t in 0..num_readers {
                        let engine = Arc::clone(&engine);
                        handles.push(std::thread::spawn(move || {
                            for i in 0..reads_per_thread {
                                let key = make_key((i + t as u64 * 1000) % n);
                                let _ = black_box(engine.query(TENANT).get(&key, None).unwrap());
                            }
                        }));
                    }
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    for &num_writers in &[1u32, 2] {
        group.bench_function(
            BenchmarkId::new("read_under_write", format!("{num_writers}_writer")),
            |b| {
                b.iter_batched(
                    || {
                        let dir = TempDir::new().unwrap();
                        prepopulate(dir.path(), n, VALUE_128B);
                        let config = EngineConfig { memtable_max_bytes: 64 * 1024 * 1024, ..EngineConfig::default() };
                        let engine = Arc::new(Engine::open(dir.path(), config).unwrap());
                        (dir, engine)
                    },
                    |(_dir, engine)| {
                        let mut handles = Vec::new();
                        for t in 0..2u32 {
                            let engine = Arc::clone(&engine);
                            handles.push(std::thread::spawn(move || {
                                for i in 0..reads_per_thread {
                                    let key = make_key((i + t as u64 * 1000) % n);
                                    let _ = black_box(engine.query(TENANT).get(&key, None).unwrap());
                                }
                            }));
                        }
                        for w in 0..num_writers {
                            let engine = Arc::clone(&engine);
                            handles.push(std::thread::spawn(move || {
                                for i in 0..200u64 {
                                    let key = make_key(n + w as u64 * 1000 + i);
                                    engine.ingestion().put(TENANT, key, row(VALUE_128B.as_slice())).unwrap();
                                }
                            }));
                        }
                        for h in handles {
                            h.join().unwrap();
                        }
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }

    group.finish();
}

// ================================================================================================
// Overwrite (update) benchmarks
// ================================================================================================

/// Benchmark group for overwriting existing keys.
///
/// ## `update_memtable`
///
/// **Scenario:** Inserts 1,000 keys, then repeatedly overwrites random existing keys with a
/// large memtable so everything stays resident.
///
/// ## `update_column_file`
///
/// **Scenario:** Prepopulates 5,000 keys into column files, reopens, then overwrites random
/// existing keys. The new version lands in the memtable while the old version remains on
/// disk until compaction.
fn bench_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite");

    group.bench_function("update_memtable", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let n = 1_000u64;
        for i in 0..n {
            engine.ingestion().put(TENANT, make_key(i), row(VALUE_128B.as_slice())).unwrap();
        }
        let mut seq = 0u64;
        b.iter(|| {
            let key = make_key(seq % n);
            engine.ingestion().put(TENANT, black_box(key), row(VALUE_128B.as_slice())).unwrap();
            seq += 1;
        });
        engine.close().unwrap();
    });

    group.bench_function("update_column_file", |b| {
        let dir = TempDir::new().unwrap();
        let n = 5_000u64;
        prepopulate(dir.path(), n, VALUE_128B);
        let config = EngineConfig { memtable_max_bytes: 64 * 1024 * 1024, ..EngineConfig::default() };
        let engine = Engine::open(dir.path(), config).unwrap();
        let mut seq = 0u64;
        b.iter(|| {
            let key = make_key(seq % n);
            engine.ingestion().put(TENANT, black_box(key), row(VALUE_128B.as_slice())).unwrap();
            seq += 1;
        });
        engine.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Dataset scaling benchmarks
// ================================================================================================

/// Benchmark group for dataset-size scaling.
///
/// ## `get/{1K,10K,50K,100K}`
///
/// **Scenario:** Prepopulates N keys into column files, reopens, and measures random
/// point-read latency.
fn bench_dataset_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataset_scaling");
    group.sample_size(10);

    for &count in &[1_000u64, 10_000, 50_000, 100_000] {
        let label = match count {
            1_000 => "1K",
            10_000 => "10K",
            50_000 => "50K",
            100_000 => "100K",
            _ => unreachable!(),
        };

        group.bench_function(BenchmarkId::new("get", label), |b| {
            let dir = TempDir::new().unwrap();
            prepopulate(dir.path(), count, VALUE_128B);
            let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % count);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
            engine.close().unwrap();
        });
    }

    group.finish();
}

// ================================================================================================
// Scan-with-tombstones benchmark
// ================================================================================================

/// Benchmark group for scan performance in the presence of tombstones.
///
/// ## `dense_tombstones/{0%,25%,50%,75%}`
///
/// **Scenario:** Prepopulates 5,000 keys, deletes a percentage of them (evenly spaced),
/// flushes to column files, and scans 100 keys.
///
/// **What it measures:** How tombstones affect scan throughput. Without compaction,
/// deleted keys still occupy space in column files and must be skipped during iteration.
fn bench_tombstone_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("tombstone_scan");
    group.sample_size(10);

    let n = 5_000u64;
    let scan_size = 100u64;

    for &pct in &[0u32, 25, 50, 75] {
        group.throughput(Throughput::Elements(scan_size));
        group.bench_function(
            BenchmarkId::new("dense_tombstones", format!("{pct}%")),
            |b| {
                let dir = TempDir::new().unwrap();
                let engine = open_small_buffer(dir.path());
                for i in 0..n {
                    engine.ingestion().put(TENANT, make_key(i), row(VALUE_128B.as_slice())).unwrap();
                }
                let delete_every = if pct == 0 { 0 } else { 100 / pct };
                if delete_every > 0 {
                    for i in 0..n {
                        if i % delete_every as u64 == 0 {
                            engine.ingestion().delete(TENANT, make_key(i)).unwrap();
                        }
                    }
                }
                engine.close().unwrap();
                // Reopen — everything in column files, no compaction run.
                let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

                let mut offset = 0u64;
                b.iter(|| {
                    let start = make_key(offset % (n - scan_size));
                    let end = make_key(offset % (n - scan_size) + scan_size);
                    let plan = QueryPlan::scan(black_box(start), black_box(end));
                    let results = engine.query(TENANT).run(plan).unwrap();
                    black_box(&results);
                    offset += 1;
                });
                engine.close().unwrap();
            },
        );
    }

    group.finish();
}

// ================================================================================================
// Close (shutdown) benchmark
// ================================================================================================

/// Benchmark group for graceful shutdown (`close`) latency.
///
/// ## `empty` and `with_data/{1000,5000}`
///
/// **Scenario:** Opens an engine, optionally writes N keys (some may still be in frozen
/// memtables awaiting flush), then measures `close()` latency in isolation.
///
/// **What it measures:** Shutdown cost — flushing remaining frozen memtables and
/// checkpointing the catalog journal.
fn bench_close(c: &mut Criterion) {
    let mut group = c.benchmark_group("close");
    group.sample_size(10);

    group.bench_function("empty", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_memtable_only(dir.path());
                (dir, engine)
            },
            |(_dir, engine)| {
                engine.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    for &count in &[1_000u64, 5_000] {
        group.bench_function(BenchmarkId::new("with_data", count), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let config = EngineConfig { memtable_max_bytes: 64 * 1024 * 1024, ..EngineConfig::default() };
                    let engine = Engine::open(dir.path(), config).unwrap();
                    register_schema(&engine);
                    for i in 0..count {
                        engine.ingestion().put(TENANT, make_key(i), row(VALUE_128B.as_slice())).unwrap();
                    }
                    (dir, engine)
                },
                |(_dir, engine)| {
                    engine.close().unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Key-size scaling benchmarks
// ================================================================================================

/// Benchmark group for key-size scaling analysis.
///
/// ## `put/{16B,64B,256B,512B}`
///
/// **Scenario:** Writes a single entry with a key of the specified size and a fixed 128 B
/// value into a memtable-only engine.
///
/// ## `get/{16B,64B,256B,512B}`
///
/// **Scenario:** Prepopulates 5,000 keys of the specified size into column files and
/// measures random point-read latency.
fn bench_key_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_size");

    let sizes: &[(&str, usize)] = &[("16B", 16), ("64B", 64), ("256B", 256), ("512B", 512)];

    let make_sized_key = |size: usize, i: u64| -> Vec<u8> {
        let suffix = format!("{i:012}");
        let mut key = vec![b'K'; size];
        let sb = suffix.as_bytes();
        let start = size.saturating_sub(sb.len());
        let copy_len = key.len() - start;
        key[start..].copy_from_slice(&sb[..copy_len]);
        key
    };

    for &(label, size) in sizes {
        group.bench_function(BenchmarkId::new("put", label), |b| {
            let dir = TempDir::new().unwrap();
            let engine = open_memtable_only(dir.path());
            let mut seq = 0u64;
            b.iter(|| {
                let key = make_sized_key(size, seq);
                engine.ingestion().put(TENANT, black_box(key), row(VALUE_128B.as_slice())).unwrap();
                seq += 1;
            });
            engine.close().unwrap();
        });
    }

    for &(label, size) in sizes {
        group.bench_function(BenchmarkId::new("get", label), |b| {
            let dir = TempDir::new().unwrap();
            let n = 5_000u64;
            {
                let engine = open_small_buffer(dir.path());
                for i in 0..n {
                    engine.ingestion().put(TENANT, make_sized_key(size, i), row(VALUE_128B.as_slice())).unwrap();
                }
                engine.close().unwrap();
            }
            let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                let key = make_sized_key(size, i % n);
                let _ = black_box(engine.query(TENANT).get(black_box(&key), None).unwrap());
                i += 1;
            });
            engine.close().unwrap();
        });
    }

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_delete,
    bench_scan,
    bench_compaction,
    bench_recovery,
    bench_value_sizes,
    bench_concurrent,
    bench_overwrite,
    bench_dataset_scaling,
    bench_tombstone_scan,
    bench_close,
    bench_key_sizes,
);

criterion_main!(benches);
