//! Crash-recovery and durability hardening tests.
//!
//! These simulate a crash by dropping an `Engine` without calling
//! `close()` (no flush, no catalog checkpoint) and verifying that a fresh
//! `Engine::open` over the same directory still recovers every
//! WAL-durable write via journal/WAL replay.

use colstrata::block_store::LocalBlockStore;
use colstrata::engine::query::QueryPlan;
use colstrata::engine::utils::Value;
use colstrata::engine::{Engine, EngineConfig};
use colstrata::schema::{Column, ColumnType, Schema};
use std::sync::Arc;
use tempfile::TempDir;

fn register(engine: &Engine, tenant_id: &str) {
    let schema = Schema::new(tenant_id, 1, vec![Column::new("v", ColumnType::I32, true)]);
    engine.catalog().put_schema(schema).unwrap();
}

#[test]
fn writes_survive_an_unflushed_drop() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        register(&engine, "acme");
        for i in 0..20 {
            engine.ingestion().put("acme", format!("k{i:03}").into_bytes(), vec![Value::I32(i)]).unwrap();
        }
        // No close() — simulates a crash before checkpoint/flush.
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    for i in 0..20 {
        let row = engine.query("acme").get(format!("k{i:03}").as_bytes(), None).unwrap();
        assert_eq!(row.unwrap().columns, vec![Value::I32(i)]);
    }
}

#[test]
fn deletes_survive_an_unflushed_drop() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        register(&engine, "acme");
        engine.ingestion().put("acme", b"k".to_vec(), vec![Value::I32(1)]).unwrap();
        engine.ingestion().delete("acme", b"k".to_vec()).unwrap();
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    assert!(engine.query("acme").get(b"k", None).unwrap().is_none());
}

#[test]
fn flushed_column_files_survive_recovery_alongside_replayed_wal() {
    let dir = TempDir::new().unwrap();
    {
        let mut config = EngineConfig::default();
        config.memtable_max_bytes = 64;
        let engine = Engine::open(dir.path(), config).unwrap();
        register(&engine, "acme");

        // First batch gets frozen and flushed to a column file...
        for i in 0..10 {
            engine.ingestion().put("acme", format!("a{i:03}").into_bytes(), vec![Value::I32(i)]).unwrap();
        }
        engine.flush_all().unwrap();

        // ...second batch stays in the WAL only, unflushed at "crash" time.
        for i in 0..10 {
            engine.ingestion().put("acme", format!("b{i:03}").into_bytes(), vec![Value::I32(i)]).unwrap();
        }
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    for i in 0..10 {
        assert_eq!(engine.query("acme").get(format!("a{i:03}").as_bytes(), None).unwrap().unwrap().columns, vec![Value::I32(i)]);
        assert_eq!(engine.query("acme").get(format!("b{i:03}").as_bytes(), None).unwrap().unwrap().columns, vec![Value::I32(i)]);
    }
}

#[test]
fn catalog_checkpoint_truncates_journal_without_losing_file_inventory() {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.memtable_max_bytes = 64;
    let engine = Engine::open(dir.path(), config).unwrap();
    register(&engine, "acme");

    for i in 0..10 {
        engine.ingestion().put("acme", format!("k{i:03}").into_bytes(), vec![Value::I32(i)]).unwrap();
    }
    engine.flush_all().unwrap();
    engine.close().unwrap();

    let files_before = Engine::open(dir.path(), EngineConfig::default()).unwrap().catalog().files_for_tenant("acme").unwrap();
    assert!(!files_before.is_empty());
}

#[test]
fn concurrent_tenants_recover_independently() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        register(&engine, "acme");
        register(&engine, "globex");
        engine.ingestion().put("acme", b"k".to_vec(), vec![Value::I32(1)]).unwrap();
        engine.ingestion().put("globex", b"k".to_vec(), vec![Value::I32(2)]).unwrap();
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    assert_eq!(engine.query("acme").get(b"k", None).unwrap().unwrap().columns, vec![Value::I32(1)]);
    assert_eq!(engine.query("globex").get(b"k", None).unwrap().unwrap().columns, vec![Value::I32(2)]);
}

#[test]
fn scan_after_recovery_merges_flushed_and_replayed_rows_in_order() {
    let dir = TempDir::new().unwrap();
    {
        let mut config = EngineConfig::default();
        config.memtable_max_bytes = 64;
        let engine = Engine::open(dir.path(), config).unwrap();
        register(&engine, "acme");
        for k in [b"a" as &[u8], b"c", b"e"] {
            engine.ingestion().put("acme", k.to_vec(), vec![Value::I32(0)]).unwrap();
        }
        engine.flush_all().unwrap();
        for k in [b"b" as &[u8], b"d"] {
            engine.ingestion().put("acme", k.to_vec(), vec![Value::I32(0)]).unwrap();
        }
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    let rows = engine.query("acme").run(QueryPlan::scan(b"a".to_vec(), b"f".to_vec())).unwrap();
    let keys: Vec<_> = rows.into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
}

#[test]
fn open_with_store_over_a_shared_block_store_is_equivalent_to_open() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn colstrata::block_store::BlockStore> = Arc::new(LocalBlockStore::open(dir.path()).unwrap());
    {
        let engine = Engine::open_with_store(Arc::clone(&store), EngineConfig::default()).unwrap();
        register(&engine, "acme");
        engine.ingestion().put("acme", b"k".to_vec(), vec![Value::I32(7)]).unwrap();
    }

    let engine = Engine::open_with_store(store, EngineConfig::default()).unwrap();
    assert_eq!(engine.query("acme").get(b"k", None).unwrap().unwrap().columns, vec![Value::I32(7)]);
}
