//! Catalog lifecycle, persistence, and crash-recovery tests.

use std::sync::Arc;
use tempfile::TempDir;

use crate::block_store::{BlockStore, LocalBlockStore};
use crate::catalog::{Catalog, CatalogError, FileEntry, FileState};
use crate::schema::{Column, ColumnType, Schema};

fn open_store() -> (TempDir, Arc<dyn BlockStore>) {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::open(dir.path()).unwrap());
    (dir, store)
}

fn open_catalog(store: &Arc<dyn BlockStore>) -> Catalog {
    Catalog::open(Arc::clone(store)).expect("catalog open failed")
}

fn entry(file_id: u64, tenant: &str, level: u32, min_key: &[u8], max_key: &[u8], min_seq: u64, max_seq: u64) -> FileEntry {
    FileEntry {
        file_id,
        tenant_id: tenant.to_string(),
        level,
        min_key: min_key.to_vec(),
        max_key: max_key.to_vec(),
        min_seq,
        max_seq,
        row_count: 10,
        byte_size: 1024,
        schema_version: 1,
        stats_digest: 0,
        created_at: 0,
        state: FileState::Live,
    }
}

#[test]
fn opens_empty_without_error() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    assert!(catalog.files_for_tenant("t1").unwrap().is_empty());
    assert_eq!(catalog.next_snapshot().unwrap(), 0);
}

#[test]
fn register_and_list_files() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);

    catalog.register_file(entry(1, "t1", 0, b"a", b"m", 1, 10)).unwrap();
    catalog.register_file(entry(2, "t1", 0, b"n", b"z", 11, 20)).unwrap();
    catalog.register_file(entry(3, "t2", 0, b"a", b"z", 1, 5)).unwrap();

    let files = catalog.list_files("t1", b"a", b"z", 20).unwrap();
    assert_eq!(files.len(), 2);

    // key range restricted to the first file only
    let files = catalog.list_files("t1", b"a", b"c", 20).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_id, 1);

    // snapshot excludes the second file
    let files = catalog.list_files("t1", b"a", b"z", 10).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_id, 1);
}

#[test]
fn retiring_files_are_invisible_to_new_queries() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    catalog.register_file(entry(1, "t1", 0, b"a", b"z", 1, 10)).unwrap();

    catalog.retire_files(vec![1], 7).unwrap();

    assert!(catalog.list_files("t1", b"a", b"z", 10).unwrap().is_empty());
    let all = catalog.files_for_tenant("t1").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].state, FileState::RetiringAfter(7));
}

#[test]
fn commit_compaction_swaps_inputs_for_outputs_atomically() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    catalog.register_file(entry(1, "t1", 0, b"a", b"m", 1, 10)).unwrap();
    catalog.register_file(entry(2, "t1", 0, b"n", b"z", 11, 20)).unwrap();

    let job_id = catalog.allocate_job_id().unwrap();
    let merged = entry(3, "t1", 1, b"a", b"z", 1, 20);
    catalog.commit_compaction(job_id, vec![merged], vec![1, 2]).unwrap();

    let live = catalog.list_files("t1", b"a", b"z", 20).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].file_id, 3);

    let all = catalog.files_for_tenant("t1").unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().filter(|f| f.file_id != 3).all(|f| f.state == FileState::RetiringAfter(job_id)));
}

#[test]
fn delete_file_removes_from_inventory() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    catalog.register_file(entry(1, "t1", 0, b"a", b"z", 1, 10)).unwrap();
    catalog.retire_files(vec![1], 1).unwrap();
    catalog.delete_file(1).unwrap();
    assert!(catalog.files_for_tenant("t1").unwrap().is_empty());
}

#[test]
fn schema_registry_accepts_first_schema_and_evolution() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);

    let v1 = Schema::new("t1", 1, vec![Column::new("id", ColumnType::I64, false)]);
    catalog.put_schema(v1.clone()).unwrap();
    assert_eq!(catalog.get_schema("t1", 1).unwrap(), Some(v1));

    let v2 = Schema::new(
        "t1",
        2,
        vec![Column::new("id", ColumnType::I64, false), Column::new("note", ColumnType::String, true)],
    );
    catalog.put_schema(v2.clone()).unwrap();
    assert_eq!(catalog.latest_schema("t1").unwrap(), Some(v2));
}

#[test]
fn schema_registry_rejects_incompatible_evolution() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);

    let v1 = Schema::new("t1", 1, vec![Column::new("id", ColumnType::I64, false)]);
    catalog.put_schema(v1).unwrap();

    let bad = Schema::new("t1", 2, vec![]);
    let err = catalog.put_schema(bad).unwrap_err();
    assert!(matches!(err, CatalogError::SchemaRejected(_)));
}

#[test]
fn snapshot_guard_tracks_min_active_snapshot() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    catalog.observe_sequence(10).unwrap();

    let guard_a = catalog.acquire_snapshot(5).unwrap();
    let guard_b = catalog.acquire_snapshot(8).unwrap();
    assert_eq!(catalog.min_active_snapshot(), Some(5));

    drop(guard_a);
    assert_eq!(catalog.min_active_snapshot(), Some(8));

    drop(guard_b);
    assert_eq!(catalog.min_active_snapshot(), None);
}

#[test]
fn acquire_snapshot_rejects_future_sequence() {
    let (_dir, store) = open_store();
    let catalog = open_catalog(&store);
    catalog.observe_sequence(5).unwrap();
    assert!(catalog.acquire_snapshot(100).is_err());
}

#[test]
fn checkpoint_then_reopen_preserves_state() {
    let (_dir, store) = open_store();
    let mut catalog = open_catalog(&store);
    catalog.register_file(entry(1, "t1", 0, b"a", b"z", 1, 10)).unwrap();
    catalog.put_schema(Schema::new("t1", 1, vec![Column::new("id", ColumnType::I64, false)])).unwrap();

    catalog.checkpoint().unwrap();
    assert!(!catalog.is_dirty().unwrap());
    drop(catalog);

    let reopened = open_catalog(&store);
    assert_eq!(reopened.files_for_tenant("t1").unwrap().len(), 1);
    assert!(reopened.get_schema("t1", 1).unwrap().is_some());
}

#[test]
fn journal_replay_recovers_state_without_checkpoint() {
    let (_dir, store) = open_store();
    {
        let catalog = open_catalog(&store);
        catalog.register_file(entry(1, "t1", 0, b"a", b"m", 1, 10)).unwrap();
        catalog.register_file(entry(2, "t1", 0, b"n", b"z", 11, 20)).unwrap();
        catalog.retire_files(vec![1], 9).unwrap();
    }

    let reopened = open_catalog(&store);
    let files = reopened.files_for_tenant("t1").unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.file_id == 1 && f.state == FileState::RetiringAfter(9)));
    assert!(files.iter().any(|f| f.file_id == 2 && f.state == FileState::Live));
}
