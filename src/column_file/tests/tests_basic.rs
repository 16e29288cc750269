use super::helpers::{build_file, open_store, row};
use crate::column_file::GetResult;
use crate::engine::PointEntry;

#[test]
fn get_returns_latest_put() {
    let (_dir, store) = open_store();
    let file = build_file(
        &*store,
        "cf-0001",
        vec![
            PointEntry::new(b"a".to_vec(), row("v1"), 1, 10, 100),
            PointEntry::new(b"a".to_vec(), row("v2"), 1, 20, 200),
        ],
        vec![],
    );

    match file.get(b"a").unwrap() {
        GetResult::Put { value, version, seq, .. } => {
            assert_eq!(value, row("v2"));
            assert_eq!(version, 1);
            assert_eq!(seq, 20);
        }
        other => panic!("expected Put, got {other:?}"),
    }
}

#[test]
fn get_missing_key_returns_not_found() {
    let (_dir, store) = open_store();
    let file = build_file(&*store, "cf-0002", vec![PointEntry::new(b"a".to_vec(), row("v1"), 1, 1, 1)], vec![]);
    assert_eq!(file.get(b"z").unwrap(), GetResult::NotFound);
}

#[test]
fn get_point_delete_is_visible() {
    let (_dir, store) = open_store();
    let file = build_file(
        &*store,
        "cf-0003",
        vec![crate::engine::PointEntry::new_delete(b"a".to_vec(), 5, 50)],
        vec![],
    );
    match file.get(b"a").unwrap() {
        GetResult::Delete { seq, .. } => assert_eq!(seq, 5),
        other => panic!("expected Delete, got {other:?}"),
    }
}

#[test]
fn bloom_excludes_absent_keys_most_of_the_time() {
    let (_dir, store) = open_store();
    let file = build_file(&*store, "cf-0004", vec![PointEntry::new(b"present".to_vec(), row("v"), 1, 1, 1)], vec![]);
    assert!(file.bloom_may_contain(b"present"));
}

#[test]
fn reopen_reads_back_properties() {
    let (_dir, store) = open_store();
    let file = build_file(
        &*store,
        "cf-0005",
        vec![
            PointEntry::new(b"a".to_vec(), row("v"), 1, 1, 1),
            PointEntry::new(b"b".to_vec(), row("v"), 1, 2, 2),
        ],
        vec![],
    );
    assert_eq!(file.properties.record_count, 2);
    assert_eq!(file.properties.min_key, b"a");
    assert_eq!(file.properties.max_key, b"b");

    let reopened = crate::column_file::ColumnFile::open(&*store, "cf-0005").unwrap();
    assert_eq!(reopened.properties.record_count, 2);
}
