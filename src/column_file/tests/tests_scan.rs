use super::helpers::{build_file, open_store, row};
use crate::engine::utils::decode_row;
use crate::engine::{PointEntry, Record};

#[test]
fn scan_yields_points_in_key_order() {
    let (_dir, store) = open_store();
    let file = build_file(
        &*store,
        "cf-scan-0001",
        vec![
            PointEntry::new(b"a".to_vec(), row("1"), 1, 1, 1),
            PointEntry::new(b"b".to_vec(), row("2"), 1, 2, 2),
            PointEntry::new(b"c".to_vec(), row("3"), 1, 3, 3),
        ],
        vec![],
    );

    let keys: Vec<_> = file
        .scan(b"a", b"z")
        .unwrap()
        .filter_map(|r| match r {
            Record::Put { key, .. } => Some(key),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn scan_decodes_row_columns() {
    let (_dir, store) = open_store();
    let file = build_file(&*store, "cf-scan-0002", vec![PointEntry::new(b"a".to_vec(), row("hello"), 1, 1, 1)], vec![]);

    let record = file.scan(b"a", b"z").unwrap().next().unwrap();
    match record {
        Record::Put { columns, .. } => {
            assert_eq!(columns, decode_row(&row("hello")).unwrap());
        }
        other => panic!("expected Put, got {other:?}"),
    }
}

#[test]
fn scan_includes_range_tombstones() {
    let (_dir, store) = open_store();
    let file = build_file(
        &*store,
        "cf-scan-0003",
        vec![PointEntry::new(b"a".to_vec(), row("1"), 1, 1, 1)],
        vec![crate::engine::RangeTombstone::new(b"a".to_vec(), b"b".to_vec(), 5, 5)],
    );

    let has_range = file.scan(b"a", b"z").unwrap().any(|r| matches!(r, Record::RangeDelete { .. }));
    assert!(has_range);
}
