use super::helpers::{open_store, rec};
use crate::wal::{FsyncPolicy, Wal};

#[test]
fn rotate_next_opens_fresh_segment_with_incremented_seq() {
    let (_dir, store) = open_store();
    let mut wal = Wal::open(store.clone(), "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    wal.append(&rec(1, "a", Some("1"))).unwrap();

    let next_seq = wal.rotate_next(2_000).unwrap();
    assert_eq!(next_seq, 2);
    assert_eq!(wal.wal_seq(), 2);
    assert!(wal.replay_iter().unwrap().next().is_none());

    let names = store.list("").unwrap();
    assert!(names.iter().any(|n| n.contains("wal-000001.log")));
    assert!(names.iter().any(|n| n.contains("wal-000002.log")));
}

#[test]
fn truncate_clears_records_but_keeps_header() {
    let (_dir, store) = open_store();
    let mut wal = Wal::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    wal.append(&rec(1, "a", Some("1"))).unwrap();
    wal.truncate().unwrap();
    assert!(wal.replay_iter().unwrap().next().is_none());
    wal.append(&rec(2, "b", Some("2"))).unwrap();
    let replayed: Vec<_> = wal.replay_iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(replayed, vec![rec(2, "b", Some("2"))]);
}
