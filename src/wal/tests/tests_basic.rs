use super::helpers::{open_store, rec};
use crate::wal::{FsyncPolicy, Wal};

#[test]
fn append_then_replay_round_trips_in_order() {
    let (_dir, store) = open_store();
    let wal = Wal::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();

    wal.append(&rec(1, "a", Some("1"))).unwrap();
    wal.append(&rec(2, "b", Some("2"))).unwrap();
    wal.append(&rec(3, "a", None)).unwrap();

    let replayed: Vec<_> = wal.replay_iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(replayed, vec![rec(1, "a", Some("1")), rec(2, "b", Some("2")), rec(3, "a", None)]);
}

#[test]
fn recover_max_sequence_tracks_highest_seen() {
    let (_dir, store) = open_store();
    let wal = Wal::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    wal.append(&rec(5, "a", Some("x"))).unwrap();
    wal.append(&rec(9, "b", Some("y"))).unwrap();
    wal.append(&rec(7, "c", Some("z"))).unwrap();

    assert_eq!(wal.recover_max_sequence().unwrap(), Some(9));
}

#[test]
fn empty_segment_replay_yields_nothing() {
    let (_dir, store) = open_store();
    let wal = Wal::<super::helpers::TestRecord>::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    assert_eq!(wal.recover_max_sequence().unwrap(), None);
    assert!(wal.replay_iter().unwrap().next().is_none());
}

#[test]
fn reopening_existing_segment_preserves_records() {
    let (_dir, store) = open_store();
    {
        let wal = Wal::open(store.clone(), "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
        wal.append(&rec(1, "a", Some("1"))).unwrap();
    }
    let wal = Wal::<super::helpers::TestRecord>::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    let replayed: Vec<_> = wal.replay_iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(replayed, vec![rec(1, "a", Some("1"))]);
}

#[test]
fn record_above_max_size_is_rejected() {
    let (_dir, store) = open_store();
    let wal = Wal::open(store, "wal-000001.log", Some(8), FsyncPolicy::PerWrite, 1_000).unwrap();
    let big = super::helpers::rec(1, "a", Some("way too large for an 8 byte cap"));
    assert!(wal.append(&big).is_err());
}
