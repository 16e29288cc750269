use std::time::Duration;

use super::helpers::{open_store, rec};
use crate::wal::{FsyncPolicy, Wal};

#[test]
fn group_commit_batches_concurrent_appends() {
    let (_dir, store) = open_store();
    let wal = std::sync::Arc::new(
        Wal::open(
            store,
            "wal-000001.log",
            None,
            FsyncPolicy::GroupCommit { window: Duration::from_millis(20) },
            1_000,
        )
        .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let wal = std::sync::Arc::clone(&wal);
        handles.push(std::thread::spawn(move || {
            wal.append(&rec(i, "k", Some("v"))).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let replayed: Vec<_> = wal.replay_iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(replayed.len(), 8);
    assert_eq!(wal.recover_max_sequence().unwrap(), Some(7));
}
