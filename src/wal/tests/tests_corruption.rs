use std::io::{Seek, SeekFrom, Write};

use super::helpers::{open_store, rec};
use crate::wal::{FsyncPolicy, Wal, WalError};

#[test]
fn truncated_tail_record_is_reported_as_eof() {
    let (_dir, store) = open_store();
    {
        let wal = Wal::open(store.clone(), "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
        wal.append(&rec(1, "a", Some("1"))).unwrap();
        wal.append(&rec(2, "b", Some("2"))).unwrap();
    }

    let path = store.resolve("wal-000001.log");
    let len = std::fs::metadata(&path).unwrap().len();
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 2).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    file.flush().unwrap();
    drop(file);

    let wal = Wal::<super::helpers::TestRecord>::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    let mut iter = wal.replay_iter().unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), rec(1, "a", Some("1")));
    assert!(matches!(iter.next(), Some(Err(WalError::UnexpectedEof)) | Some(Err(WalError::Io(_)))));
}

#[test]
fn flipped_checksum_byte_is_detected() {
    let (_dir, store) = open_store();
    {
        let wal = Wal::open(store.clone(), "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
        wal.append(&rec(1, "a", Some("1"))).unwrap();
    }

    let path = store.resolve("wal-000001.log");
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    let len = std::fs::metadata(&path).unwrap().len();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    let wal = Wal::<super::helpers::TestRecord>::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
    let mut iter = wal.replay_iter().unwrap();
    assert!(matches!(iter.next(), Some(Err(WalError::ChecksumMismatch))));
}

#[test]
fn bad_magic_is_rejected_on_open() {
    let (_dir, store) = open_store();
    {
        let wal = Wal::open(store.clone(), "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000).unwrap();
        wal.append(&rec(1, "a", Some("1"))).unwrap();
    }

    let path = store.resolve("wal-000001.log");
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(b"XXXX").unwrap();
    drop(file);

    let err = Wal::<super::helpers::TestRecord>::open(store, "wal-000001.log", None, FsyncPolicy::PerWrite, 1_000)
        .unwrap_err();
    assert!(matches!(err, WalError::InvalidHeader(_)));
}
