use super::*;

#[test]
fn put_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    store.put("blobs/a.dat", b"hello").unwrap();
    assert_eq!(store.get("blobs/a.dat").unwrap(), b"hello");
}

#[test]
fn get_missing_blob_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    let err = store.get("missing.dat").unwrap_err();
    assert!(matches!(err, BlockStoreError::NotFound(_)));
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    store.put("a.dat", b"x").unwrap();
    store.delete("a.dat").unwrap();
    store.delete("a.dat").unwrap();
    assert!(matches!(store.get("a.dat").unwrap_err(), BlockStoreError::NotFound(_)));
}

#[test]
fn list_returns_sorted_relative_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    store.put("segs/0002.seg", b"b").unwrap();
    store.put("segs/0001.seg", b"a").unwrap();
    let names = store.list("segs").unwrap();
    assert_eq!(names, vec!["segs/0001.seg", "segs/0002.seg"]);
}

#[test]
fn open_reader_maps_written_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    store.put("c.dat", b"mmap-me").unwrap();
    let reader = store.open_reader("c.dat").unwrap();
    assert_eq!(reader.as_slice(), b"mmap-me");
}

#[test]
fn open_append_creates_parents_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlockStore::open(dir.path()).unwrap();
    {
        let mut f = store.open_append("wal/seg-0001.log").unwrap();
        use std::io::Write;
        f.write_all(b"first").unwrap();
    }
    {
        let mut f = store.open_append("wal/seg-0001.log").unwrap();
        use std::io::Write;
        f.write_all(b"second").unwrap();
    }
    assert_eq!(store.get("wal/seg-0001.log").unwrap(), b"firstsecond");
}
