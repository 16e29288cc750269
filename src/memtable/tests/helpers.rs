use std::sync::Arc;

use crate::block_store::{BlockStore, LocalBlockStore};
use crate::memtable::Memtable;
use crate::wal::FsyncPolicy;

pub fn open_memtable(write_buffer_size: usize) -> (tempfile::TempDir, Memtable) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::open(dir.path()).unwrap());
    let memtable = Memtable::new(
        "tenant-a",
        store,
        "wal-000001.log",
        None,
        write_buffer_size,
        FsyncPolicy::PerWrite,
    )
    .unwrap();
    (dir, memtable)
}
