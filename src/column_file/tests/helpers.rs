use std::sync::Arc;

use tempfile::TempDir;

use crate::block_store::{BlockStore, LocalBlockStore};
use crate::engine::utils::{encode_row, Value};
use crate::engine::{PointEntry, RangeTombstone};

use super::super::builder::ColumnFileWriter;
use super::super::ColumnFile;

pub fn open_store() -> (TempDir, Arc<dyn BlockStore>) {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::open(dir.path()).unwrap());
    (dir, store)
}

pub fn row(s: &str) -> Vec<u8> {
    encode_row(&[Value::String(s.to_string())]).unwrap()
}

/// Builds a small column file named `name` with the given rows and range tombstones.
pub fn build_file(
    store: &dyn BlockStore,
    name: &str,
    points: Vec<PointEntry>,
    ranges: Vec<RangeTombstone>,
) -> ColumnFile {
    let count = points.len();
    let range_count = ranges.len();
    ColumnFileWriter::new(store, name)
        .build(points.into_iter(), count, ranges.into_iter(), range_count, None)
        .unwrap();
    ColumnFile::open(store, name).unwrap()
}
