use super::helpers::{open_store, row};
use crate::block_store::BlockStore;
use crate::column_file::builder::ColumnFileWriter;
use crate::column_file::{ColumnFile, ColumnFileError};
use crate::engine::PointEntry;

#[test]
fn open_rejects_bad_magic() {
    let (_dir, store) = open_store();
    store.put("cf-bad-magic", &[0u8; 64]).unwrap();
    let err = ColumnFile::open(&*store, "cf-bad-magic").unwrap_err();
    assert!(matches!(
        err,
        ColumnFileError::Internal(_) | ColumnFileError::Encoding(_) | ColumnFileError::ChecksumMismatch
    ));
}

#[test]
fn open_rejects_flipped_data_block_checksum() {
    let (_dir, store) = open_store();
    ColumnFileWriter::new(&*store, "cf-flip")
        .build(vec![PointEntry::new(b"a".to_vec(), row("v"), 1, 1, 1)].into_iter(), 1, std::iter::empty(), 0, None)
        .unwrap();

    let mut bytes = store.get("cf-flip").unwrap();
    // flip a byte inside the first data block's payload, just past the header.
    let flip_at = 20;
    bytes[flip_at] ^= 0xFF;
    store.put("cf-flip", &bytes).unwrap();

    let file = ColumnFile::open(&*store, "cf-flip").unwrap();
    let err = file.get(b"a").unwrap_err();
    assert!(matches!(err, ColumnFileError::ChecksumMismatch | ColumnFileError::Encoding(_)));
}

#[test]
fn build_rejects_empty_input() {
    let (_dir, store) = open_store();
    let err = ColumnFileWriter::new(&*store, "cf-empty")
        .build(std::iter::empty(), 0, std::iter::empty(), 0, None)
        .unwrap_err();
    assert!(matches!(err, ColumnFileError::Internal(_)));
}
