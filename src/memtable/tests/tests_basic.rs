use super::helpers::open_memtable;
use crate::memtable::MemtableGetResult;

#[test]
fn put_then_get_returns_row_and_version() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"k1".to_vec(), b"row-bytes".to_vec(), 3).unwrap();
    assert_eq!(mt.get(b"k1").unwrap(), MemtableGetResult::Put(b"row-bytes".to_vec(), 3));
}

#[test]
fn delete_shadows_prior_put() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"k1".to_vec(), b"row-bytes".to_vec(), 1).unwrap();
    mt.delete(b"k1".to_vec()).unwrap();
    assert_eq!(mt.get(b"k1").unwrap(), MemtableGetResult::Delete);
}

#[test]
fn missing_key_is_not_found() {
    let (_dir, mt) = open_memtable(1 << 20);
    assert_eq!(mt.get(b"missing").unwrap(), MemtableGetResult::NotFound);
}

#[test]
fn range_delete_shadows_covered_puts() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"b".to_vec(), b"row".to_vec(), 1).unwrap();
    mt.delete_range(b"a".to_vec(), b"c".to_vec()).unwrap();
    assert_eq!(mt.get(b"b").unwrap(), MemtableGetResult::RangeDelete);
}

#[test]
fn put_after_range_delete_is_visible_again() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.delete_range(b"a".to_vec(), b"c".to_vec()).unwrap();
    mt.put(b"b".to_vec(), b"row".to_vec(), 1).unwrap();
    assert_eq!(mt.get(b"b").unwrap(), MemtableGetResult::Put(b"row".to_vec(), 1));
}

#[test]
fn sequence_numbers_increase_monotonically() {
    let (_dir, mt) = open_memtable(1 << 20);
    let s1 = mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
    let s2 = mt.put(b"b".to_vec(), b"2".to_vec(), 1).unwrap();
    assert!(s2 > s1);
    assert_eq!(mt.max_seq(), s2);
}

#[test]
fn flush_required_once_buffer_exhausted() {
    let (_dir, mt) = open_memtable(16);
    let err = mt.put(vec![0u8; 32], vec![1u8; 32], 1).unwrap_err();
    assert!(matches!(err, crate::memtable::MemtableError::FlushRequired));
}
