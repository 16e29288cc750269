use super::helpers::open_memtable;
use crate::memtable::MemtableRecord;

#[test]
fn iter_for_flush_emits_latest_version_per_key_and_all_tombstones() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
    mt.put(b"a".to_vec(), b"1-updated".to_vec(), 1).unwrap();
    mt.delete(b"b".to_vec()).unwrap();
    mt.delete_range(b"c".to_vec(), b"d".to_vec()).unwrap();

    let records: Vec<_> = mt.iter_for_flush().unwrap().collect();
    assert_eq!(records.len(), 3);

    let put = records
        .iter()
        .find(|r| matches!(r, MemtableRecord::Put { key, .. } if key == b"a"))
        .unwrap();
    match put {
        MemtableRecord::Put { row, .. } => assert_eq!(row, b"1-updated"),
        _ => unreachable!(),
    }
    assert!(records.iter().any(|r| matches!(r, MemtableRecord::Delete { key, .. } if key == b"b")));
    assert!(records.iter().any(|r| matches!(r, MemtableRecord::RangeDelete { start, .. } if start == b"c")));
}

#[test]
fn flush_snapshot_does_not_mutate_state() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
    let _ = mt.iter_for_flush().unwrap().count();
    assert!(mt.get(b"a").is_ok());
    assert_eq!(mt.iter_for_flush().unwrap().count(), 1);
}

#[test]
fn frozen_memtable_exposes_read_only_view() {
    let (_dir, mt) = open_memtable(1 << 20);
    mt.put(b"a".to_vec(), b"1".to_vec(), 2).unwrap();
    let frozen = mt.frozen().unwrap();
    assert_eq!(frozen.tenant_id(), "tenant-a");
    assert_eq!(frozen.iter_for_flush().unwrap().count(), 1);
}
