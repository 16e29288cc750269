use std::sync::Arc;

use crate::block_store::{BlockStore, LocalBlockStore};
use crate::encoding::{self, EncodingError};
use crate::wal::WalData;

/// Minimal record used across WAL tests — a (sequence, key, value) tuple standing in for a
/// memtable entry.
#[derive(Debug, PartialEq, Clone)]
pub struct TestRecord {
    pub seq: u64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl encoding::Encode for TestRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.seq.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)
    }
}

impl encoding::Decode for TestRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (seq, mut off) = u64::decode_from(buf)?;
        let (key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (value, n) = <Option<Vec<u8>>>::decode_from(&buf[off..])?;
        off += n;
        Ok((TestRecord { seq, key, value }, off))
    }
}

impl WalData for TestRecord {
    fn sequence_number(&self) -> u64 {
        self.seq
    }
}

pub fn rec(seq: u64, key: &str, value: Option<&str>) -> TestRecord {
    TestRecord {
        seq,
        key: key.as_bytes().to_vec(),
        value: value.map(|v| v.as_bytes().to_vec()),
    }
}

pub fn open_store() -> (tempfile::TempDir, Arc<dyn BlockStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::open(dir.path()).unwrap());
    (dir, store)
}
