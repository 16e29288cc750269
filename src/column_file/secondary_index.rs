//! Persisted secondary index: `value -> row_keys`, built alongside a
//! ColumnFile for columns configured in [`SecondaryIndexConfig`] and
//! consulted by the query executor only when a column's footer-reported
//! selectivity clears `selectivity_threshold`. Stored as a separate blob
//! named `<file_id>.sidx.<column>`, checksummed the same way data blocks
//! are.

use std::collections::BTreeMap;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::block_store::BlockStore;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::engine::utils::{decode_row, PointEntry, Value};
use crate::schema::Schema;

/// Which columns get a secondary index and the selectivity gate that
/// decides when the query executor consults it instead of scanning.
#[derive(Debug, Clone)]
pub struct SecondaryIndexConfig {
    /// Column names to build a `value -> row_keys` index for.
    pub columns: Vec<String>,
    /// A column is consulted via its index only when
    /// `distinct_estimate / row_count` falls below this value — high
    /// cardinality means the index is unlikely to narrow the scan enough
    /// to be worth the extra I/O.
    pub selectivity_threshold: f64,
}

impl Default for SecondaryIndexConfig {
    fn default() -> Self {
        Self { columns: Vec::new(), selectivity_threshold: 0.1 }
    }
}

#[derive(Debug, Error)]
pub enum SecondaryIndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("internal error: {0}")]
    Internal(String),
}

struct SecondaryIndexEntry {
    encoded_value: Vec<u8>,
    value: Value,
    row_keys: Vec<Vec<u8>>,
}

impl Encode for SecondaryIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.encoded_value.encode_to(buf)?;
        self.value.encode_to(buf)?;
        encoding::encode_vec(&self.row_keys, buf)?;
        Ok(())
    }
}

impl Decode for SecondaryIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (encoded_value, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (value, n) = Value::decode_from(&buf[off..])?;
        off += n;
        let (row_keys, n) = encoding::decode_vec::<Vec<u8>>(&buf[off..])?;
        off += n;
        Ok((Self { encoded_value, value, row_keys }, off))
    }
}

/// Accumulates `value -> row_keys` observations while a ColumnFile is
/// being built, then serializes them sorted by encoded value.
pub struct SecondaryIndexBuilder {
    entries: BTreeMap<Vec<u8>, (Value, Vec<Vec<u8>>)>,
}

impl SecondaryIndexBuilder {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Records that `row_key`'s column holds `value`. `Null` values are
    /// never indexed — a predicate can't equal `Null` meaningfully here.
    pub fn observe(&mut self, value: &Value, row_key: &[u8]) {
        if matches!(value, Value::Null) {
            return;
        }
        let Ok(encoded) = encoding::encode_to_vec(value) else { return };
        self.entries.entry(encoded).or_insert_with(|| (value.clone(), Vec::new())).1.push(row_key.to_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the accumulated index and writes it to `name`.
    pub fn build(self, store: &dyn BlockStore, name: &str) -> Result<(), SecondaryIndexError> {
        let entries: Vec<SecondaryIndexEntry> = self
            .entries
            .into_iter()
            .map(|(encoded_value, (value, mut row_keys))| {
                row_keys.sort();
                SecondaryIndexEntry { encoded_value, value, row_keys }
            })
            .collect();

        let mut buf = Vec::new();
        encoding::encode_vec(&entries, &mut buf)?;

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        let checksum = hasher.finalize();
        buf.extend_from_slice(&checksum.to_le_bytes());

        store.put(name, &buf).map_err(|e| SecondaryIndexError::Internal(e.to_string()))?;
        Ok(())
    }
}

/// A loaded secondary index, ready for equality lookups.
pub struct SecondaryIndex {
    entries: Vec<SecondaryIndexEntry>,
}

impl SecondaryIndex {
    pub fn open(store: &dyn BlockStore, name: &str) -> Result<Self, SecondaryIndexError> {
        let reader = store.open_reader(name).map_err(|e| SecondaryIndexError::Internal(e.to_string()))?;
        let bytes = reader.as_slice();
        if bytes.len() < 4 {
            return Err(SecondaryIndexError::ChecksumMismatch);
        }
        let (content, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().expect("slice is exactly 4 bytes"));

        let mut hasher = Crc32::new();
        hasher.update(content);
        if hasher.finalize() != stored_checksum {
            return Err(SecondaryIndexError::ChecksumMismatch);
        }

        let (entries, _) = encoding::decode_vec::<SecondaryIndexEntry>(content)?;
        Ok(Self { entries })
    }

    /// Row keys whose indexed column equals `target`, sorted ascending.
    /// Returns `None` when `target` has no entry in the index.
    pub fn lookup_eq(&self, target: &Value) -> Option<&[Vec<u8>]> {
        let encoded = encoding::encode_to_vec(target).ok()?;
        let idx = self.entries.binary_search_by(|e| e.encoded_value.cmp(&encoded)).ok()?;
        Some(self.entries[idx].row_keys.as_slice())
    }
}

/// Builds and persists one secondary index per column named in `config`,
/// derived from the same point entries a [`super::builder::ColumnFileWriter`]
/// is about to flush. `name_for_column` maps a column name to its blob name
/// (callers mirror `file_blob_name()`'s naming scheme). Columns in `config`
/// that aren't present in `schema`, or for which `schema` is `None`, are
/// skipped rather than treated as an error — the config is shared across
/// tenants with different schemas.
pub fn build_secondary_indexes(
    store: &dyn BlockStore,
    points: &[PointEntry],
    schema: Option<&Schema>,
    config: &SecondaryIndexConfig,
    name_for_column: impl Fn(&str) -> String,
) -> Result<(), SecondaryIndexError> {
    if config.columns.is_empty() {
        return Ok(());
    }
    let Some(schema) = schema else { return Ok(()) };

    let mut builders: Vec<(usize, String, SecondaryIndexBuilder)> = Vec::new();
    for name in &config.columns {
        if let Some(pos) = schema.columns.iter().position(|c| &c.name == name) {
            builders.push((pos, name.clone(), SecondaryIndexBuilder::new()));
        }
    }
    if builders.is_empty() {
        return Ok(());
    }

    for point in points {
        let Some(bytes) = point.value.as_ref() else { continue };
        let columns = decode_row(bytes)?;
        for (pos, _, builder) in &mut builders {
            if let Some(value) = columns.get(*pos) {
                builder.observe(value, &point.key);
            }
        }
    }

    for (_, name, builder) in builders {
        if builder.is_empty() {
            continue;
        }
        builder.build(store, &name_for_column(&name))?;
    }
    Ok(())
}
