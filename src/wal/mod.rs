//! Write-Ahead Logging (WAL) Module
//!
//! This module implements a **durable**, **append-only**, and **generic** Write-Ahead Log (WAL)
//! suitable for a multi-tenant columnar storage engine.
//! It provides **type-safe**, **CRC-protected**, and **thread-safe** persistence of arbitrary records
//! that implement the [`WalData`] trait.
//!
//! ## Design Overview
//!
//! The WAL ensures crash recovery and corruption detection for any serializable record type
//! (memtable records, catalog journal events). It uses [`crate::encoding`] for compact
//! serialization and [`crc32fast`] for data integrity. Bytes are never touched directly through
//! `std::fs`; every segment is opened through a [`crate::block_store::BlockStore`].
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — a [`WalHeader`] structure followed by a 4-byte CRC32 checksum. Carries the
//!   segment's magic, format version, sequence-number range, and creation time.
//! - **Record** — consists of:
//!   - 4-byte little-endian length prefix
//!   - serialized record bytes (custom encoding format)
//!   - 4-byte CRC32 checksum computed over `len || record_bytes`
//!
//! # Concurrency model
//!
//! - WAL access is **synchronized** via `Arc<Mutex<File>>`, ensuring consistent reads and writes.
//! - [`WalIter`] tracks its own logical offset, seeking before each read to avoid race conditions
//!   with concurrent appenders.
//! - [`FsyncPolicy::GroupCommit`] batches concurrent appends arriving within a short window into
//!   one `fsync` call, acknowledging all of them together once that sync completes.
//!
//! # Guarantees
//!
//! - **Durability:** every `append()` either syncs immediately ([`FsyncPolicy::PerWrite`]) or is
//!   covered by the next scheduled group sync before returning.
//! - **Integrity:** both header and record checksums are verified during replay.
//! - **Corruption detection:** replay stops at the first failed checksum or truncated write.
//! - **Safety:** thread-safe, generic over any [`crate::encoding`] `Encode`/`Decode` type.

#[cfg(test)]
mod tests;

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use crate::block_store::BlockStore;
use crate::encoding::{self, EncodingError};
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Block store error opening or syncing a segment.
    #[error("block store error: {0}")]
    BlockStore(#[from] crate::block_store::BlockStoreError),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Data integrity failure — checksum did not match.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unexpected end-of-file during read.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed integrity validation.
    #[error("Internal header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Durability granularity for [`Wal::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// `fsync` after every append. Highest durability, highest per-write latency.
    PerWrite,
    /// Batch appends arriving within `window` into a single `fsync`, acknowledging all of
    /// them together once that sync completes.
    GroupCommit { window: Duration },
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of a WAL segment.
#[derive(Debug)]
pub struct WalHeader {
    /// Magic constant to identify WAL files (`b"AWAL"`).
    magic: [u8; 4],
    /// WAL format version.
    version: u32,
    /// Maximum record size (in bytes).
    max_record_size: u32,
    /// Monotonically-increasing WAL segment id.
    wal_seq: u64,
    /// First sequence number expected to be appended to this segment.
    first_seq: u64,
    /// Last sequence number appended so far; updated on truncate/rotate.
    last_seq: u64,
    /// Wall-clock segment creation time (seconds since epoch, caller-supplied).
    creation_timestamp: u64,
}

impl WalHeader {
    pub const MAGIC: [u8; 4] = *b"AWAL";
    pub const VERSION: u32 = 2;
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

    pub fn new(max_record_size: u32, wal_seq: u64, first_seq: u64, creation_timestamp: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            wal_seq,
            first_seq,
            last_seq: first_seq,
            creation_timestamp,
        }
    }

    /// Layout: `magic(4) + version(4) + max_record_size(4) + wal_seq(8) + first_seq(8) +
    /// last_seq(8) + creation_timestamp(8)` = 44.
    pub const ENCODED_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 8 + 8;
    pub const HEADER_DISK_SIZE: usize = Self::ENCODED_SIZE + U32_SIZE;

    pub fn wal_seq(&self) -> u64 {
        self.wal_seq
    }

    pub fn first_seq(&self) -> u64 {
        self.first_seq
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn max_record_size(&self) -> u32 {
        self.max_record_size
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl encoding::Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.max_record_size.encode_to(buf)?;
        self.wal_seq.encode_to(buf)?;
        self.first_seq.encode_to(buf)?;
        self.last_seq.encode_to(buf)?;
        self.creation_timestamp.encode_to(buf)
    }
}

impl encoding::Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (max_record_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (wal_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (first_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (creation_timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
                wal_seq,
                first_seq,
                last_seq,
                creation_timestamp,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Trait for data types that can be written to and read from the WAL.
///
/// `sequence_number` lets the WAL recover the highest assigned sequence number on restart
/// without the caller maintaining a side index.
pub trait WalData: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {
    fn sequence_number(&self) -> u64;
}

// ------------------------------------------------------------------------------------------------
// Group commit coordination
// ------------------------------------------------------------------------------------------------

struct GroupCommitState {
    /// Highest write id that has been durably synced.
    synced_through: u64,
    /// Highest write id handed out so far.
    next_write_id: u64,
    /// True while some thread is actively performing the sync.
    syncing: bool,
}

struct GroupCommit {
    state: Mutex<GroupCommitState>,
    cv: Condvar,
    window: Duration,
}

impl GroupCommit {
    fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(GroupCommitState {
                synced_through: 0,
                next_write_id: 0,
                syncing: false,
            }),
            cv: Condvar::new(),
            window,
        }
    }

    /// Reserves the next write id for a just-appended, not-yet-synced record.
    fn reserve(&self) -> u64 {
        let mut guard = self.state.lock().unwrap();
        guard.next_write_id += 1;
        guard.next_write_id
    }

    /// Blocks until `write_id` has been durably synced, performing the sync itself if it is
    /// the first thread to observe the pending batch.
    fn wait_for_sync(&self, write_id: u64, file: &Mutex<File>) -> Result<(), WalError> {
        let mut guard = self.state.lock().unwrap();
        if guard.synced_through >= write_id {
            return Ok(());
        }
        if guard.syncing {
            while guard.synced_through < write_id {
                let (g, timed_out) = self
                    .cv
                    .wait_timeout(guard, self.window)
                    .map_err(|_| WalError::Internal("group commit condvar poisoned".into()))?;
                guard = g;
                if timed_out.timed_out() && guard.synced_through < write_id && !guard.syncing {
                    break;
                }
            }
            if guard.synced_through >= write_id {
                return Ok(());
            }
        }
        guard.syncing = true;
        drop(guard);

        std::thread::sleep(self.window);
        let sync_result = file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
            .and_then(|f| f.sync_all().map_err(WalError::from));

        let mut guard = self.state.lock().unwrap();
        guard.syncing = false;
        if sync_result.is_ok() {
            guard.synced_through = guard.next_write_id;
        }
        self.cv.notify_all();
        sync_result
    }
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A generic, thread-safe Write-Ahead Log for durable record storage.
///
/// See the [module-level documentation](self) for more details on format,
/// concurrency, and guarantees.
pub struct Wal<T: WalData> {
    store: Arc<dyn BlockStore>,
    name: String,
    inner_file: Arc<Mutex<File>>,
    path: PathBuf,
    header: Mutex<WalHeader>,
    fsync_policy: FsyncPolicy,
    group_commit: Option<GroupCommit>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> std::fmt::Debug for Wal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T: WalData> Wal<T> {
    /// Opens or creates a WAL segment named `name` within `store`.
    ///
    /// `name` must match `wal-<seq>.log` so the segment's sequence id can be recovered from
    /// its own name, independent of header contents.
    pub fn open(
        store: Arc<dyn BlockStore>,
        name: &str,
        max_record_size: Option<u32>,
        fsync_policy: FsyncPolicy,
        now: u64,
    ) -> Result<Self, WalError> {
        let mut file = store.open_append(name)?;
        let path = store.resolve(name);

        let wal_seq = Self::parse_seq_from_name(name)
            .ok_or_else(|| WalError::Internal("WAL name incorrect".into()))?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                wal_seq,
                wal_seq,
                now,
            );
            write_header(&mut file, &header)?;
            file.sync_all()?;
            info!(path = %path.display(), seq = wal_seq, "WAL created with new header");
            header
        } else {
            file.seek(SeekFrom::Start(0))?;
            let header = read_and_validate_header(&mut file)?;
            if header.wal_seq != wal_seq {
                return Err(WalError::InvalidHeader("sequence number mismatch".into()));
            }
            debug!(
                path = %path.display(),
                max_record_size = header.max_record_size,
                seq = header.wal_seq,
                "WAL header validated"
            );
            header
        };

        info!(path = %path.display(), seq = header.wal_seq, "WAL opened");

        let group_commit = match fsync_policy {
            FsyncPolicy::PerWrite => None,
            FsyncPolicy::GroupCommit { window } => Some(GroupCommit::new(window)),
        };

        Ok(Self {
            store,
            name: name.to_string(),
            inner_file: Arc::new(Mutex::new(file)),
            path,
            header: Mutex::new(header),
            fsync_policy,
            group_commit,
            _phantom: std::marker::PhantomData,
        })
    }

    fn parse_seq_from_name(name: &str) -> Option<u64> {
        let file_name = Path::new(name).file_name()?.to_str()?;
        let seq_str = file_name.strip_prefix("wal-")?.strip_suffix(".log")?;
        seq_str.parse::<u64>().ok()
    }

    /// Appends a single record to the WAL.
    ///
    /// The record is serialized using [`crate::encoding`] and written as:
    /// `[u32 len LE][record_bytes][u32 crc32 LE]`, with the CRC computed over
    /// `len || record_bytes`. Durability is governed by the configured [`FsyncPolicy`].
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let record_bytes = encoding::encode_to_vec(record)?;
        let record_len = u32::try_from(record_bytes.len())
            .map_err(|_| WalError::RecordTooLarge(record_bytes.len()))?;

        {
            let header = self.header.lock().map_err(|_| WalError::Internal("header mutex poisoned".into()))?;
            if record_len > header.max_record_size {
                return Err(WalError::RecordTooLarge(record_len as usize));
            }
        }

        let len_bytes = record_len.to_le_bytes();
        let checksum = compute_crc(&[&len_bytes, &record_bytes]);

        {
            let mut guard = self
                .inner_file
                .lock()
                .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
            guard.write_all(&len_bytes)?;
            guard.write_all(&record_bytes)?;
            guard.write_all(&checksum.to_le_bytes())?;
        }

        match &self.group_commit {
            None => {
                self.inner_file
                    .lock()
                    .map_err(|_| WalError::Internal("Mutex poisoned".into()))?
                    .sync_all()?;
            }
            Some(gc) => {
                let write_id = gc.reserve();
                gc.wait_for_sync(write_id, &self.inner_file)?;
            }
        }

        if let Ok(mut header) = self.header.lock() {
            header.last_seq = header.last_seq.max(record.sequence_number());
        }

        trace!(
            len = record_len,
            crc = format_args!("{checksum:08x}"),
            seq = record.sequence_number(),
            "WAL record appended"
        );
        Ok(())
    }

    /// Returns an iterator that replays all valid records from the WAL.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");
        let max_record_size = self
            .header
            .lock()
            .map_err(|_| WalError::Internal("header mutex poisoned".into()))?
            .max_record_size as usize;

        Ok(WalIter {
            file: Arc::clone(&self.inner_file),
            offset: WalHeader::HEADER_DISK_SIZE as u64,
            max_record_size,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Scans the segment and returns the highest `sequence_number()` observed, used during
    /// startup recovery to resume sequence-number assignment without regressing.
    pub fn recover_max_sequence(&self) -> Result<Option<u64>, WalError> {
        let mut max_seq = None;
        for record in self.replay_iter()? {
            let record = record?;
            let seq = record.sequence_number();
            max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));
        }
        Ok(max_seq)
    }

    /// Truncates the segment to just its header, used when recovery determines a segment's
    /// tail is fully superseded.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        let header = self.header.lock().map_err(|_| WalError::Internal("header mutex poisoned".into()))?;
        write_header(&mut *guard, &header)?;
        guard.sync_all()?;
        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Rotates to a new WAL segment with the next sequence number, syncing the current one
    /// first. Returns the new segment's sequence id.
    pub fn rotate_next(&mut self, now: u64) -> Result<u64, WalError> {
        {
            let guard = self
                .inner_file
                .lock()
                .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
            guard.sync_all()?;
        }

        let (wal_seq, max_record_size) = {
            let header = self.header.lock().map_err(|_| WalError::Internal("header mutex poisoned".into()))?;
            (header.wal_seq, header.max_record_size)
        };
        let next_seq = wal_seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("WAL sequence number overflow".into()))?;

        let dir = Path::new(&self.name).parent().unwrap_or_else(|| Path::new(""));
        let next_name = dir.join(format!("wal-{next_seq:06}.log"));
        let next_name = next_name.to_string_lossy().into_owned();

        let new_wal = Wal::<T>::open(
            Arc::clone(&self.store),
            &next_name,
            Some(max_record_size),
            self.fsync_policy,
            now,
        )?;
        *self = new_wal;
        Ok(next_seq)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wal_seq(&self) -> u64 {
        self.header.lock().map(|h| h.wal_seq).unwrap_or(0)
    }

    pub fn max_record_size(&self) -> u32 {
        self.header.lock().map(|h| h.max_record_size).unwrap_or(0)
    }

    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        Ok(guard.metadata()?.len())
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                } else {
                    warn!(path = %self.path.display(), "WAL recovered and synced after poisoned lock");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming WAL replay iterator.
///
/// Holds an `Arc` reference to the underlying file handle, so it may outlive the [`Wal`] that
/// created it.
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> std::fmt::Debug for WalIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalIter")
            .field("offset", &self.offset)
            .field("max_record_size", &self.max_record_size)
            .finish_non_exhaustive()
    }
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("Mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(offset = self.offset, "WAL replay reached end of file");
                return None;
            }
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        trace!(offset = self.offset, len = record_len, "WAL reading record");

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(offset = self.offset, len = record_len, "WAL truncated record (partial payload)");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; U32_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(offset = self.offset, len = record_len, "WAL truncated record (partial checksum)");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        if let Err(e) = verify_crc(&[&len_bytes, &record_bytes], stored_checksum) {
            warn!(offset = self.offset, len = record_len, "WAL record checksum mismatch");
            return Some(Err(e));
        }

        match encoding::decode_from_slice::<T>(&record_bytes) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Header I/O helpers
// ------------------------------------------------------------------------------------------------

fn write_header<W: Write>(writer: &mut W, header: &WalHeader) -> Result<(), WalError> {
    let header_bytes = encoding::encode_to_vec(header)?;
    let checksum = compute_crc(&[&header_bytes]);
    writer.write_all(&header_bytes)?;
    writer.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

fn read_and_validate_header<R: Read>(reader: &mut R) -> Result<WalHeader, WalError> {
    let mut header_bytes = vec![0u8; WalHeader::ENCODED_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let mut checksum_bytes = [0u8; U32_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    verify_crc(&[&header_bytes], stored_checksum)
        .map_err(|_| WalError::InvalidHeader("header checksum mismatch".into()))?;

    let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;

    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!("unsupported version {}", header.version)));
    }

    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// CRC helpers
// ------------------------------------------------------------------------------------------------

fn compute_crc(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn verify_crc(parts: &[&[u8]], expected: u32) -> Result<(), WalError> {
    let computed = compute_crc(parts);
    if computed != expected {
        return Err(WalError::ChecksumMismatch);
    }
    Ok(())
}
