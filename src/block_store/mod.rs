//! Named byte-blob storage beneath the WAL, column files, and catalog.
//!
//! Every other component addresses persistent bytes exclusively through
//! the [`BlockStore`] trait, never through `std::fs` directly, so that a
//! remote or tiered implementation can later be substituted without
//! touching WAL, column-file, or catalog code. [`LocalBlockStore`] is the
//! only implementation shipped here; it maps blob names onto files under
//! a configured root directory.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

/// Errors returned by a [`BlockStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    #[error("I/O error on blob '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("blob '{0}' not found")]
    NotFound(String),
}

/// A random-access, memory-mapped handle onto a previously-written blob.
#[derive(Debug)]
pub struct BlockReader {
    mmap: Mmap,
}

impl BlockReader {
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Named byte-blob storage with read/write/delete/list operations.
pub trait BlockStore: Send + Sync {
    /// Writes `bytes` under `name`, replacing any prior content, durable
    /// on return.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), BlockStoreError>;

    /// Reads the full contents of the blob named `name`.
    fn get(&self, name: &str) -> Result<Vec<u8>, BlockStoreError>;

    /// Opens a random-access, mmap-backed reader over `name`.
    fn open_reader(&self, name: &str) -> Result<BlockReader, BlockStoreError>;

    /// Deletes the blob named `name`. Idempotent.
    fn delete(&self, name: &str) -> Result<(), BlockStoreError>;

    /// Lists blob names under `prefix`, relative to the store root.
    fn list(&self, prefix: &str) -> Result<Vec<String>, BlockStoreError>;

    /// Opens a file for streaming append-writes (used by the WAL, which
    /// needs incremental `write_all` + `sync_all` rather than one-shot
    /// `put`). Creates the file and any parent directories if absent.
    fn open_append(&self, name: &str) -> Result<File, BlockStoreError>;

    /// Returns the absolute filesystem path backing `name`, for
    /// components (like the column file reader) that need direct
    /// `mmap`/`File` access beyond this trait's surface.
    fn resolve(&self, name: &str) -> PathBuf;
}

/// A [`BlockStore`] backed by the local filesystem under `root`.
pub struct LocalBlockStore {
    root: PathBuf,
}

impl LocalBlockStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlockStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| BlockStoreError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn ensure_parent(&self, path: &Path) -> Result<(), BlockStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BlockStoreError::Io {
                name: parent.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl BlockStore for LocalBlockStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), BlockStoreError> {
        let path = self.path_for(name);
        self.ensure_parent(&path)?;
        let tmp_path = path.with_extension("tmp");
        let mut file = File::create(&tmp_path).map_err(|source| BlockStoreError::Io {
            name: name.to_string(),
            source,
        })?;
        file.write_all(bytes).map_err(|source| BlockStoreError::Io {
            name: name.to_string(),
            source,
        })?;
        file.sync_all().map_err(|source| BlockStoreError::Io {
            name: name.to_string(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| BlockStoreError::Io {
            name: name.to_string(),
            source,
        })?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, BlockStoreError> {
        let path = self.path_for(name);
        fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                BlockStoreError::NotFound(name.to_string())
            } else {
                BlockStoreError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }

    fn open_reader(&self, name: &str) -> Result<BlockReader, BlockStoreError> {
        let path = self.path_for(name);
        let file = File::open(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                BlockStoreError::NotFound(name.to_string())
            } else {
                BlockStoreError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })?;
        // SAFETY: the file is immutable column/catalog data owned by this
        // store; no other writer mutates it concurrently with this mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| BlockStoreError::Io {
            name: name.to_string(),
            source,
        })?;
        Ok(BlockReader { mmap })
    }

    fn delete(&self, name: &str) -> Result<(), BlockStoreError> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlockStoreError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BlockStoreError> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|source| BlockStoreError::Io {
            name: prefix.to_string(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| BlockStoreError::Io {
                name: prefix.to_string(),
                source,
            })?;
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                names.push(relative.to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_append(&self, name: &str) -> Result<File, BlockStoreError> {
        let path = self.path_for(name);
        self.ensure_parent(&path)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|source| BlockStoreError::Io {
                name: name.to_string(),
                source,
            })
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.path_for(name)
    }
}
