//! Named-document storage capability.
//!
//! The profile store and lock controller never touch the filesystem directly;
//! they are handed a [`DocumentStore`] at construction.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::fs;

use tagblock_utils::{WriteOptions, atomic_write, recover_bak_file};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read {key}: {source}")]
    Read { key: String, source: io::Error },
    #[error("failed to write {key}: {source}")]
    Write { key: String, source: io::Error },
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("{key} has unsupported version {found} (expected {expected})")]
    UnsupportedVersion { key: String, found: u32, expected: u32 },
}

impl PersistenceError {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Read { key, .. }
            | Self::Write { key, .. }
            | Self::Encode { key, .. }
            | Self::Decode { key, .. }
            | Self::UnsupportedVersion { key, .. } => key,
        }
    }
}

pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document has never been written.
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError>;
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    dir: PathBuf,
    options: WriteOptions,
}

impl FileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            options: WriteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DocumentStore for FileDocumentStore {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        recover_bak_file(&path);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Read {
                key: key.to_owned(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError> {
        let wrap = |source| PersistenceError::Write {
            key: key.to_owned(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(wrap)?;
        atomic_write(self.path_for(key), contents.as_bytes(), self.options).map_err(wrap)?;
        tracing::debug!(key, dir = %self.dir.display(), "Document written");
        Ok(())
    }
}

/// In-memory store with switchable failure injection.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    unreadable_keys: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, contents: impl Into<String>) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), contents.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail reads of `key` only; other documents stay readable.
    pub fn fail_reads_for(&self, key: &str) {
        self.unreadable_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned());
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let unreadable = self
            .unreadable_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if unreadable || self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read {
                key: key.to_owned(),
                source: io::Error::other("injected read failure"),
            });
        }
        Ok(self.get(key))
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write {
                key: key.to_owned(),
                source: io::Error::other("injected write failure"),
            });
        }
        self.insert(key, contents);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
