//! Filesystem primitives shared by the job store and the dispatch queue.
//!
//! Everything that needs crash safety goes through here:
//! - atomic replace of a file (same-directory temp file, fsync, rename)
//! - exclusive move of an entry between directories (rename)
//! - sorted scans that ignore in-flight temporary files
//! - a companion lock artifact for serializing writers
//!
//! The layout root comes from [`StorageConfig`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

mod atomic;
pub mod env;
mod lock;

pub use atomic::{DirectWriter, FileWriter, TEMP_PREFIX, write_atomic};
pub use lock::LockFile;

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for lock {0:?}")]
    LockTimeout(PathBuf),
}

impl StorageError {
    /// Collapse into an `io::Error`, for callers whose error taxonomy only has
    /// a transient I/O kind.
    pub fn into_io(self) -> io::Error {
        match self {
            StorageError::Io(e) => e,
            StorageError::LockTimeout(path) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out waiting for lock {}", path.display()),
            ),
            other => io::Error::other(other.to_string()),
        }
    }
}

const JOBS_DIR: &str = "jobs";
const QUEUE_DIR: &str = "queue";
const QUEUED_DIR: &str = "queued";
const CLAIMED_DIR: &str = "claimed";
const LOCKS_DIR: &str = "locks";

/// Where job records and queue entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_FS_ROOT` (default: `./data/jobs`)
    pub fn from_env() -> Result<Self, StorageError> {
        let root = env::var("STORAGE_FS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/jobs"));
        Ok(Self::new(root))
    }

    /// Root of the sharded job-record area.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join(JOBS_DIR)
    }

    /// Entries available for claim.
    pub fn queued_dir(&self) -> PathBuf {
        self.root.join(QUEUE_DIR).join(QUEUED_DIR)
    }

    /// Entries leased to a worker.
    pub fn claimed_dir(&self) -> PathBuf {
        self.root.join(QUEUE_DIR).join(CLAIMED_DIR)
    }

    /// Per-key locks serializing enqueues.
    pub fn queue_locks_dir(&self) -> PathBuf {
        self.root.join(QUEUE_DIR).join(LOCKS_DIR)
    }

    /// Create every directory of the layout.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in [
            self.jobs_dir(),
            self.queued_dir(),
            self.claimed_dir(),
            self.queue_locks_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new("./data/jobs")
    }
}

pub fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Two-character shard bucket for an identifier, stable across processes.
pub fn shard_for(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(&digest[..1])
}

/// Rename `from` onto `to`.
///
/// Returns `Ok(false)` when `from` no longer exists, which is how a losing
/// mover learns that a concurrent mover got there first.
pub fn move_file(from: &Path, to: &Path) -> Result<bool, StorageError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file, treating absence as success. Returns whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read a whole file, or `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// File names in `dir` ending in `suffix`, sorted lexically.
///
/// Dot-files (temporary artifacts) and non-UTF-8 names are skipped. A missing
/// directory yields an empty list.
pub fn list_sorted(dir: &Path, suffix: &str) -> Result<Vec<String>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(suffix) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
