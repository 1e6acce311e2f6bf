//! Companion lock artifact for serializing writers of one record.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::StorageError;

const MAX_POLL: Duration = Duration::from_millis(50);

/// An exclusive advisory lock on a companion file, released when dropped.
///
/// The kernel drops the lock when the holding process exits, so a crashed
/// holder never leaves a lock behind. The file itself stays on disk; removing
/// it would let a waiter lock the unlinked inode while a newcomer locks a fresh
/// one.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, StorageError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let deadline = Instant::now() + timeout;
        let mut poll = Duration::from_millis(1);

        loop {
            match file.try_lock() {
                Ok(()) => return Ok(Self { path, file }),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(StorageError::LockTimeout(path));
                    }
                    thread::sleep(poll);
                    poll = (poll * 2).min(MAX_POLL);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock {:?}: {}", self.path, e);
        }
    }
}
