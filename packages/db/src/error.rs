//! Error kinds surfaced by the job store, the dispatch queue and the lifecycle service.

use std::io;

use lifecycle_core::{InvalidId, JobKey, JobStatus};
use storage::StorageError;
use thiserror::Error;

/// Job store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record absent. Not retryable.
    #[error("Not found: {0}")]
    NotFound(JobKey),
    /// `create` collided with an existing record.
    #[error("Already exists: {0}")]
    AlreadyExists(JobKey),
    /// Persisted bytes cannot be read as any supported schema. Needs an operator.
    #[error("Data corrupted for {key}: {reason}")]
    DataCorrupted { key: JobKey, reason: String },
    /// The caller's copy is stale. Reload, reapply, and save again.
    #[error("Version conflict for {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: JobKey,
        expected: u64,
        found: u64,
    },
    /// Transient storage failure. Nothing partial was left behind.
    #[error("Store I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn corrupted(key: &JobKey, reason: impl Into<String>) -> Self {
        StoreError::DataCorrupted {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::Io(e.into_io())
    }
}

/// Dispatch queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transient storage failure. The entry was left in exactly one place.
    #[error("Queue I/O error: {0}")]
    Io(#[from] io::Error),
    /// An identifier (usually a generated claim id) is not usable in a file name.
    #[error("Invalid queue identifier: {0}")]
    InvalidId(#[from] InvalidId),
}

impl From<StorageError> for QueueError {
    fn from(e: StorageError) -> Self {
        QueueError::Io(e.into_io())
    }
}

/// Errors from the producer/finisher service.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Illegal transition for {key}: {from} -> {to}")]
    IllegalTransition {
        key: JobKey,
        from: JobStatus,
        to: JobStatus,
    },
}
