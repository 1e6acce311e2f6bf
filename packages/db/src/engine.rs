//! Wiring of the store, queue, coordinator and lifecycle service.

use std::sync::Arc;

use lifecycle_core::{AuditSink, Clock, IdGenerator, SystemClock, UlidGenerator};

use crate::repositories::{FsJobStore, FsWorkQueue, JobStore, WorkQueue};
use crate::{EngineConfig, JobLifecycle, QueueError, StoreError, WorkerClaimCoordinator};

/// Errors opening an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Everything a producer or a worker needs, sharing one store and one queue.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub coordinator: Arc<WorkerClaimCoordinator>,
    pub lifecycle: Arc<JobLifecycle>,
    pub clock: Arc<dyn Clock>,
}

impl Engine {
    /// Open the filesystem engine on the wall clock with ULID claim ids.
    pub fn open(config: &EngineConfig, audit: Arc<dyn AuditSink>) -> Result<Self, EngineError> {
        Self::open_with(config, audit, Arc::new(SystemClock), Arc::new(UlidGenerator))
    }

    pub fn open_with(
        config: &EngineConfig,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, EngineError> {
        let store: Arc<dyn JobStore> = Arc::new(
            FsJobStore::new(&config.storage, clock.clone())?.with_lock_timeout(config.lock_timeout),
        );
        let queue: Arc<dyn WorkQueue> = Arc::new(
            FsWorkQueue::new(&config.storage, config.lease_ttl, clock.clone())?
                .with_ids(ids)
                .with_lock_timeout(config.lock_timeout),
        );

        tracing::info!(
            root = %config.storage.root.display(),
            lease_ttl_secs = config.lease_ttl.as_secs(),
            max_attempts = config.retry.max_attempts(),
            "Opened job engine"
        );

        Ok(Self::from_parts(store, queue, audit, clock, config))
    }

    /// Build an engine over any store and queue implementation.
    pub fn from_parts(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let coordinator = Arc::new(WorkerClaimCoordinator::new(
            store.clone(),
            queue.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let lifecycle = Arc::new(
            JobLifecycle::new(
                store.clone(),
                queue.clone(),
                audit,
                clock.clone(),
                config.retry.clone(),
            )
            .with_conflict_retries(config.conflict_retries),
        );
        Self {
            store,
            queue,
            coordinator,
            lifecycle,
            clock,
        }
    }
}
