//! Job record persistence.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lifecycle_core::{CURRENT_SCHEMA_VERSION, Clock, JobId, JobKey, JobRecord, TenantId};
use storage::{DirectWriter, FileWriter, LockFile, StorageConfig};

use crate::StoreError;
use crate::schema;

/// Crash-safe, versioned persistence for job records.
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with `AlreadyExists` if one is present.
    fn create(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;

    /// Load and migrate a record to the current schema.
    fn load(&self, tenant_id: &TenantId, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Write `record` if its `version` still matches the persisted one.
    ///
    /// Returns the stored record, whose version is one higher.
    fn save(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;

    /// Whether a record exists for `key`.
    fn exists(&self, key: &JobKey) -> Result<bool, StoreError>;

    /// Job ids of a tenant, sorted.
    fn list(&self, tenant_id: &TenantId) -> Result<Vec<JobId>, StoreError>;

    fn load_key(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
        self.load(&key.tenant_id, &key.job_id)
    }
}

const RECORD_SUFFIX: &str = ".json";
const LOCK_SUFFIX: &str = ".lock";

/// Filesystem-backed job store.
///
/// Layout: `<root>/jobs/<tenant>/<shard>/<job_id>.json`, with a
/// `<job_id>.lock` beside it. Creates and saves hold an advisory lock on that
/// file, so the version check and the rename happen as one step.
pub struct FsJobStore {
    jobs_dir: PathBuf,
    clock: Arc<dyn Clock>,
    writer: Arc<dyn FileWriter>,
    lock_timeout: Duration,
}

impl FsJobStore {
    pub fn new(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let jobs_dir = config.jobs_dir();
        storage::ensure_dir(&jobs_dir)?;
        Ok(Self {
            jobs_dir,
            clock,
            writer: Arc::new(DirectWriter),
            lock_timeout: Duration::from_secs(5),
        })
    }

    /// Replace the write primitive used for atomic writes.
    pub fn with_writer(mut self, writer: Arc<dyn FileWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Set how long a writer waits for the record's lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn shard_dir(&self, key: &JobKey) -> PathBuf {
        self.jobs_dir
            .join(key.tenant_id.as_str())
            .join(storage::shard_for(key.job_id.as_str()))
    }

    /// Path of the record file for `key`.
    pub fn record_path(&self, key: &JobKey) -> PathBuf {
        self.shard_dir(key)
            .join(format!("{}{}", key.job_id, RECORD_SUFFIX))
    }

    fn lock(&self, key: &JobKey) -> Result<LockFile, StoreError> {
        let path = self
            .shard_dir(key)
            .join(format!("{}{}", key.job_id, LOCK_SUFFIX));
        Ok(LockFile::acquire(path, self.lock_timeout)?)
    }

    fn stamp(&self, record: &JobRecord, version: u64) -> JobRecord {
        let mut stored = record.clone();
        stored.version = version;
        stored.schema_version = CURRENT_SCHEMA_VERSION;
        stored.updated_at = self.clock.now();
        stored
    }
}

impl JobStore for FsJobStore {
    fn create(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let key = record.key();
        let path = self.record_path(&key);
        storage::ensure_dir(&self.shard_dir(&key))?;

        let _lock = self.lock(&key)?;
        if path.try_exists()? {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut stored = self.stamp(record, 1);
        stored.created_at = stored.updated_at;
        storage::write_atomic(&path, &schema::encode_record(&stored)?, self.writer.as_ref())?;

        tracing::info!(job_id = %key, status = %stored.status, "Created job record");
        Ok(stored)
    }

    fn load(&self, tenant_id: &TenantId, job_id: &JobId) -> Result<JobRecord, StoreError> {
        let key = JobKey::new(tenant_id.clone(), job_id.clone());
        let bytes = storage::read_optional(&self.record_path(&key))?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        schema::decode_record(&key, &bytes)
    }

    fn save(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let key = record.key();
        let path = self.record_path(&key);
        if !path.try_exists()? {
            return Err(StoreError::NotFound(key));
        }

        let _lock = self.lock(&key)?;
        let current =
            storage::read_optional(&path)?.ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let found = schema::persisted_version(&key, &current)?;
        if found != record.version {
            tracing::debug!(job_id = %key, expected = record.version, found, "Rejected stale save");
            return Err(StoreError::VersionConflict {
                key,
                expected: record.version,
                found,
            });
        }

        let stored = self.stamp(record, found + 1);
        storage::write_atomic(&path, &schema::encode_record(&stored)?, self.writer.as_ref())?;

        tracing::debug!(job_id = %key, version = stored.version, status = %stored.status, "Saved job record");
        Ok(stored)
    }

    fn exists(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self.record_path(key).try_exists()?)
    }

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<JobId>, StoreError> {
        let tenant_dir = self.jobs_dir.join(tenant_id.as_str());
        let shards = match fs::read_dir(&tenant_dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for name in storage::list_sorted(&shard.path(), RECORD_SUFFIX)? {
                let stem = name.trim_end_matches(RECORD_SUFFIX);
                match JobId::parse(stem) {
                    Ok(id) => ids.push(id),
                    Err(e) => tracing::warn!("Skipping unexpected file {:?}: {}", name, e),
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
