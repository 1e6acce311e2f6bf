#![allow(dead_code)]

use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lifecycle_core::{
    AuditError, AuditSink, JobEvent, JobId, JobKey, JobRecord, ManualClock, RetryConfig, TenantId,
    UlidGenerator,
};
use storage::{FileWriter, TEMP_PREFIX};
use tempfile::TempDir;

use db::repositories::{FsJobStore, FsWorkQueue, JobStore};
use db::{Engine, EngineConfig, StoreError};

pub const LEASE: Duration = Duration::from_secs(30);

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An isolated storage root with a manual clock and a recording audit sink.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: EngineConfig,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<RecordingAuditSink>,
}

pub fn setup() -> Result<TestEnv, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = EngineConfig::at(dir.path())
        .with_lease_ttl(LEASE)
        .with_lock_timeout(Duration::from_secs(2))
        .with_retry(RetryConfig::new(3, 5.0, 300.0));
    Ok(TestEnv {
        dir,
        config,
        clock: Arc::new(ManualClock::new(epoch())),
        audit: Arc::new(RecordingAuditSink::default()),
    })
}

impl TestEnv {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> Result<FsJobStore, Box<dyn Error>> {
        Ok(FsJobStore::new(&self.config.storage, self.clock.clone())?
            .with_lock_timeout(self.config.lock_timeout))
    }

    pub fn queue(&self) -> Result<FsWorkQueue, Box<dyn Error>> {
        Ok(FsWorkQueue::new(
            &self.config.storage,
            self.config.lease_ttl,
            self.clock.clone(),
        )?
        .with_lock_timeout(self.config.lock_timeout))
    }

    pub fn engine(&self) -> Result<Engine, Box<dyn Error>> {
        Ok(Engine::open_with(
            &self.config,
            self.audit.clone(),
            self.clock.clone(),
            Arc::new(UlidGenerator),
        )?)
    }

    /// An engine over `store` and a fresh queue on this root.
    pub fn engine_with(&self, store: Arc<dyn JobStore>) -> Result<Engine, Box<dyn Error>> {
        Ok(Engine::from_parts(
            store,
            Arc::new(self.queue()?),
            self.audit.clone(),
            self.clock.clone(),
            &self.config,
        ))
    }
}

/// A store that can be told to fail loads or lose save races.
pub struct FlakyStore {
    inner: FsJobStore,
    conflicts: AtomicU32,
    unavailable: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: FsJobStore) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Reject the next `n` saves with a version conflict.
    pub fn conflict_next(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl JobStore for FlakyStore {
    fn create(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        self.inner.create(record)
    }

    fn load(&self, tenant_id: &TenantId, job_id: &JobId) -> Result<JobRecord, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("store unavailable")));
        }
        self.inner.load(tenant_id, job_id)
    }

    fn save(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let lose = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            return Err(StoreError::VersionConflict {
                key: record.key(),
                expected: record.version,
                found: record.version + 1,
            });
        }
        self.inner.save(record)
    }

    fn exists(&self, key: &JobKey) -> Result<bool, StoreError> {
        self.inner.exists(key)
    }

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<JobId>, StoreError> {
        self.inner.list(tenant_id)
    }
}

/// Writes half of the bytes and then reports a full disk while armed.
#[derive(Debug, Default)]
pub struct FailingWriter {
    armed: AtomicBool,
}

impl FailingWriter {
    pub fn armed() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl FileWriter for FailingWriter {
    fn write_all(&self, file: &mut File, bytes: &[u8]) -> io::Result<()> {
        if !self.armed.load(Ordering::SeqCst) {
            return file.write_all(bytes);
        }
        file.write_all(&bytes[..bytes.len() / 2])?;
        Err(io::Error::other("no space left on device"))
    }
}

/// Counts every write that goes through it.
#[derive(Debug, Default)]
pub struct CountingWriter {
    calls: AtomicU32,
}

impl CountingWriter {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileWriter for CountingWriter {
    fn write_all(&self, file: &mut File, bytes: &[u8]) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        file.write_all(bytes)
    }
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<JobEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.events().iter().map(JobEvent::description).collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: &JobEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Every file under `dir`, recursively.
pub fn all_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Leftover temporary files from atomic writes.
pub fn temp_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(all_files(dir)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(TEMP_PREFIX))
        })
        .collect())
}

/// File names in one directory.
pub fn names_in(dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}
