//! Filesystem dispatch queue with lease-based claims.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use lifecycle_core::{
    Claim, Clock, IdGenerator, JobKey, QueueEntry, QueueStats, UlidGenerator, validate_id,
};
use storage::{DirectWriter, FileWriter, LockFile, StorageConfig};

use crate::QueueError;

/// Durable queue of job keys, claimed under a time-bounded lease.
pub trait WorkQueue: Send + Sync {
    /// Add `key` unless it is already queued or claimed.
    ///
    /// Returns whether a new entry was written.
    fn enqueue(&self, key: &JobKey) -> Result<bool, QueueError>;

    /// Lease the first queued entry, or else the first entry whose lease expired.
    fn claim(&self, worker_id: &str) -> Result<Option<Claim>, QueueError>;

    /// Drop a claimed entry. A missing entry is not an error.
    fn ack(&self, claim: &Claim) -> Result<(), QueueError>;

    /// Hand a claimed entry back to the queued set.
    fn release(&self, claim: &Claim) -> Result<(), QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

const ENTRY_SUFFIX: &str = ".json";
const SEP: char = '~';

/// Directory-backed queue.
///
/// An entry lives in exactly one of two directories:
/// - `queued/<tenant>~<job>.json`
/// - `claimed/<tenant>~<job>~<claim_id>~<worker_id>~<lease_expires_ms>.json`
///
/// Moving between them is a single rename, so of several concurrent claimers
/// exactly one wins and the rest see the source vanish. The claim is carried
/// entirely by the new name; the file content stays the original entry and is
/// never rewritten while claimed.
pub struct FsWorkQueue {
    queued_dir: PathBuf,
    claimed_dir: PathBuf,
    locks_dir: PathBuf,
    lease_ttl: TimeDelta,
    lock_timeout: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    writer: Arc<dyn FileWriter>,
}

impl FsWorkQueue {
    pub fn new(
        config: &StorageConfig,
        lease_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let queued_dir = config.queued_dir();
        let claimed_dir = config.claimed_dir();
        let locks_dir = config.queue_locks_dir();
        storage::ensure_dir(&queued_dir)?;
        storage::ensure_dir(&claimed_dir)?;
        storage::ensure_dir(&locks_dir)?;

        let lease_ttl = TimeDelta::from_std(lease_ttl)
            .unwrap_or(TimeDelta::MAX)
            .max(TimeDelta::milliseconds(1));

        Ok(Self {
            queued_dir,
            claimed_dir,
            locks_dir,
            lease_ttl,
            lock_timeout: Duration::from_secs(5),
            clock,
            ids: Arc::new(UlidGenerator),
            writer: Arc::new(DirectWriter),
        })
    }

    /// Replace the claim-id source.
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the write primitive used for new queue entries.
    pub fn with_writer(mut self, writer: Arc<dyn FileWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Set how long an enqueue waits for the per-key lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lease_ttl(&self) -> TimeDelta {
        self.lease_ttl
    }

    fn queued_path(&self, key: &JobKey) -> PathBuf {
        self.queued_dir.join(queued_name(key))
    }

    fn claimed_path(&self, claim: &Claim) -> PathBuf {
        self.claimed_dir.join(claimed_name(
            &claim.key(),
            &claim.claim_id,
            &claim.worker_id,
            claim.lease_expires_at.timestamp_millis(),
        ))
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let expires = now
            .checked_add_signed(self.lease_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        DateTime::from_timestamp_millis(expires.timestamp_millis()).unwrap_or(expires)
    }

    /// Name of the claimed file currently held for `key`, if any.
    fn find_claimed(&self, key: &JobKey) -> Result<Option<String>, QueueError> {
        let prefix = format!("{}{SEP}{}{SEP}", key.tenant_id, key.job_id);
        Ok(storage::list_sorted(&self.claimed_dir, ENTRY_SUFFIX)?
            .into_iter()
            .find(|name| name.starts_with(&prefix)))
    }

    /// Move `source` into the claimed set under a fresh lease.
    ///
    /// `Ok(None)` means another claimer moved it first. Nothing that can fail
    /// runs after the rename, so an error always leaves the entry in place.
    fn try_take(
        &self,
        source: &Path,
        key: &JobKey,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, QueueError> {
        let Some(bytes) = storage::read_optional(source)? else {
            tracing::debug!(job_id = %key, worker_id, "Lost claim race");
            return Ok(None);
        };
        let enqueued_at = match serde_json::from_slice::<QueueEntry>(&bytes) {
            Ok(entry) => entry.enqueued_at,
            Err(e) => {
                tracing::warn!(job_id = %key, "Queue entry has no readable enqueued_at: {}", e);
                now
            }
        };

        let claim_id = self.ids.next_id();
        validate_id(&claim_id)?;
        let claim = Claim {
            tenant_id: key.tenant_id.clone(),
            job_id: key.job_id.clone(),
            claim_id,
            worker_id: worker_id.to_string(),
            claimed_at: now,
            lease_expires_at: self.lease_expiry(now),
            enqueued_at,
        };

        if !storage::move_file(source, &self.claimed_path(&claim))? {
            tracing::debug!(job_id = %key, worker_id, "Lost claim race");
            return Ok(None);
        }

        tracing::debug!(
            job_id = %key,
            worker_id,
            claim_id = %claim.claim_id,
            lease_expires_at = %claim.lease_expires_at,
            "Claimed queue entry"
        );
        Ok(Some(claim))
    }
}

impl WorkQueue for FsWorkQueue {
    fn enqueue(&self, key: &JobKey) -> Result<bool, QueueError> {
        // Claims move queued -> claimed, so checking in that order cannot miss
        // an entry in flight. Concurrent enqueues of one key are serialized so
        // neither writes after the other's entry was already claimed.
        let _lock = LockFile::acquire(
            self.locks_dir.join(format!("{}{SEP}{}.lock", key.tenant_id, key.job_id)),
            self.lock_timeout,
        )?;

        let path = self.queued_path(key);
        if path.try_exists()? {
            tracing::debug!(job_id = %key, "Already queued");
            return Ok(false);
        }
        if self.find_claimed(key)?.is_some() {
            tracing::debug!(job_id = %key, "Already claimed");
            return Ok(false);
        }

        let entry = QueueEntry::new(key.clone(), self.clock.now());
        let bytes = serde_json::to_vec_pretty(&entry).map_err(storage::StorageError::from)?;
        storage::write_atomic(&path, &bytes, self.writer.as_ref())?;

        tracing::debug!(job_id = %key, "Enqueued");
        Ok(true)
    }

    fn claim(&self, worker_id: &str) -> Result<Option<Claim>, QueueError> {
        validate_id(worker_id)?;
        let now = self.clock.now();

        for name in storage::list_sorted(&self.queued_dir, ENTRY_SUFFIX)? {
            let Some(key) = parse_queued_name(&name) else {
                tracing::warn!("Skipping unrecognized queue entry {:?}", name);
                continue;
            };
            if let Some(claim) = self.try_take(&self.queued_dir.join(&name), &key, worker_id, now)? {
                return Ok(Some(claim));
            }
        }

        for name in storage::list_sorted(&self.claimed_dir, ENTRY_SUFFIX)? {
            let Some(held) = parse_claimed_name(&name) else {
                tracing::warn!("Skipping unrecognized claimed entry {:?}", name);
                continue;
            };
            if held.lease_expires_ms > now.timestamp_millis() {
                continue;
            }
            let source = self.claimed_dir.join(&name);
            if let Some(claim) = self.try_take(&source, &held.key, worker_id, now)? {
                tracing::info!(
                    job_id = %held.key,
                    worker_id,
                    previous_worker = %held.worker_id,
                    previous_claim = %held.claim_id,
                    "Reclaimed expired lease"
                );
                return Ok(Some(claim));
            }
        }

        Ok(None)
    }

    fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        let removed = storage::remove_if_exists(&self.claimed_path(claim))?;
        tracing::debug!(job_id = %claim.key(), claim_id = %claim.claim_id, removed, "Acked claim");
        Ok(())
    }

    fn release(&self, claim: &Claim) -> Result<(), QueueError> {
        let key = claim.key();
        let claimed = self.claimed_path(claim);
        let queued = self.queued_path(&key);

        if queued.try_exists()? {
            storage::remove_if_exists(&claimed)?;
            tracing::debug!(job_id = %key, claim_id = %claim.claim_id, "Released claim; already queued");
            return Ok(());
        }

        let moved = storage::move_file(&claimed, &queued)?;
        tracing::debug!(job_id = %key, claim_id = %claim.claim_id, moved, "Released claim");
        Ok(())
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let now_ms = self.clock.now().timestamp_millis();
        let queued = storage::list_sorted(&self.queued_dir, ENTRY_SUFFIX)?.len() as u64;

        let mut stats = QueueStats {
            queued,
            ..QueueStats::default()
        };
        for name in storage::list_sorted(&self.claimed_dir, ENTRY_SUFFIX)? {
            stats.claimed += 1;
            if parse_claimed_name(&name).is_some_and(|held| held.lease_expires_ms <= now_ms) {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }
}

fn queued_name(key: &JobKey) -> String {
    format!("{}{SEP}{}{ENTRY_SUFFIX}", key.tenant_id, key.job_id)
}

fn claimed_name(key: &JobKey, claim_id: &str, worker_id: &str, lease_expires_ms: i64) -> String {
    format!(
        "{}{SEP}{}{SEP}{claim_id}{SEP}{worker_id}{SEP}{lease_expires_ms}{ENTRY_SUFFIX}",
        key.tenant_id, key.job_id
    )
}

fn parse_queued_name(name: &str) -> Option<JobKey> {
    let stem = name.strip_suffix(ENTRY_SUFFIX)?;
    let (tenant, job) = stem.split_once(SEP)?;
    JobKey::parse(tenant, job).ok()
}

/// The parts of a claimed file name.
#[derive(Debug, PartialEq, Eq)]
struct ClaimedName {
    key: JobKey,
    claim_id: String,
    worker_id: String,
    lease_expires_ms: i64,
}

fn parse_claimed_name(name: &str) -> Option<ClaimedName> {
    let stem = name.strip_suffix(ENTRY_SUFFIX)?;
    let mut parts = stem.split(SEP);
    let (tenant, job, claim_id, worker_id, expires) = (
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
    );
    if parts.next().is_some() {
        return None;
    }
    validate_id(claim_id).ok()?;
    validate_id(worker_id).ok()?;
    Some(ClaimedName {
        key: JobKey::parse(tenant, job).ok()?,
        claim_id: claim_id.to_string(),
        worker_id: worker_id.to_string(),
        lease_expires_ms: expires.parse().ok()?,
    })
}
