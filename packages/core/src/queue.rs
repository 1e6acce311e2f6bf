//! Dispatch queue domain types: entries, claims and leases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobKey, TenantId};

/// A job waiting in, or leased out of, the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(key: JobKey, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: key.tenant_id,
            job_id: key.job_id,
            enqueued_at,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.tenant_id.clone(), self.job_id.clone())
    }
}

/// One worker's time-bounded lease over a queue entry.
///
/// Invariant: `lease_expires_at > claimed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    /// Unique per claim attempt; a reclaim always carves a new one.
    pub claim_id: String,
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    /// When the underlying entry was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl Claim {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.tenant_id.clone(), self.job_id.clone())
    }

    /// A claim is actionable only while `now < lease_expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.lease_expires_at
    }

    /// Once expired, any worker may reclaim the entry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid_at(now)
    }
}

/// Point-in-time counts of the two queue sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries available for claim.
    pub queued: u64,
    /// Entries currently leased (including expired leases).
    pub claimed: u64,
    /// Claimed entries whose lease has passed.
    pub expired: u64,
}

impl QueueStats {
    /// Total entries not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.queued + self.claimed
    }
}
