//! Turns a queue claim into a proceed/skip decision for a worker.

use std::fmt;
use std::sync::Arc;

use lifecycle_core::{
    AuditSink, Claim, Clock, JobEvent, JobRecord, JobStateMachine, JobStatus, emit_best_effort,
};

use crate::repositories::{JobStore, WorkQueue};
use crate::{QueueError, StoreError};

/// Why a claim was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No record for the claimed job. Claim acked.
    Missing,
    /// The record is unreadable. Claim acked.
    Corrupted,
    /// Transient store failure. Claim released.
    StoreUnavailable,
    /// The job already finished. Claim acked.
    Finished(JobStatus),
    /// The job is not runnable yet. Claim released.
    NotReady(JobStatus),
    /// Another writer changed the record first. Claim released.
    Conflict,
}

impl SkipReason {
    /// Whether the claim is cleared for good rather than handed back.
    pub fn acks(&self) -> bool {
        matches!(
            self,
            SkipReason::Missing | SkipReason::Corrupted | SkipReason::Finished(_)
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing => write!(f, "record not found"),
            SkipReason::Corrupted => write!(f, "record corrupted"),
            SkipReason::StoreUnavailable => write!(f, "store unavailable"),
            SkipReason::Finished(status) => write!(f, "already finished ({})", status),
            SkipReason::NotReady(status) => write!(f, "not ready ({})", status),
            SkipReason::Conflict => write!(f, "concurrent update"),
        }
    }
}

/// What the worker should do with a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimDecision {
    /// Execute the job. The record is RUNNING and owned by this claim.
    Proceed(Box<JobRecord>),
    /// The claim has already been acked or released.
    Skip(SkipReason),
}

/// Decides, for each claim, whether the caller runs the job.
///
/// This is the one place where store errors become queue actions instead of
/// propagating: permanent problems ack the claim, transient ones release it.
pub struct WorkerClaimCoordinator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl WorkerClaimCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            audit,
            clock,
        }
    }

    /// Claim the next entry and decide on it. `None` when the queue is idle.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<(Claim, ClaimDecision)>, QueueError> {
        let Some(claim) = self.queue.claim(worker_id)? else {
            return Ok(None);
        };
        let decision = self.decide(&claim)?;
        Ok(Some((claim, decision)))
    }

    pub fn decide(&self, claim: &Claim) -> Result<ClaimDecision, QueueError> {
        let key = claim.key();

        let record = match self.store.load_key(&key) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return self.skip(claim, SkipReason::Missing),
            Err(e @ StoreError::DataCorrupted { .. }) => {
                tracing::error!(job_id = %key, claim_id = %claim.claim_id, "{}", e);
                return self.skip(claim, SkipReason::Corrupted);
            }
            Err(e) => {
                tracing::warn!(job_id = %key, claim_id = %claim.claim_id, "Load failed: {}", e);
                return self.skip(claim, SkipReason::StoreUnavailable);
            }
        };

        match record.status {
            JobStatus::Queued => self.start(claim, record),
            JobStatus::Running => {
                tracing::info!(
                    job_id = %key,
                    worker_id = %claim.worker_id,
                    "Resuming job left RUNNING by an earlier claim"
                );
                Ok(ClaimDecision::Proceed(Box::new(record)))
            }
            status if status.is_terminal() => self.skip(claim, SkipReason::Finished(status)),
            status => self.skip(claim, SkipReason::NotReady(status)),
        }
    }

    fn start(&self, claim: &Claim, mut record: JobRecord) -> Result<ClaimDecision, QueueError> {
        let from = record.status;
        if !JobStateMachine::ensure_transition(&record.job_id, from, JobStatus::Running) {
            return self.skip(claim, SkipReason::NotReady(from));
        }

        record.status = JobStatus::Running;
        match self.store.save(&record) {
            Ok(stored) => {
                emit_best_effort(
                    self.audit.as_ref(),
                    JobEvent::StatusChanged {
                        key: stored.key(),
                        from,
                        to: JobStatus::Running,
                        actor: claim.worker_id.clone(),
                        timestamp: self.clock.now(),
                    },
                );
                Ok(ClaimDecision::Proceed(Box::new(stored)))
            }
            Err(StoreError::VersionConflict { .. }) => self.skip(claim, SkipReason::Conflict),
            Err(StoreError::NotFound(_)) => self.skip(claim, SkipReason::Missing),
            Err(StoreError::DataCorrupted { .. }) => self.skip(claim, SkipReason::Corrupted),
            Err(e) => {
                tracing::warn!(job_id = %record.key(), "Failed to mark job RUNNING: {}", e);
                self.skip(claim, SkipReason::StoreUnavailable)
            }
        }
    }

    fn skip(&self, claim: &Claim, reason: SkipReason) -> Result<ClaimDecision, QueueError> {
        if reason.acks() {
            self.queue.ack(claim)?;
        } else {
            self.queue.release(claim)?;
        }

        tracing::info!(
            job_id = %claim.key(),
            worker_id = %claim.worker_id,
            claim_id = %claim.claim_id,
            acked = reason.acks(),
            "Skipped claim: {}",
            reason
        );
        emit_best_effort(
            self.audit.as_ref(),
            JobEvent::ClaimSkipped {
                key: claim.key(),
                claim_id: claim.claim_id.clone(),
                worker_id: claim.worker_id.clone(),
                reason: reason.to_string(),
                timestamp: self.clock.now(),
            },
        );
        Ok(ClaimDecision::Skip(reason))
    }
}
