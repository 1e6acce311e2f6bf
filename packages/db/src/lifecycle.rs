//! Producer and finisher operations over the store and the queue.
//!
//! Every status change goes through the same read-modify-write loop: load,
//! check the transition, apply, save, and on a version conflict reload and
//! apply again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifecycle_core::{
    ArtifactRef, AuditSink, Claim, Clock, JobEvent, JobId, JobKey, JobRecord, JobRun,
    JobStateMachine, JobStatus, RetryConfig, RunOutcome, TenantId, emit_best_effort,
};
use serde_json::Value;

use crate::repositories::{JobStore, WorkQueue};
use crate::{LifecycleError, StoreError};

const PRODUCER: &str = "producer";

/// Result reported by a handler for a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub summary: String,
    pub artifacts: Vec<ArtifactRef>,
}

impl JobOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// What happens to a job after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still RUNNING. Wait `delay`, then release the claim.
    Retry { attempt: u32, delay: Duration },
    /// Marked FAILED and the claim acked.
    Exhausted { attempts: u32 },
}

pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    conflict_retries: u32,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            audit,
            clock,
            retry,
            conflict_retries: 3,
        }
    }

    /// How many times a conflicting save is reloaded and reapplied.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Create a job with a generated id.
    pub fn create_job(
        &self,
        tenant_id: &TenantId,
        job_type: &str,
    ) -> Result<JobRecord, LifecycleError> {
        self.create_with_id(JobKey::new(tenant_id.clone(), JobId::generate()), job_type)
    }

    pub fn create_with_id(&self, key: JobKey, job_type: &str) -> Result<JobRecord, LifecycleError> {
        let record = JobRecord::new(key, job_type, self.clock.now());
        let stored = self.store.create(&record)?;
        emit_best_effort(
            self.audit.as_ref(),
            JobEvent::JobCreated {
                key: stored.key(),
                job_type: stored.job_type.clone(),
                timestamp: stored.created_at,
            },
        );
        Ok(stored)
    }

    /// CREATED -> DRAFT_READY with the given draft.
    pub fn attach_draft(&self, key: &JobKey, draft: Value) -> Result<JobRecord, LifecycleError> {
        self.update(key, PRODUCER, |record| {
            record.draft = Some(draft.clone());
            JobStatus::DraftReady
        })
    }

    /// DRAFT_READY -> CONFIRMED, optionally fixing the execution plan.
    pub fn confirm(&self, key: &JobKey, plan: Option<Value>) -> Result<JobRecord, LifecycleError> {
        self.update(key, PRODUCER, |record| {
            if let Some(plan) = &plan {
                record.plan = Some(plan.clone());
            }
            JobStatus::Confirmed
        })
    }

    /// CONFIRMED -> QUEUED, then enqueue.
    pub fn submit(&self, key: &JobKey) -> Result<JobRecord, LifecycleError> {
        let stored = self.update(key, PRODUCER, |record| {
            record.attempts = 0;
            JobStatus::Queued
        })?;
        self.ensure_enqueued(key)?;
        Ok(stored)
    }

    /// FAILED -> QUEUED for a manual retry, then enqueue.
    pub fn requeue(&self, key: &JobKey) -> Result<JobRecord, LifecycleError> {
        let stored = self.update_from(key, PRODUCER, Some(JobStatus::Failed), |record| {
            record.attempts = 0;
            record.last_error = None;
            JobStatus::Queued
        })?;
        self.ensure_enqueued(key)?;
        Ok(stored)
    }

    /// Put a QUEUED job's entry on the queue if it is missing.
    ///
    /// Covers a crash between persisting QUEUED and enqueueing.
    pub fn ensure_enqueued(&self, key: &JobKey) -> Result<bool, LifecycleError> {
        let added = self.queue.enqueue(key)?;
        if added {
            emit_best_effort(
                self.audit.as_ref(),
                JobEvent::JobEnqueued {
                    key: key.clone(),
                    timestamp: self.clock.now(),
                },
            );
        }
        Ok(added)
    }

    /// Record a successful run: RUNNING -> SUCCEEDED, then ack.
    pub fn record_success(
        &self,
        claim: &Claim,
        started_at: DateTime<Utc>,
        outcome: JobOutcome,
    ) -> Result<JobRecord, LifecycleError> {
        let key = claim.key();
        self.warn_if_expired(claim);

        let finished_at = self.clock.now();
        let stored = self.update(&key, &claim.worker_id, |record| {
            record.attempts = record.attempts.saturating_add(1);
            record.runs.push(run(
                claim,
                record.attempts,
                started_at,
                finished_at,
                RunOutcome::Succeeded {
                    summary: outcome.summary.clone(),
                },
            ));
            record.artifacts.extend(outcome.artifacts.iter().cloned());
            record.last_error = None;
            JobStatus::Succeeded
        })?;
        self.queue.ack(claim)?;

        emit_best_effort(
            self.audit.as_ref(),
            JobEvent::RunFinished {
                key,
                worker_id: claim.worker_id.clone(),
                attempt: stored.attempts,
                succeeded: true,
                error: None,
                timestamp: finished_at,
            },
        );
        Ok(stored)
    }

    /// Record a failed run.
    ///
    /// While attempts remain the job stays RUNNING and the caller gets the
    /// backoff to wait before releasing the claim. Otherwise the job becomes
    /// FAILED and the claim is acked.
    pub fn record_failure(
        &self,
        claim: &Claim,
        started_at: DateTime<Utc>,
        error: &str,
    ) -> Result<FailureDisposition, LifecycleError> {
        let key = claim.key();
        self.warn_if_expired(claim);

        let finished_at = self.clock.now();
        let stored = self.update(&key, &claim.worker_id, |record| {
            record.attempts = record.attempts.saturating_add(1);
            record.runs.push(run(
                claim,
                record.attempts,
                started_at,
                finished_at,
                RunOutcome::Failed {
                    error: error.to_string(),
                },
            ));
            record.last_error = Some(error.to_string());
            if self.retry.allows_another(record.attempts) {
                JobStatus::Running
            } else {
                JobStatus::Failed
            }
        })?;

        emit_best_effort(
            self.audit.as_ref(),
            JobEvent::RunFinished {
                key: key.clone(),
                worker_id: claim.worker_id.clone(),
                attempt: stored.attempts,
                succeeded: false,
                error: Some(error.to_string()),
                timestamp: finished_at,
            },
        );

        if stored.status == JobStatus::Failed {
            self.queue.ack(claim)?;
            tracing::warn!(job_id = %key, attempts = stored.attempts, "Job failed permanently: {}", error);
            return Ok(FailureDisposition::Exhausted {
                attempts: stored.attempts,
            });
        }

        let delay = self.retry.delay(stored.attempts);
        tracing::info!(
            job_id = %key,
            attempt = stored.attempts,
            max_attempts = self.retry.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Run failed, will retry: {}",
            error
        );
        Ok(FailureDisposition::Retry {
            attempt: stored.attempts,
            delay,
        })
    }

    /// Load, apply, transition, save; reload and reapply on a version conflict.
    ///
    /// `apply` mutates the record and returns the status to move to.
    fn update<F>(&self, key: &JobKey, actor: &str, apply: F) -> Result<JobRecord, LifecycleError>
    where
        F: FnMut(&mut JobRecord) -> JobStatus,
    {
        self.update_from(key, actor, None, apply)
    }

    /// Like `update`, but also rejects any starting status other than `only_from`.
    fn update_from<F>(
        &self,
        key: &JobKey,
        actor: &str,
        only_from: Option<JobStatus>,
        mut apply: F,
    ) -> Result<JobRecord, LifecycleError>
    where
        F: FnMut(&mut JobRecord) -> JobStatus,
    {
        let mut conflicts = 0;
        loop {
            let mut record = self.store.load_key(key)?;
            let from = record.status;
            let to = apply(&mut record);
            let legal = only_from.is_none_or(|required| required == from)
                && JobStateMachine::ensure_transition(&record.job_id, from, to);
            if !legal {
                return Err(LifecycleError::IllegalTransition {
                    key: key.clone(),
                    from,
                    to,
                });
            }
            record.status = to;

            match self.store.save(&record) {
                Ok(stored) => {
                    if from != to {
                        emit_best_effort(
                            self.audit.as_ref(),
                            JobEvent::StatusChanged {
                                key: key.clone(),
                                from,
                                to,
                                actor: actor.to_string(),
                                timestamp: stored.updated_at,
                            },
                        );
                    }
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict { found, .. }) if conflicts < self.conflict_retries => {
                    conflicts += 1;
                    tracing::debug!(job_id = %key, found, conflicts, "Version conflict, reapplying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn warn_if_expired(&self, claim: &Claim) {
        if claim.is_expired_at(self.clock.now()) {
            tracing::warn!(
                job_id = %claim.key(),
                claim_id = %claim.claim_id,
                "Finishing a run whose lease has expired; the job may have been reclaimed"
            );
        }
    }
}

fn run(
    claim: &Claim,
    attempt: u32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcome: RunOutcome,
) -> JobRun {
    JobRun {
        attempt,
        worker_id: claim.worker_id.clone(),
        claim_id: claim.claim_id.clone(),
        started_at,
        finished_at,
        outcome,
    }
}
