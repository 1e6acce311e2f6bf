//! Audit events emitted by the lifecycle engine, and the sinks that receive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobKey, JobStatus};

/// Events recording what the engine did to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job record was created.
    JobCreated {
        key: JobKey,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A job's status was persisted with a new value.
    StatusChanged {
        key: JobKey,
        from: JobStatus,
        to: JobStatus,
        /// Who made the change (worker id, or the producer service).
        actor: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was handed to the dispatch queue.
    JobEnqueued {
        key: JobKey,
        timestamp: DateTime<Utc>,
    },
    /// A claim was given back or cleared without executing the job.
    ClaimSkipped {
        key: JobKey,
        claim_id: String,
        worker_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// An execution attempt finished.
    RunFinished {
        key: JobKey,
        worker_id: String,
        attempt: u32,
        succeeded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobCreated { timestamp, .. } => *timestamp,
            JobEvent::StatusChanged { timestamp, .. } => *timestamp,
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::ClaimSkipped { timestamp, .. } => *timestamp,
            JobEvent::RunFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job this event refers to.
    pub fn key(&self) -> &JobKey {
        match self {
            JobEvent::JobCreated { key, .. } => key,
            JobEvent::StatusChanged { key, .. } => key,
            JobEvent::JobEnqueued { key, .. } => key,
            JobEvent::ClaimSkipped { key, .. } => key,
            JobEvent::RunFinished { key, .. } => key,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobCreated { key, job_type, .. } => {
                format!("Job {} created ({})", key, job_type)
            }
            JobEvent::StatusChanged {
                key, from, to, actor, ..
            } => format!("Job {} {} -> {} by {}", key, from, to, actor),
            JobEvent::JobEnqueued { key, .. } => format!("Job {} enqueued", key),
            JobEvent::ClaimSkipped {
                key,
                worker_id,
                reason,
                ..
            } => format!("Job {} skipped by {}: {}", key, worker_id, reason),
            JobEvent::RunFinished {
                key,
                attempt,
                succeeded,
                error,
                ..
            } => {
                if *succeeded {
                    format!("Job {} attempt {} succeeded", key, attempt)
                } else {
                    let error = error.as_deref().unwrap_or("unknown error");
                    format!("Job {} attempt {} failed: {}", key, attempt, error)
                }
            }
        }
    }
}

/// Failure to record an audit event. Callers treat this as non-fatal.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink closed")]
    Closed,
    #[error("audit sink error: {0}")]
    Sink(String),
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &JobEvent) -> Result<(), AuditError>;
}

/// Emit an event, logging instead of failing when the sink rejects it.
pub fn emit_best_effort(sink: &dyn AuditSink, event: JobEvent) {
    if let Err(e) = sink.emit(&event) {
        tracing::warn!(job_id = %event.key(), "Failed to emit audit event: {}", e);
    }
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &JobEvent) -> Result<(), AuditError> {
        tracing::info!(target: "audit", job_id = %event.key(), "{}", event.description());
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: &JobEvent) -> Result<(), AuditError> {
        Ok(())
    }
}
