//! Core domain types for the job lifecycle engine.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord and JobStatus for the persisted lifecycle state
//! - QueueEntry and Claim for leased work dispatch
//! - JobStateMachine for legal status transitions
//! - RetryPolicy helpers for attempt budgets and backoff
//! - Audit events and sinks
//!
//! Nothing here touches the filesystem.

mod clock;
mod events;
mod job;
mod queue;
mod retry;
mod state_machine;

pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UlidGenerator};
pub use events::{AuditError, AuditSink, JobEvent, NoopAuditSink, TracingAuditSink, emit_best_effort};
pub use job::{
    ArtifactRef, CURRENT_SCHEMA_VERSION, InvalidId, JobId, JobKey, JobRecord, JobRun, JobStatus,
    RunOutcome, TenantId, validate_id,
};
pub use queue::{Claim, QueueEntry, QueueStats};
pub use retry::{RetryConfig, backoff_seconds, normalized_max_attempts};
pub use state_machine::JobStateMachine;
