//! Legal status transitions for a job.
//!
//! ```text
//!   CREATED → DRAFT_READY → CONFIRMED → QUEUED → RUNNING → SUCCEEDED
//!                                          ↑         ↓ ↺
//!                                          └───── FAILED
//! ```
//!
//! `RUNNING → RUNNING` is accepted so a worker can resume a job whose previous
//! claimant died after transitioning it.

use crate::{JobId, JobStatus};

/// Stateless validator over the fixed transition graph. Performs no I/O;
/// callers persist the resulting status themselves.
pub struct JobStateMachine;

impl JobStateMachine {
    /// Whether `from → to` is an edge of the graph.
    pub fn is_legal(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (from, to),
            (Created, DraftReady)
                | (DraftReady, Confirmed)
                | (Confirmed, Queued)
                | (Queued, Running)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Queued)
        )
    }

    /// Check a transition for `job_id`. Illegal transitions are reported
    /// (logged and returned as `false`), never raised.
    pub fn ensure_transition(job_id: &JobId, from: JobStatus, to: JobStatus) -> bool {
        let legal = Self::is_legal(from, to);
        if !legal {
            tracing::warn!(%job_id, %from, %to, "Rejected status transition");
        }
        legal
    }

    /// States reachable from `from` in one step.
    pub fn next_states(from: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .filter(|to| Self::is_legal(from, *to))
            .collect()
    }
}
