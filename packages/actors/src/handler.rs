//! Handlers that execute claimed jobs, routed by `job_type`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::JobOutcome;
use lifecycle_core::{Claim, JobRecord};

/// The error string becomes the run's failure.
pub type HandlerResult = Result<JobOutcome, String>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// One attempt at running a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The record as persisted when the attempt started (status RUNNING).
    pub job: JobRecord,
    /// The lease the attempt runs under.
    pub claim: Claim,
    /// 1-based attempt number since the job was last enqueued.
    pub attempt: u32,
}

impl JobContext {
    pub fn trace_id(&self) -> &str {
        &self.job.trace_id
    }

    /// Whether the lease has lapsed, after which another worker may reclaim
    /// the job and run it again.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.claim.lease_expires_at
    }
}

/// Runs one attempt of a job.
///
/// Any `Fn(JobContext) -> impl Future<Output = HandlerResult>` is a handler.
pub trait JobHandler: Send + Sync + 'static {
    fn run(&self, ctx: JobContext) -> HandlerFuture;
}

impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn run(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(self(ctx))
    }
}

#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `job_type` to `handler`, replacing any earlier registration.
    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler) -> &mut Self {
        let job_type = job_type.into();
        if self.handlers.insert(job_type.clone(), Arc::new(handler)).is_some() {
            tracing::warn!("Replaced handler for job type {}", job_type);
        }
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
