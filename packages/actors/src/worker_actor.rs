//! Worker actor for executing jobs.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use db::repositories::WorkQueue;
use db::{ClaimDecision, Engine, FailureDisposition, LifecycleError, QueueError};
use lifecycle_core::{Claim, JobRecord, RetryConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::time::Instant;
use tracing::Instrument;

use crate::handler::{JobContext, JobHandlerRegistry};
use crate::messages::{WorkerMessage, WorkerStats};

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker_id: String,
    pub engine: Engine,
    pub handlers: Arc<JobHandlerRegistry>,
    pub job_timeout: Duration,
    pub stats: WorkerStats,
    /// Set while a claim is being decided or a handler is running.
    busy: Arc<AtomicBool>,
    /// Backoff after queue I/O errors, so a broken disk is not hammered.
    backoff: RetryConfig,
    consecutive_errors: u32,
    paused_until: Option<Instant>,
    running: bool,
}

impl WorkerActorState {
    fn record_queue_error(&mut self, error: &QueueError) {
        self.stats.queue_errors += 1;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let delay = self.backoff.delay(self.consecutive_errors);
        self.paused_until = Some(Instant::now() + delay);
        tracing::warn!(
            worker_id = %self.worker_id,
            "Queue unavailable, pausing for {:?}: {}",
            delay,
            error
        );
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub engine: Engine,
    pub handlers: Arc<JobHandlerRegistry>,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
}

/// Worker actor that claims jobs from the shared queue and runs them.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let busy = Arc::new(AtomicBool::new(false));

        // Poll loop. Ticks are dropped while a job is in flight.
        let myself_clone = myself.clone();
        let busy_clone = busy.clone();
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if busy_clone.load(Ordering::SeqCst) {
                    continue;
                }
                if myself_clone.send_message(WorkerMessage::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            engine: args.engine,
            handlers: args.handlers,
            job_timeout: args.job_timeout,
            stats: WorkerStats::default(),
            busy,
            backoff: RetryConfig::new(i64::MAX, 1.0, 30.0),
            consecutive_errors: 0,
            paused_until: None,
            running: true,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Heartbeat => {
                if !state.running {
                    myself.stop(None);
                    return Ok(());
                }
                if let Some(until) = state.paused_until {
                    if Instant::now() < until {
                        return Ok(());
                    }
                    state.paused_until = None;
                }
                if state.busy.swap(true, Ordering::SeqCst) {
                    return Ok(());
                }
                let result = poll_once(state).await;
                state.busy.store(false, Ordering::SeqCst);

                match result {
                    Ok(claimed) => {
                        state.consecutive_errors = 0;
                        // Keep draining while there is work.
                        if claimed {
                            myself.send_message(WorkerMessage::Heartbeat)?;
                        }
                    }
                    Err(e) => state.record_queue_error(&e),
                }
            }

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}

/// Claim at most one entry and settle it. Returns whether anything was claimed.
async fn poll_once(state: &mut WorkerActorState) -> Result<bool, QueueError> {
    let coordinator = state.engine.coordinator.clone();
    let worker_id = state.worker_id.clone();
    let claimed = blocking(move || coordinator.claim_next(&worker_id)).await?;

    let Some((claim, decision)) = claimed else {
        return Ok(false);
    };

    match decision {
        ClaimDecision::Skip(_) => {
            state.stats.skipped += 1;
        }
        ClaimDecision::Proceed(record) => {
            run_job(state, claim, *record).await;
        }
    }
    Ok(true)
}

async fn run_job(state: &mut WorkerActorState, claim: Claim, job: JobRecord) {
    let started_at = state.engine.clock.now();
    let job_type = job.job_type.clone();
    let ctx = JobContext {
        attempt: job.attempts + 1,
        claim: claim.clone(),
        job,
    };
    let span = tracing::info_span!(
        "job",
        worker_id = %state.worker_id,
        job_id = %claim.key(),
        trace_id = %ctx.trace_id(),
        attempt = ctx.attempt,
    );
    tracing::info!(parent: &span, "Running {} job", job_type);

    let result = match state.handlers.get(&job_type) {
        Some(handler) => {
            let run = handler.run(ctx.clone()).instrument(span.clone());
            match tokio::time::timeout(state.job_timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(format!(
                    "Job timed out after {}s",
                    state.job_timeout.as_secs()
                )),
            }
        }
        None => Err(format!("No handler for job type: {}", job_type)),
    };

    if ctx.lease_expired(state.engine.clock.now()) {
        tracing::warn!(
            parent: &span,
            lease_expires_at = %claim.lease_expires_at,
            "Lease lapsed while running; another worker may have reclaimed the job"
        );
    }

    let lifecycle = state.engine.lifecycle.clone();
    let settle_claim = claim.clone();
    match result {
        Ok(outcome) => {
            let settled =
                blocking(move || lifecycle.record_success(&settle_claim, started_at, outcome)).await;
            match settled {
                Ok(_) => state.stats.succeeded += 1,
                Err(e) => give_back(state, claim, &e),
            }
        }
        Err(error) => {
            tracing::warn!(parent: &span, "Job failed: {}", error);
            let settled =
                blocking(move || lifecycle.record_failure(&settle_claim, started_at, &error)).await;
            match settled {
                Ok(FailureDisposition::Retry { delay, .. }) => {
                    state.stats.retried += 1;
                    release_after(state.engine.queue.clone(), claim, delay);
                }
                Ok(FailureDisposition::Exhausted { .. }) => state.stats.failed += 1,
                Err(e) => give_back(state, claim, &e),
            }
        }
    }
}

/// The outcome could not be recorded. Release the claim so the job is
/// decided again from whatever the store now holds.
fn give_back(state: &WorkerActorState, claim: Claim, error: &LifecycleError) {
    tracing::warn!(
        worker_id = %state.worker_id,
        job_id = %claim.key(),
        "Could not record outcome, releasing claim: {}",
        error
    );
    release_after(state.engine.queue.clone(), claim, Duration::ZERO);
}

/// Release a claim once `delay` has passed, without holding up the worker.
///
/// If the process stops first the lease simply expires and the job is
/// reclaimed.
fn release_after(queue: Arc<dyn WorkQueue>, claim: Claim, delay: Duration) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let job_id = claim.key();
        if let Err(e) = blocking(move || queue.release(&claim)).await {
            tracing::warn!(job_id = %job_id, "Failed to release claim: {}", e);
        }
    });
}

/// Run store and queue calls off the async runtime.
async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<QueueError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(QueueError::Io(io::Error::other(e.to_string())).into()),
    }
}
