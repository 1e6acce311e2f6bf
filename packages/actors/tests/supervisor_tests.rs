//! End-to-end run of the worker pool over a temporary storage root.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    BroadcastAuditSink, JobContext, JobHandlerRegistry, JobOutcome, SupervisorArgs,
    SupervisorMessage, WorkerConfig, start_supervisor,
};
use db::repositories::WorkQueue;
use db::{Engine, EngineConfig};
use lifecycle_core::{JobEvent, JobKey, JobStatus, RetryConfig, RunOutcome, TenantId};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn handlers() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();
    handlers
        .register("echo", |ctx: JobContext| async move {
            let message = ctx
                .job
                .draft
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(JobOutcome::new(format!("{message} from {}", ctx.claim.worker_id)))
        })
        .register("broken", |_ctx: JobContext| async { Err("disk on fire".to_string()) })
        .register("stuck", |_ctx: JobContext| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JobOutcome::new("unreachable"))
        });
    handlers
}

fn submit(engine: &Engine, tenant: &TenantId, job_type: &str) -> Result<JobKey, Box<dyn Error>> {
    let lifecycle = &engine.lifecycle;
    let key = lifecycle.create_job(tenant, job_type)?.key();
    lifecycle.attach_draft(&key, serde_json::json!({ "message": "hello" }))?;
    lifecycle.confirm(&key, None)?;
    lifecycle.submit(&key)?;
    Ok(key)
}

/// Collect run results until both jobs reached their final attempt.
async fn wait_for_runs(
    events: &mut broadcast::Receiver<JobEvent>,
    ok: &JobKey,
    broken: &JobKey,
) -> Result<Vec<(JobKey, u32, bool)>, Box<dyn Error>> {
    let mut runs = Vec::new();
    let mut ok_done = false;
    let mut broken_done = false;
    while !(ok_done && broken_done) {
        if let JobEvent::RunFinished {
            key,
            attempt,
            succeeded,
            ..
        } = events.recv().await?
        {
            ok_done |= &key == ok && succeeded;
            broken_done |= &key == broken && attempt == 2;
            runs.push((key, attempt, succeeded));
        }
    }
    Ok(runs)
}

#[tokio::test]
async fn workers_drive_jobs_to_terminal_states() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = EngineConfig::at(dir.path())
        .with_lease_ttl(Duration::from_secs(30))
        .with_retry(RetryConfig::new(2, 0.0, 0.0));
    let audit = BroadcastAuditSink::new(256);
    let engine = Engine::open(&config, Arc::new(audit.clone()))?;

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        engine: engine.clone(),
        handlers: handlers(),
        config: WorkerConfig::default()
            .with_concurrency(2)
            .with_poll_interval(Duration::from_millis(10)),
        events: audit.sender(),
    })
    .await?;

    let (tx, rx) = ractor::concurrency::oneshot();
    supervisor.send_message(SupervisorMessage::Subscribe { reply: tx.into() })?;
    let mut events = rx.await?;

    let tenant = TenantId::parse("acme")?;
    let ok = submit(&engine, &tenant, "echo")?;
    let broken = submit(&engine, &tenant, "broken")?;

    let runs = timeout(
        Duration::from_secs(10),
        wait_for_runs(&mut events, &ok, &broken),
    )
    .await??;
    assert_eq!(
        runs.iter()
            .filter(|(key, _, _)| key == &broken)
            .map(|(_, attempt, succeeded)| (*attempt, *succeeded))
            .collect::<Vec<_>>(),
        vec![(1, false), (2, false)]
    );

    let record = engine.store.load_key(&ok)?;
    assert_eq!(record.status, JobStatus::Succeeded);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.runs.len(), 1);
    assert!(matches!(
        &record.runs[0].outcome,
        RunOutcome::Succeeded { summary } if summary.starts_with("hello from worker-")
    ));

    let record = engine.store.load_key(&broken)?;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.last_error.as_deref(), Some("disk on fire"));

    // The final ack lands just after the last run event.
    timeout(Duration::from_secs(5), async {
        while engine.queue.stats().map(|s| s.outstanding()).unwrap_or(1) != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let (tx, rx) = ractor::concurrency::oneshot();
    supervisor.send_message(SupervisorMessage::ListWorkers { reply: tx.into() })?;
    assert_eq!(rx.await?, vec!["worker-1".to_string(), "worker-2".to_string()]);

    let (tx, rx) = ractor::concurrency::oneshot();
    supervisor.send_message(SupervisorMessage::GetWorkerStats { reply: tx.into() })?;
    let stats = rx.await?;
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.failed, 1);

    let (tx, rx) = ractor::concurrency::oneshot();
    supervisor.send_message(SupervisorMessage::GetQueueStats { reply: tx.into() })?;
    assert_eq!(rx.await??.outstanding(), 0);

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn handler_past_its_timeout_fails_the_attempt() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = EngineConfig::at(dir.path()).with_retry(RetryConfig::new(1, 0.0, 0.0));
    let audit = BroadcastAuditSink::new(64);
    let engine = Engine::open(&config, Arc::new(audit.clone()))?;
    let mut events = audit.subscribe();

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        engine: engine.clone(),
        handlers: handlers(),
        config: WorkerConfig::default()
            .with_concurrency(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_millis(50)),
        events: audit.sender(),
    })
    .await?;

    let stuck = submit(&engine, &TenantId::parse("acme")?, "stuck")?;
    let succeeded = timeout(Duration::from_secs(10), async {
        loop {
            if let JobEvent::RunFinished { key, succeeded, .. } = events.recv().await?
                && key == stuck
            {
                return Ok::<_, broadcast::error::RecvError>(succeeded);
            }
        }
    })
    .await??;
    assert!(!succeeded);

    let record = engine.store.load_key(&stuck)?;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("Job timed out after 0s"));

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}
