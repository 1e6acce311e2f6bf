//! Worker process: runs a pool of job workers over the shared storage root.
//!
//! Configuration comes from the environment (`STORAGE_FS_ROOT`, `JOB_*`,
//! `WORKER_*`) and log filtering from `RUST_LOG`.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    BroadcastAuditSink, JobContext, JobHandlerRegistry, JobOutcome, SupervisorArgs,
    SupervisorMessage, WorkerConfig, start_supervisor,
};
use db::{Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

fn handlers() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();
    handlers
        // Returns the draft as the run summary.
        .register("echo", |ctx: JobContext| async move {
            let summary = ctx.job.draft.map(|d| d.to_string()).unwrap_or_default();
            Ok(JobOutcome::new(summary))
        })
        // Sleeps for `plan.sleep_ms`, for exercising leases and timeouts.
        .register("sleep", |ctx: JobContext| async move {
            let ms = ctx
                .job
                .plan
                .as_ref()
                .and_then(|p| p.get("sleep_ms"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(JobOutcome::new(format!("slept {}ms", ms)))
        })
        // Always fails, for exercising retries.
        .register("fail", |ctx: JobContext| async move {
            Err(format!("attempt {} failed on purpose", ctx.attempt))
        });
    handlers
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine_config = EngineConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;

    let audit = BroadcastAuditSink::default();
    let engine = Engine::open(&engine_config, Arc::new(audit.clone()))?;

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        engine,
        handlers: handlers(),
        config: worker_config,
        events: audit.sender(),
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received ctrl-c, stopping workers");
    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;

    Ok(())
}
