//! Supervisor actor owning the worker pool.

use std::sync::Arc;

use db::Engine;
use db::repositories::WorkQueue;
use lifecycle_core::JobEvent;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::config::WorkerConfig;
use crate::handler::JobHandlerRegistry;
use crate::messages::{SupervisorMessage, WorkerMessage, WorkerStats};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Supervisor arguments.
pub struct SupervisorArgs {
    pub engine: Engine,
    pub handlers: JobHandlerRegistry,
    pub config: WorkerConfig,
    /// Channel the engine's audit sink publishes on.
    pub events: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    pub engine: Engine,
    pub workers: Vec<(String, ActorRef<WorkerMessage>)>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// Supervisor actor that starts the workers and answers pool-level queries.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            concurrency = args.config.concurrency,
            job_types = ?args.handlers.job_types(),
            "Starting job supervisor"
        );

        let handlers = Arc::new(args.handlers);
        let mut workers = Vec::with_capacity(args.config.concurrency);
        for n in 1..=args.config.concurrency {
            let worker_id = args.config.worker_id(n);
            let worker_args = WorkerArgs {
                worker_id: worker_id.clone(),
                engine: args.engine.clone(),
                handlers: handlers.clone(),
                poll_interval: args.config.poll_interval,
                job_timeout: args.config.job_timeout,
            };
            let (worker, _handle) =
                Actor::spawn_linked(None, WorkerActor, worker_args, myself.get_cell())
                    .await
                    .map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to spawn worker: {}", e))
                    })?;
            workers.push((worker_id, worker));
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let tick_interval = args.config.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(SupervisorState {
            engine: args.engine,
            workers,
            event_tx: args.events,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Subscribe { reply } => {
                let _ = reply.send(state.event_tx.subscribe());
            }

            SupervisorMessage::GetQueueStats { reply } => {
                let _ = reply.send(queue_stats(&state.engine).await);
            }

            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.workers.iter().map(|(id, _)| id.clone()).collect());
            }

            SupervisorMessage::GetWorkerStats { reply } => {
                let mut total = WorkerStats::default();
                for (_, worker) in &state.workers {
                    let (tx, rx) = ractor::concurrency::oneshot();
                    if worker
                        .send_message(WorkerMessage::GetStats { reply: tx.into() })
                        .is_ok()
                        && let Ok(stats) = rx.await
                    {
                        total.merge(&stats);
                    }
                }
                let _ = reply.send(total);
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                for (_, worker) in state.workers.drain(..) {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                myself.stop(None);
                return Ok(());
            }

            SupervisorMessage::Tick => match queue_stats(&state.engine).await {
                Ok(stats) => tracing::info!(
                    queued = stats.queued,
                    claimed = stats.claimed,
                    expired = stats.expired,
                    "Queue depth"
                ),
                Err(e) => tracing::warn!("Failed to read queue stats: {}", e),
            },
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                state.workers.retain(|(_, worker)| worker.get_id() != cell.get_id());
                tracing::info!("Worker {} stopped: {:?}", cell.get_id(), reason);
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                state.workers.retain(|(_, worker)| worker.get_id() != cell.get_id());
                // Its claim, if any, is picked up again once the lease expires.
                tracing::error!("Worker {} failed: {}", cell.get_id(), error);
            }
            _ => {}
        }
        Ok(())
    }
}

async fn queue_stats(engine: &Engine) -> Result<lifecycle_core::QueueStats, String> {
    let queue = engine.queue.clone();
    match tokio::task::spawn_blocking(move || queue.stats()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Start the supervisor and its workers.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(Some("supervisor".to_string()), Supervisor, args).await?;

    Ok((actor, handle))
}
