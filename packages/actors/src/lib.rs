//! Actor system for the job workers.
//!
//! This crate runs the worker side of the lifecycle engine on Ractor.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that starts the workers and fans out audit events
//! - `WorkerActor` - Polls the shared queue, runs handlers, records outcomes
//!
//! Workers never talk to each other. Claim exclusivity comes from the queue,
//! so several processes may run a supervisor over the same storage root.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{BroadcastAuditSink, SupervisorArgs, WorkerConfig, start_supervisor};
//!
//! let audit = BroadcastAuditSink::default();
//! let engine = db::Engine::open(&db::EngineConfig::from_env()?, Arc::new(audit.clone()))?;
//! let (supervisor, handle) = start_supervisor(SupervisorArgs {
//!     engine,
//!     handlers,
//!     config: WorkerConfig::from_env()?,
//!     events: audit.sender(),
//! })
//! .await?;
//! ```

mod audit;
mod config;
mod handler;
mod messages;
mod supervisor;
mod worker_actor;

pub use audit::BroadcastAuditSink;
pub use config::WorkerConfig;
pub use handler::{HandlerFuture, HandlerResult, JobContext, JobHandler, JobHandlerRegistry};
pub use messages::{SupervisorMessage, WorkerMessage, WorkerStats};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker_actor::WorkerActor;

/// Types handlers work with.
pub use db::JobOutcome;
pub use lifecycle_core::JobRecord;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
