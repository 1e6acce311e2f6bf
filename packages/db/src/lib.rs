//! Filesystem persistence for the job lifecycle engine.
//!
//! This crate provides the durable job store, the lease-based dispatch queue,
//! and the two services built on them: the claim coordinator used by workers
//! and the lifecycle service used by producers and finishers.
//!
//! All operations are blocking. Async callers should wrap them in
//! `spawn_blocking`.

mod config;
mod coordinator;
mod engine;
mod error;
mod lifecycle;
pub mod repositories;
pub mod schema;

pub use config::EngineConfig;
pub use coordinator::{ClaimDecision, SkipReason, WorkerClaimCoordinator};
pub use engine::{Engine, EngineError};
pub use error::{LifecycleError, QueueError, StoreError};
pub use lifecycle::{FailureDisposition, JobLifecycle, JobOutcome};
