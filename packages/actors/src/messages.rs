//! Message types for actor communication.

use lifecycle_core::{JobEvent, QueueStats};
use ractor::RpcReplyPort;
use tokio::sync::broadcast;

/// Running totals kept by each worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
    pub queue_errors: u64,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Poll tick. Claims and runs one job when idle.
    Heartbeat,

    GetStats { reply: RpcReplyPort<WorkerStats> },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Receive every audit event emitted from now on.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<JobEvent>>,
    },

    /// Current queue counts.
    GetQueueStats {
        reply: RpcReplyPort<Result<QueueStats, String>>,
    },

    /// Ids of the workers started by this supervisor.
    ListWorkers { reply: RpcReplyPort<Vec<String>> },

    /// Summed totals of all workers.
    GetWorkerStats { reply: RpcReplyPort<WorkerStats> },

    /// Stop all workers, then the supervisor.
    Shutdown,

    /// Periodic tick for housekeeping.
    Tick,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.retried += other.retried;
        self.skipped += other.skipped;
        self.queue_errors += other.queue_errors;
    }
}
