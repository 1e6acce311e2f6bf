//! Storage-backed repositories: job records and the dispatch queue.

mod job_store;
mod work_queue;

pub use job_store::{FsJobStore, JobStore};
pub use work_queue::{FsWorkQueue, WorkQueue};
