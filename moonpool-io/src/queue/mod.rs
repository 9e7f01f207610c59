//! Execution queues for callback delivery and device I/O.
//!
//! A queue is the "execute later" service a [`Channel`](crate::Channel) is
//! bound to. Every handler, progress, completion and cleanup callback of a
//! channel runs on its queue, one job at a time, in submission order.
//!
//! - [`SerialQueue`]: FIFO jobs on a dedicated, named worker thread
//! - [`ManualQueue`]: jobs run only when the caller steps the queue, for
//!   deterministic tests

use std::sync::Arc;

mod manual;
mod serial;

pub use manual::ManualQueue;
pub use serial::SerialQueue;

/// A unit of work submitted to a queue.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared reference to a queue.
pub type QueueRef = Arc<dyn ExecutionQueue>;

/// A serial executor.
///
/// Implementations must run jobs one at a time and in the order they were
/// submitted. `execute` never blocks on the job itself.
pub trait ExecutionQueue: Send + Sync + 'static {
    /// Human-readable label used in logs.
    fn label(&self) -> &str;

    /// Schedule `job` to run after every previously submitted job.
    fn execute(&self, job: Job);
}

/// Submit a closure to a queue.
pub(crate) fn submit<F>(queue: &dyn ExecutionQueue, job: F)
where
    F: FnOnce() + Send + 'static,
{
    queue.execute(Box::new(job));
}
