//! Queue backed by a dedicated worker thread.

use super::{ExecutionQueue, Job};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

/// FIFO queue running jobs on its own named thread.
///
/// The worker exits once the queue is dropped and every pending job has run.
/// A panicking job is logged and does not stop the worker.
#[derive(Debug)]
pub struct SerialQueue {
    label: String,
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Spawn a worker thread named `label`.
    pub fn new(label: impl Into<String>) -> io::Result<Arc<Self>> {
        let label = label.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker_label = label.clone();

        thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                tracing::trace!("Queue {} starting", worker_label);
                while let Some(job) = receiver.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("Job on queue {} panicked", worker_label);
                    }
                }
                tracing::trace!("Queue {} stopped", worker_label);
            })?;

        Ok(Arc::new(Self { label, sender }))
    }
}

impl ExecutionQueue for SerialQueue {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!("Queue {} worker is gone, dropping job", self.label);
        }
    }
}
