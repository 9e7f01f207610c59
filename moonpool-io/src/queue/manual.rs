//! Queue stepped explicitly by the caller.

use super::{ExecutionQueue, Job};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Queue whose jobs only run when [`step`](Self::step) or
/// [`run_until_idle`](Self::run_until_idle) is called.
///
/// Jobs submitted while a job runs are appended and picked up by later steps,
/// which makes every interleaving of I/O chunks and callbacks reproducible.
#[derive(Default)]
pub struct ManualQueue {
    label: String,
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualQueue {
    /// Create an empty queue.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            jobs: Mutex::new(VecDeque::new()),
        })
    }

    fn jobs(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of jobs waiting to run.
    pub fn pending_job_count(&self) -> usize {
        self.jobs().len()
    }

    /// Run the oldest pending job. Returns `false` if there was none.
    pub fn step(&self) -> bool {
        let job = self.jobs().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until the queue is empty, including jobs submitted along the
    /// way. Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.step() {
            ran += 1;
        }
        ran
    }
}

impl ExecutionQueue for ManualQueue {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&self, job: Job) {
        self.jobs().push_back(job);
    }
}

impl std::fmt::Debug for ManualQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualQueue")
            .field("label", &self.label)
            .field("pending", &self.pending_job_count())
            .finish()
    }
}
