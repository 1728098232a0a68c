//! Bounded, rate-limited fan-out over OS threads.
//!
//! The same pool runs the regions of a manifest and the stacks of a region.
//! Every submitted job comes back exactly once as a [`Completed`], in
//! completion order.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// Minimum spacing between two job dispatches.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// A job paired with what its worker produced.
#[derive(Debug)]
pub struct Completed<J, R> {
    pub job: J,
    pub outcome: Result<R, PoolError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
    dispatch_interval: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
        }
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Number of threads spawned for `jobs` jobs: the configured count
    /// clamped to `[1, jobs]`.
    pub fn size_for(&self, jobs: usize) -> usize {
        self.workers.clamp(1, jobs.max(1))
    }

    /// Run `work` over every job and return one [`Completed`] per job.
    pub fn run<J, R, F>(&self, jobs: Vec<J>, work: F) -> Vec<Completed<J, R>>
    where
        J: Send,
        R: Send,
        F: Fn(&J) -> R + Sync,
    {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let size = self.size_for(total);
        tracing::debug!("Dispatching {} job(s) to {} worker(s)", total, size);

        let (job_tx, job_rx) = mpsc::channel::<J>();
        let job_rx = Mutex::new(job_rx);
        let (done_tx, done_rx) = mpsc::channel::<Completed<J, R>>();
        let work = &work;
        let job_rx = &job_rx;

        std::thread::scope(|scope| {
            for _ in 0..size {
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    loop {
                        let next = job_rx
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .recv();
                        let Ok(job) = next else { break };
                        let outcome = catch_unwind(AssertUnwindSafe(|| work(&job)))
                            .map_err(|payload| PoolError::WorkerPanicked(panic_message(payload)));
                        if done_tx.send(Completed { job, outcome }).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            for (index, job) in jobs.into_iter().enumerate() {
                if index > 0 && !self.dispatch_interval.is_zero() {
                    std::thread::sleep(self.dispatch_interval);
                }
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);

            done_rx.iter().collect()
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
