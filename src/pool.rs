//! Fixed-size worker pool draining a shared [`JobQueue`].
//!
//! Workers are spawned once at construction and live until shutdown has
//! been requested and the queue is empty. Each job runs under
//! `catch_unwind`, so a job that panics is reported and the worker moves on
//! to the next one.

use crate::queue::{JobQueue, Rejected};
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Worker pool construction errors
#[derive(Debug)]
pub enum PoolError {
    /// A pool needs at least one worker.
    NoWorkers,
    /// The OS refused to start a worker thread.
    Spawn(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NoWorkers => write!(f, "Worker count must be greater than 0"),
            PoolError::Spawn(e) => write!(f, "Failed to spawn worker thread: {}", e),
        }
    }
}

impl std::error::Error for PoolError {}

/// A pool of long-lived worker threads.
pub struct WorkerPool<T> {
    queue: Arc<JobQueue<T>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `size` workers that take jobs from `queue` and pass each to
    /// `handler` along with the worker's id.
    pub fn new<F>(size: usize, queue: Arc<JobQueue<T>>, handler: F) -> Result<Self, PoolError>
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let handler = Arc::new(handler);
        let mut pool = WorkerPool {
            queue,
            workers: Vec::with_capacity(size),
            size,
        };

        for worker_id in 0..size {
            let queue = Arc::clone(&pool.queue);
            let handler = Arc::clone(&handler);

            let spawned = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &queue, &*handler));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Dropping the pool stops the workers already running.
                    error!(worker = worker_id, error = %e, "Failed to spawn worker");
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(workers = size, "Worker pool started");
        Ok(pool)
    }
}

impl<T> WorkerPool<T> {
    /// Queue a job for the next free worker.
    pub fn submit(&self, job: T) -> Result<(), Rejected<T>> {
        self.queue.submit(job)
    }

    /// Number of workers the pool was built with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Request shutdown and wait for every worker to finish.
    ///
    /// Jobs already queued are processed first. Calling this more than once
    /// is harmless.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        if self.queue.is_empty() {
            info!(workers = self.size, "Shutting down worker pool");
        } else {
            info!(
                workers = self.size,
                pending = self.queue.len(),
                "Shutting down worker pool, draining queue"
            );
        }
        self.queue.request_shutdown();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "Worker thread terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T, F>(worker_id: usize, queue: &JobQueue<T>, handler: &F)
where
    F: Fn(usize, T),
{
    debug!(worker = worker_id, "Worker started");

    while let Some(job) = queue.take() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(worker_id, job))) {
            error!(
                worker = worker_id,
                reason = %panic_message(payload.as_ref()),
                "Job panicked, worker continues"
            );
        }
    }

    debug!(worker = worker_id, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
