//! FIFO job queue between the acceptor and the worker pool.
//!
//! A single mutex guards both the pending jobs and the shutdown flag.
//! Consumers park on `not_empty`; producers on a bounded queue park on
//! `not_full`. Shutdown is monotonic and drain-based: once requested no new
//! job is accepted, but jobs already queued are still handed out until the
//! queue is empty.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A job refused because shutdown was requested.
///
/// Carries the job back so the caller can dispose of it.
pub struct Rejected<T>(pub T);

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("job queue is shut down")
    }
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

struct State<T> {
    jobs: VecDeque<T>,
    shutdown: bool,
}

/// Blocking multi-producer, multi-consumer FIFO queue.
pub struct JobQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Maximum queued jobs; `None` is unbounded.
    capacity: Option<usize>,
}

impl<T> JobQueue<T> {
    /// Create an unbounded queue.
    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue holding at most `capacity` jobs (`None` = unbounded).
    ///
    /// A capacity of zero is treated as one so that producers can make progress.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    // Critical sections never panic midway, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.capacity.is_some_and(|cap| state.jobs.len() >= cap)
    }

    /// Add a job at the tail and wake one waiting consumer.
    ///
    /// On a bounded queue this blocks while the queue is full. Fails only if
    /// shutdown has been requested, returning the job to the caller.
    pub fn submit(&self, job: T) -> Result<(), Rejected<T>> {
        let mut state = self.lock();
        while !state.shutdown && self.is_full(&state) {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.shutdown {
            return Err(Rejected(job));
        }
        state.jobs.push_back(job);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the job at the head, blocking until one is available.
    ///
    /// Returns `None` once shutdown has been requested and the queue is drained.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                drop(state);
                if self.capacity.is_some() {
                    self.not_full.notify_one();
                }
                return Some(job);
            }
            if state.shutdown {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting jobs and wake every blocked consumer and producer.
    ///
    /// Jobs already queued stay queued and will still be taken.
    pub fn request_shutdown(&self) {
        self.lock().shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[cfg(test)]
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of jobs waiting to be taken.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
