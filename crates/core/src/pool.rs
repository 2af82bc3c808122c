//! Bounded-concurrency executor for independent async tasks.
//!
//! Dispatch is a leaky bucket: up to `capacity` tasks are active, and every
//! completion immediately starts the oldest pending task. There is no batching.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::PoolError;

/// A queued unit of work.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;

/// Runs queued tasks with at most `capacity` in flight.
///
/// The pool is a cheap handle: clones share the same queue, so a running task can
/// enqueue follow-up work and the current `run_all` will pick it up. A task returning
/// `Err` is logged and dropped without affecting its siblings; callers that need to
/// see partial failures record them inside the task body.
///
/// Tasks are spawned onto the ambient tokio runtime.
pub struct TaskPool<T> {
    capacity: NonZeroUsize,
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    pending: Mutex<VecDeque<TaskFuture<T>>>,
    in_flight: AtomicUsize,
    running: AtomicBool,
}

impl<T> Clone for TaskPool<T> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> TaskPool<T> {
    /// Create an empty pool running at most `capacity` tasks at once.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(PoolError::ZeroCapacity)?;
        Ok(Self {
            capacity,
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Maximum number of tasks in flight.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Enqueue a task. Never blocks; valid before or during `run_all`.
    pub fn add_task<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.queue().push_back(Box::pin(task));
    }

    /// Tasks queued but not yet started.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Run until the queue is empty and nothing is in flight.
    ///
    /// Returns the outputs of the tasks that succeeded, in completion order. Task
    /// errors are swallowed; a panicking task is reported as
    /// [`PoolError::TaskPanicked`] once every other task has finished.
    pub async fn run_all(&self) -> Result<Vec<T>, PoolError> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyRunning);
        }
        let _running = RunningFlag(&self.shared.running);

        debug!(capacity = self.capacity.get(), pending = self.pending(), "task pool starting");

        let mut active = JoinSet::new();
        let mut outputs = Vec::new();
        let mut failed = 0usize;
        let mut panicked = 0usize;

        loop {
            while active.len() < self.capacity.get() {
                let Some(task) = self.queue().pop_front() else {
                    break;
                };
                active.spawn(task);
            }
            self.shared.in_flight.store(active.len(), Ordering::Release);

            match active.join_next().await {
                Some(Ok(Ok(output))) => outputs.push(output),
                Some(Ok(Err(e))) => {
                    failed += 1;
                    warn!(error = %format!("{e:#}"), "pool task failed");
                }
                Some(Err(e)) => {
                    panicked += 1;
                    warn!(error = %e, "pool task panicked");
                }
                // A task may have been queued from another thread after the refill above.
                None if self.pending() > 0 => continue,
                None => break,
            }
        }
        self.shared.in_flight.store(0, Ordering::Release);

        debug!(succeeded = outputs.len(), failed, panicked, "task pool drained");

        if panicked > 0 {
            return Err(PoolError::TaskPanicked { count: panicked });
        }
        Ok(outputs)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<TaskFuture<T>>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the running flag when `run_all` returns or is dropped.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
