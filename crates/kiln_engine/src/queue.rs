//! Bounded admission gate for compilation and execution work.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

/// Errors raised by the [`ExecutionQueue`] itself.
///
/// A task's own failure is never a `QueueError`; it is returned unchanged
/// inside the task's output.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue was closed before the task was admitted.
    #[error("execution queue is closed")]
    Closed,
}

/// A semaphore-backed task submitter shared by every engine in a process.
///
/// At most `bound` tasks run at once. Waiters are admitted in FIFO order.
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct ExecutionQueue {
    permits: Arc<Semaphore>,
    bound: usize,
    waiting: Arc<AtomicUsize>,
}

impl ExecutionQueue {
    /// Creates a queue admitting at most `bound` concurrent tasks (minimum 1).
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            permits: Arc::new(Semaphore::new(bound)),
            bound,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs `task` once a slot is free and returns its output.
    ///
    /// The slot is held until the task's future completes, and released even
    /// if that future panics or is dropped.
    pub async fn enqueue<F, Fut, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let waiting = self.waiting.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(waiting, bound = self.bound, "task queued");
        let permit = self.permits.acquire().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        let _permit = permit.map_err(|_| QueueError::Closed)?;
        debug!(available = self.available(), "task admitted");
        Ok(task().await)
    }

    /// Stops admitting tasks. Running tasks finish; waiters get [`QueueError::Closed`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of tasks waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// The configured concurrency bound.
    pub fn bound(&self) -> usize {
        self.bound
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("bound", &self.bound)
            .field("available", &self.available())
            .finish()
    }
}
