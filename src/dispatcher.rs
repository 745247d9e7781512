//! Bounded concurrency pool for decode-and-handle and send work.
//!
//! Submission never blocks: every task is spawned onto the runtime right away
//! and then waits for one of `workers` permits before it runs. The queue of
//! waiting tasks is unbounded. Tasks finish in whatever order they finish;
//! the read loop that submitted them has moved on long before.
//!
//! # Example
//!
//! ```
//! use tagwire::dispatcher::Dispatcher;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = Dispatcher::new(4);
//! let handle = pool.submit(async { Ok(21 * 2) });
//! assert_eq!(handle.join().await.unwrap(), 42);
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{EndpointError, Result};

/// Interval between drain checks during shutdown.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Host parallelism, falling back to 1 when it cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

struct Shared {
    permits: Arc<Semaphore>,
    workers: usize,
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

/// Shared worker pool. Cheap to clone; all clones feed the same pool.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a pool running at most `workers` tasks at once (minimum 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                outstanding: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Submit a task for asynchronous execution.
    ///
    /// Returns immediately. A failure or panic inside the task is reported
    /// only through its handle. After [`shutdown`](Self::shutdown) the handle
    /// resolves to `PoolShutdown` without running the task.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return TaskHandle {
                inner: tokio::spawn(async { Err(EndpointError::PoolShutdown) }),
            };
        }

        let guard = OutstandingGuard::new(self.shared.clone());
        let permits = self.shared.permits.clone();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| EndpointError::PoolShutdown)?;
            task.await
        });

        TaskHandle { inner }
    }

    /// Maximum number of tasks running at once.
    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Tasks submitted and not yet finished (running or queued).
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait for submitted tasks to drain.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if tasks are still outstanding after `timeout`.
    /// They keep running; nothing is aborted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);

        let start = Instant::now();
        loop {
            let outstanding = self.outstanding();
            if outstanding == 0 {
                return Ok(());
            }

            if start.elapsed() > timeout {
                tracing::warn!(outstanding, "dispatcher shutdown timed out");
                return Err(EndpointError::Timeout("dispatcher shutdown"));
            }

            tokio::time::sleep(DRAIN_CHECK_INTERVAL).await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

/// Decrements the outstanding count however the task ends, panics included.
struct OutstandingGuard(Arc<Shared>);

impl OutstandingGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Self(shared)
    }
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.0.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to one submitted task.
///
/// Dropping it detaches the task; it still runs to completion.
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's result.
    ///
    /// # Errors
    ///
    /// The task's own error, or `Task` if it panicked or was cancelled.
    pub async fn join(self) -> Result<T> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(EndpointError::Task("task panicked".to_string())),
            Err(e) => Err(EndpointError::Task(e.to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}
