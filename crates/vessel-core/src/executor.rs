//! Task execution on the event loop and on the blocking worker pool.
//!
//! [`WorkerExecutor`] submits closures either to the event loop
//! ([`run_non_blocking`](WorkerExecutor::run_non_blocking)) or to the bounded
//! blocking pool ([`run_blocking`](WorkerExecutor::run_blocking)). In both
//! cases the returned [`AsyncHandle`] is completed from the event loop, so
//! continuations never run on a worker thread.
//!
//! [`EventLoop`] owns a dedicated single-threaded Tokio runtime whose blocking
//! pool is sized by [`ExecutorConfig::worker_pool_size`].

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BoxError, Cause, TaskError, cause, panic_message};
use crate::handle::AsyncHandle;

const DEFAULT_WORKER_POOL_SIZE: usize = 20;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Configuration & Statistics
// =============================================================================

/// Settings for a dedicated [`EventLoop`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of threads in the blocking worker pool.
    pub worker_pool_size: usize,
    /// Name of the event-loop thread.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            thread_name: "vessel-event-loop".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    non_blocking: AtomicU64,
    blocking: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record<T>(&self, outcome: &Result<T, Cause>) {
        match outcome {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Snapshot of executor activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub non_blocking_submitted: u64,
    pub blocking_submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

// =============================================================================
// WorkerExecutor
// =============================================================================

/// Schedules tasks on the event loop or the blocking worker pool.
///
/// Cloning is cheap; clones share the same runtime and statistics.
#[derive(Clone)]
pub struct WorkerExecutor {
    handle: Handle,
    counters: Arc<Counters>,
}

impl WorkerExecutor {
    /// Creates an executor bound to the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Creates an executor bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Returns the runtime handle tasks are scheduled on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `task` on the event loop.
    ///
    /// The task must not block. Errors and panics complete the handle with a
    /// failure.
    pub fn run_non_blocking<T, F>(&self, task: F) -> AsyncHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        self.counters.non_blocking.fetch_add(1, Ordering::Relaxed);
        let (handle, completer) = AsyncHandle::pending();
        let counters = Arc::clone(&self.counters);
        self.handle.spawn(async move {
            let outcome = run_guarded(task);
            counters.record(&outcome);
            completer.complete(outcome);
        });
        handle
    }

    /// Runs `task` on the blocking worker pool.
    ///
    /// The handle is completed from the event loop once the worker finishes.
    pub fn run_blocking<T, F>(&self, task: F) -> AsyncHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        self.counters.blocking.fetch_add(1, Ordering::Relaxed);
        let (handle, completer) = AsyncHandle::pending();
        let counters = Arc::clone(&self.counters);
        let runtime = self.handle.clone();
        self.handle.spawn(async move {
            let outcome = match runtime.spawn_blocking(move || run_guarded(task)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Blocking task did not run to completion");
                    Err(cause(TaskError::Cancelled))
                }
            };
            counters.record(&outcome);
            completer.complete(outcome);
        });
        handle
    }

    /// Runs a future on the event loop and exposes its result as a handle.
    pub fn run_async<T, Fut>(&self, future: Fut) -> AsyncHandle<T>
    where
        T: Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.counters.non_blocking.fetch_add(1, Ordering::Relaxed);
        let (handle, completer) = AsyncHandle::pending();
        let counters = Arc::clone(&self.counters);
        self.handle.spawn(async move {
            let outcome = future.await.map_err(Cause::from);
            counters.record(&outcome);
            completer.complete(outcome);
        });
        handle
    }

    /// Returns a snapshot of submission and completion counts.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            non_blocking_submitted: self.counters.non_blocking.load(Ordering::Relaxed),
            blocking_submitted: self.counters.blocking.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_guarded<T, F>(task: F) -> Result<T, Cause>
where
    F: FnOnce() -> Result<T, BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result.map_err(Cause::from),
        Err(payload) => Err(cause(TaskError::Panicked(panic_message(payload.as_ref())))),
    }
}

// =============================================================================
// EventLoop
// =============================================================================

/// A dedicated event-loop thread with its own bounded blocking pool.
///
/// Dropping the loop cancels it and joins the thread.
pub struct EventLoop {
    executor: WorkerExecutor,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Starts the event-loop thread.
    pub fn spawn(config: &ExecutorConfig) -> std::io::Result<Self> {
        let pool_size = config.worker_pool_size.max(1);
        let runtime = Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(pool_size)
            .thread_name(format!("{}-worker", config.thread_name))
            .build()?;

        let executor = WorkerExecutor::new(runtime.handle().clone());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                runtime.block_on(token.cancelled());
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })?;

        info!(
            thread = %config.thread_name,
            worker_pool_size = pool_size,
            "Event loop started"
        );

        Ok(Self {
            executor,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Returns an executor bound to this loop.
    pub fn executor(&self) -> &WorkerExecutor {
        &self.executor
    }

    /// Stops the loop and waits for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.cancel();
        if thread.join().is_err() {
            warn!("Event loop thread panicked during shutdown");
        } else {
            debug!("Event loop stopped");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread::ThreadId;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("task failed")]
    struct Failure;

    #[tokio::test]
    async fn test_run_non_blocking_success() {
        let executor = WorkerExecutor::current();
        let handle = executor.run_non_blocking(|| Ok(40 + 2));

        assert_eq!(handle.wait().await.unwrap(), 42);
        let stats = executor.stats();
        assert_eq!(stats.non_blocking_submitted, 1);
        assert_eq!(stats.blocking_submitted, 0);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_run_blocking_captures_error() {
        let executor = WorkerExecutor::current();
        let handle: AsyncHandle<()> = executor.run_blocking(|| Err(Failure.into()));

        let cause = handle.wait().await.unwrap_err();
        assert!(cause.downcast_ref::<Failure>().is_some());
        assert_eq!(executor.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_run_blocking_captures_panic() {
        let executor = WorkerExecutor::current();
        let handle: AsyncHandle<()> = executor.run_blocking(|| panic!("worker exploded"));

        let cause = handle.wait().await.unwrap_err();
        match cause.downcast_ref::<TaskError>() {
            Some(TaskError::Panicked(message)) => assert_eq!(message, "worker exploded"),
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_async() {
        let executor = WorkerExecutor::current();
        let handle = executor.run_async(async { Ok("async") });
        assert_eq!(handle.wait().await.unwrap(), "async");
    }

    #[test]
    fn test_event_loop_completes_on_loop_thread() {
        let event_loop = EventLoop::spawn(&ExecutorConfig {
            worker_pool_size: 2,
            thread_name: "test-loop".into(),
        })
        .unwrap();
        let executor = event_loop.executor().clone();

        let worker_thread = Arc::new(Mutex::new(None::<ThreadId>));
        let seen = Arc::clone(&worker_thread);
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let handle = executor.run_blocking(move || {
            go_rx.recv()?;
            *seen.lock().unwrap() = Some(std::thread::current().id());
            Ok(())
        });

        let (tx, rx) = std::sync::mpsc::channel();
        handle.when_complete(move |_| {
            let _ = tx.send(std::thread::current().name().map(str::to_owned));
        });
        go_tx.send(()).unwrap();

        let completion_thread = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion_thread.as_deref(), Some("test-loop"));
        assert!(worker_thread.lock().unwrap().is_some());
        assert_ne!(
            *worker_thread.lock().unwrap(),
            Some(std::thread::current().id())
        );
        event_loop.shutdown();
    }

    fn assert_cancelled<T: std::fmt::Debug>(outcome: Result<T, Cause>) {
        match outcome {
            Err(cause) => assert!(matches!(
                cause.downcast_ref::<TaskError>(),
                Some(TaskError::Cancelled)
            )),
            Ok(value) => panic!("expected cancellation, got {value:?}"),
        }
    }

    #[tokio::test]
    async fn test_work_submitted_after_shutdown_is_cancelled() {
        let event_loop = EventLoop::spawn(&ExecutorConfig {
            worker_pool_size: 1,
            thread_name: "stopped-loop".into(),
        })
        .unwrap();
        let executor = event_loop.executor().clone();
        event_loop.shutdown();

        let non_blocking = executor.run_non_blocking(|| Ok(1));
        let blocking = executor.run_blocking(|| Ok(2));
        let asynchronous = executor.run_async(async { Ok(3) });

        let wait = Duration::from_secs(1);
        assert_cancelled(tokio::time::timeout(wait, non_blocking.wait()).await.unwrap());
        assert_cancelled(tokio::time::timeout(wait, blocking.wait()).await.unwrap());
        assert_cancelled(tokio::time::timeout(wait, asynchronous.wait()).await.unwrap());
    }

    #[test]
    fn test_queued_work_is_cancelled_by_shutdown() {
        let event_loop = EventLoop::spawn(&ExecutorConfig {
            worker_pool_size: 1,
            thread_name: "draining-loop".into(),
        })
        .unwrap();
        let executor = event_loop.executor().clone();

        let handle = executor.run_async(std::future::pending::<Result<(), BoxError>>());
        let (tx, rx) = std::sync::mpsc::channel();
        handle.when_complete(move |outcome| {
            let _ = tx.send(outcome.is_err());
        });
        event_loop.shutdown();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(matches!(
            handle.cause().and_then(|c| c.downcast_ref::<TaskError>()),
            Some(TaskError::Cancelled)
        ));
    }
}
