//! Fixed-size worker pool over a bounded task queue
//!
//! Workers are tokio tasks sharing a single bounded mpsc queue and one
//! cancellation token. Submission is non-blocking and best-effort; shutdown
//! is cooperative and crash-free even when racing submissions.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use super::metrics::{MetricsSnapshot, PoolMetrics};

/// Queue capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Result of a task body
///
/// Nothing is retained or surfaced to the submitter; failures are logged and
/// counted by the pool.
pub type TaskResult = anyhow::Result<()>;

/// Boxed future produced by a task body
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// An opaque unit of work
///
/// The closure receives the pool-wide cancellation token so long-running
/// work can exit early during shutdown.
pub type Task = Box<dyn FnOnce(CancellationToken) -> TaskFuture + Send>;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Pool ID used in log fields (generated if not provided)
    pub pool_id: String,

    /// Number of workers launched by `start`
    pub workers: usize,

    /// Capacity of the bounded task queue
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_id: format!("pool-{}", Uuid::now_v7()),
            workers: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given worker count
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Default::default()
        }
    }

    /// Set the pool ID
    pub fn with_pool_id(mut self, id: impl Into<String>) -> Self {
        self.pool_id = id.into();
        self
    }

    /// Set the worker count (minimum 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the queue capacity (minimum 1)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Worker pool lifecycle states
///
/// The pool is single-use: `Stopped` is terminal and a stopped pool cannot
/// be restarted. Construct a new instance per lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Queue and cancellation token allocated, no workers running
    Created,
    /// Workers launched and draining the queue
    Running,
    /// Cancellation signaled, queue closed, workers exiting
    Stopping,
    /// All workers have exited and been joined
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Start called while the pool is running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Start called on a stopped pool
    #[error("worker pool has been stopped and cannot be restarted")]
    Stopped,
}

/// Fixed-size worker pool
///
/// # Example
///
/// ```ignore
/// use millrace_exec::worker::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(4));
/// pool.start()?;
///
/// pool.submit(|cancel| async move {
///     do_work(cancel).await
/// });
///
/// // Graceful shutdown: cancels, closes the queue, joins every worker.
/// pool.stop().await;
/// ```
///
/// `stop` must not be called from inside a submitted task: it waits for that
/// very worker to exit and would deadlock.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue_tx: RwLock<Option<mpsc::Sender<Task>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
    metrics: Arc<PoolMetrics>,
    status: RwLock<WorkerPoolStatus>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool
    ///
    /// Allocates the bounded queue and a fresh cancellation token. No
    /// workers run until [`start`](Self::start) is called. Worker count and
    /// queue capacity are clamped to at least 1.
    pub fn new(mut config: WorkerPoolConfig) -> Self {
        config.workers = config.workers.max(1);
        config.queue_capacity = config.queue_capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

        Self {
            config,
            queue_tx: RwLock::new(Some(queue_tx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            cancel: CancellationToken::new(),
            metrics: Arc::new(PoolMetrics::new()),
            status: RwLock::new(WorkerPoolStatus::Created),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Launch the configured number of workers
    ///
    /// Must be called exactly once, from within a tokio runtime. A second
    /// call, or a call after [`stop`](Self::stop), is rejected.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write().unwrap();
            match *status {
                WorkerPoolStatus::Created => *status = WorkerPoolStatus::Running,
                WorkerPoolStatus::Running => return Err(WorkerPoolError::AlreadyRunning),
                WorkerPoolStatus::Stopping | WorkerPoolStatus::Stopped => {
                    return Err(WorkerPoolError::Stopped)
                }
            }
        }

        let queue = match self.queue_rx.lock().unwrap().take() {
            Some(rx) => Arc::new(tokio::sync::Mutex::new(rx)),
            // Unreachable once the status transition above has been won.
            None => return Err(WorkerPoolError::AlreadyRunning),
        };

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Starting worker pool"
        );

        let mut handles = self.workers.lock().unwrap();
        for worker_id in 0..self.config.workers {
            handles.push(tokio::spawn(run_worker(
                self.config.pool_id.clone(),
                worker_id,
                Arc::clone(&queue),
                self.cancel.clone(),
                Arc::clone(&self.metrics),
            )));
        }

        Ok(())
    }

    /// Submit a task for execution
    ///
    /// Fire-and-forget: never blocks and returns nothing. If the queue has
    /// free capacity the task will run exactly once on some worker; if the
    /// queue is full or the pool is stopping, the task is dropped. The drop
    /// is counted in [`metrics`](Self::metrics) and logged, but the caller
    /// receives no signal. Callers needing delivery or completion feedback
    /// embed an acknowledgment channel inside the closure.
    pub fn submit<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let task: Task = Box::new(move |cancel| Box::pin(task(cancel)));

        let queue_tx = self.queue_tx.read().unwrap();
        match queue_tx.as_ref() {
            Some(tx) => match tx.try_send(task) {
                Ok(()) => {
                    self.metrics.task_submitted();
                    trace!(pool_id = %self.config.pool_id, "Task submitted to queue");
                }
                Err(TrySendError::Full(_)) => {
                    self.metrics.task_dropped();
                    warn!(pool_id = %self.config.pool_id, "Task queue is full, dropping task");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.task_dropped();
                    warn!(pool_id = %self.config.pool_id, "Task queue is closed, dropping task");
                }
            },
            None => {
                self.metrics.task_dropped();
                warn!(pool_id = %self.config.pool_id, "Worker pool is stopping, dropping task");
            }
        }
    }

    /// Stop the pool and wait for every worker to exit
    ///
    /// Signals cancellation first, then closes the queue, then joins all
    /// workers. Tasks still queued at cancellation are not executed. Safe to
    /// call more than once and safe to race with `submit`; a concurrent
    /// second call returns without waiting for the first to finish joining.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    pub async fn stop(&self) {
        {
            let mut status = self.status.write().unwrap();
            match *status {
                WorkerPoolStatus::Stopping | WorkerPoolStatus::Stopped => return,
                WorkerPoolStatus::Created | WorkerPoolStatus::Running => {
                    *status = WorkerPoolStatus::Stopping
                }
            }
        }

        info!("Stopping worker pool");

        // Order matters: workers must observe the cancellation signal before
        // they can see the closed queue.
        self.cancel.cancel();
        self.queue_tx.write().unwrap().take();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                error!(%error, "Worker failed to join");
            }
        }

        *self.status.write().unwrap() = WorkerPoolStatus::Stopped;
        info!("Worker pool stopped");
    }

    /// Get the current lifecycle status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read().unwrap()
    }

    /// Take a snapshot of the pool counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Get the pool ID
    pub fn pool_id(&self) -> &str {
        &self.config.pool_id
    }

    /// Get the configured worker count
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Get the configured queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }
}

/// Per-worker loop
///
/// Exits on cancellation (checked with priority over the queue) or when the
/// queue is closed and drained. A task sitting in the queue at cancellation
/// is left un-executed.
#[instrument(skip_all, fields(pool_id = %pool_id, worker_id = worker_id))]
async fn run_worker(
    pool_id: String,
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
    metrics: Arc<PoolMetrics>,
) {
    debug!("Worker started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Worker shutting down");
                break;
            }
            task = recv_task(&queue) => {
                match task {
                    Some(task) => execute_task(task, &cancel, &metrics).await,
                    None => {
                        debug!("Queue closed and drained, worker exiting");
                        break;
                    }
                }
            }
        }
    }
}

/// Receive the next task, sharing the receiver across workers
///
/// The lock is held only for the receive itself, never across execution.
async fn recv_task(queue: &tokio::sync::Mutex<mpsc::Receiver<Task>>) -> Option<Task> {
    queue.lock().await.recv().await
}

/// Run one task, isolating its failure from the worker
async fn execute_task(task: Task, cancel: &CancellationToken, metrics: &PoolMetrics) {
    trace!("Worker executing task");

    match AssertUnwindSafe(task(cancel.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(%error, "Task execution failed");
            metrics.task_failed();
        }
        Err(_) => {
            error!("Task panicked during execution");
            metrics.task_failed();
        }
    }

    metrics.task_executed();
}
