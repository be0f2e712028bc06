//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed-size pool draining a bounded task queue
//! - [`WorkerPoolConfig`] - Worker count and queue capacity configuration
//! - [`PoolMetrics`] / [`MetricsSnapshot`] - Lock-free submission counters
//!
//! # Submission contract
//!
//! [`WorkerPool::submit`] is fire-and-forget: it never blocks, and a task
//! that finds the queue full is dropped without an error. Callers that need
//! delivery or completion feedback embed their own acknowledgment channel in
//! the task closure. Drops are counted in [`PoolMetrics`] so saturation is
//! observable even though it is not reported per call.
//!
//! # Shutdown protocol
//!
//! [`WorkerPool::stop`] cancels the shared token first and closes the queue
//! second. Workers select over the token and the queue with cancellation
//! taking priority, and treat "queue closed and drained" as a clean exit, so
//! shutdown can never surface an invalid task.

mod metrics;
mod pool;

pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{
    Task, TaskFuture, TaskResult, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus,
    DEFAULT_QUEUE_CAPACITY,
};
