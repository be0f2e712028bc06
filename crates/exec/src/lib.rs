//! # Task Execution Subsystem
//!
//! Concurrency primitives for running caller-supplied units of work.
//!
//! ## Features
//!
//! - **Worker pool**: a fixed set of workers draining a bounded in-memory
//!   queue, with non-blocking fire-and-forget submission and cooperative
//!   shutdown via a shared cancellation token
//! - **Retry with backoff**: a cancellable retry executor driven by an
//!   immutable [`RetryPolicy`], usable with or without the pool
//! - **Drop observability**: lock-free counters expose accepted, dropped,
//!   executed, and failed task totals so saturation is visible to operators
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │   submit() ──► bounded mpsc queue (capacity 100) ──► workers │
//! │                                      │                       │
//! │                 CancellationToken ───┴──► every worker/task  │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      retry(cancel, policy, op)               │
//! │   attempt ──fail──► cancellable sleep ──► next attempt       │
//! │   (delays: d0 = initial, d_i = min(d_{i-1} × coeff, max))    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The retry executor has no dependency on the worker pool; a task running on
//! the pool may call it around a flaky sub-operation using the cancellation
//! token the pool hands to every task.
//!
//! ## Example
//!
//! ```ignore
//! use millrace_exec::prelude::*;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4));
//! pool.start()?;
//!
//! pool.submit(|cancel| async move {
//!     let policy = RetryPolicy::default();
//!     retry(&cancel, &policy, || fetch_upstream()).await?;
//!     Ok(())
//! });
//!
//! // Graceful shutdown: signals cancellation, then joins every worker.
//! pool.stop().await;
//! ```

pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::reliability::{retry, RetryError, RetryPolicy};
    pub use crate::worker::{
        MetricsSnapshot, Task, TaskResult, WorkerPool, WorkerPoolConfig, WorkerPoolError,
        WorkerPoolStatus,
    };
}

// Re-export key types at crate root
pub use reliability::{retry, RetryError, RetryPolicy};
pub use worker::{
    MetricsSnapshot, Task, TaskResult, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus,
};
