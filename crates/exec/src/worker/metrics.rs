//! Submission and execution counters for worker pools
//!
//! Makes the fire-and-forget drop path observable without coupling the pool
//! to a metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free counters maintained by a worker pool
///
/// Uses atomic operations for thread-safe access without locks. `submitted`
/// counts tasks accepted into the queue, not submit calls; a call that finds
/// the queue full or the pool stopped increments `dropped` instead.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    submitted: AtomicU64,
    dropped: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl PoolMetrics {
    /// Create a zeroed metrics block
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task accepted into the queue
    pub fn task_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task dropped at submission (queue full or pool stopped)
    pub fn task_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task run to completion, successfully or not
    pub fn task_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that returned an error or panicked
    ///
    /// Failed tasks are also counted in `executed`.
    pub fn task_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted into the queue
    pub submitted: u64,
    /// Tasks dropped at submission
    pub dropped: u64,
    /// Tasks run to completion (success or failure)
    pub executed: u64,
    /// Tasks that returned an error or panicked
    pub failed: u64,
}
