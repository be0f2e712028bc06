//! Reliability patterns for flaky operations
//!
//! This module provides:
//! - [`RetryPolicy`] - Immutable exponential-backoff configuration
//! - [`retry`] - Cancellable retry executor
//!
//! The executor runs entirely on the caller's task and is independent of the
//! worker pool; its only suspension point is the bounded, cancellable
//! inter-attempt sleep.

mod retry;

pub use retry::{retry, RetryError, RetryPolicy};
