//! Retry with exponential backoff
//!
//! A stateless, cancellable retry loop parameterized by [`RetryPolicy`].
//! Delays follow `d_0 = initial_interval`, `d_i = min(d_{i-1} ×
//! backoff_coefficient, max_interval)`; no jitter is applied unless the
//! policy opts in, so the delay sequence is deterministic by default.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retrying a flaky operation
///
/// Immutable and free of shared state; one policy value can drive any number
/// of concurrent [`retry`] calls.
///
/// # Example
///
/// ```
/// use millrace_exec::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(50))
///     .with_max_interval(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound on any computed delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier applied after each failed attempt (≥ 1.0)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// 0.0 disables jitter and keeps the delay sequence deterministic, which
    /// is the default. Turn it on when many callers retry against the same
    /// upstream and synchronized retry storms are a concern.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default backoff parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts (minimum 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the upper bound on computed delays
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient (minimum 1.0)
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Compute the delay following `current`, capped at `max_interval`
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_coefficient;
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }

    /// Apply the configured jitter to a computed delay
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }

        use rand::Rng;
        let base = delay.as_secs_f64();
        let range = base * self.jitter;
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

/// Why a [`retry`] call gave up
///
/// Cancellation is distinct from exhaustion so callers can tell "the context
/// was cancelled" apart from "the operation kept failing."
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The cancellation signal fired before the operation could complete
    #[error("operation cancelled before completion")]
    Cancelled,

    /// Every attempt failed; holds the error from the final attempt
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// The final attempt's error
        last: E,
    },
}

/// Invoke `operation` until it succeeds, attempts run out, or `cancel` fires
///
/// The token is checked before every attempt and during every inter-attempt
/// wait, so cancellation returns promptly instead of finishing a scheduled
/// delay. Only the final attempt's error is returned; earlier failures are
/// logged with their attempt number and the delay chosen before the next
/// try.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = policy.initial_interval;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            debug!(attempt, "Cancelled before attempt");
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Operation failed, retrying"
        );

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(attempt, "Cancelled during backoff wait");
                return Err(RetryError::Cancelled);
            }
            _ = tokio::time::sleep(policy.apply_jitter(delay)) => {}
        }

        delay = policy.next_delay(delay);
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_millis(100));
        assert_eq!(policy.max_interval, Duration::from_secs(5));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_fixed_interval_does_not_grow() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        let d1 = policy.next_delay(policy.initial_interval);
        let d2 = policy.next_delay(d1);
        assert_eq!(d1, Duration::from_millis(250));
        assert_eq!(d2, Duration::from_millis(250));
    }

    #[test]
    fn test_builder_clamps_contract_violations() {
        let policy = RetryPolicy::default()
            .with_max_attempts(0)
            .with_backoff_coefficient(0.5)
            .with_jitter(7.0);

        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_coefficient, 1.0);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_delay_sequence_doubles_then_caps() {
        let policy = RetryPolicy::default()
            .with_initial_interval(Duration::from_millis(10))
            .with_backoff_coefficient(2.0)
            .with_max_interval(Duration::from_millis(25));

        let mut delay = policy.initial_interval;
        assert_eq!(delay, Duration::from_millis(10));

        delay = policy.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(20));

        delay = policy.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(25));

        delay = policy.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(25));
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let policy = RetryPolicy::default()
            .with_max_attempts(10)
            .with_initial_interval(Duration::from_millis(10))
            .with_backoff_coefficient(10.0)
            .with_max_interval(Duration::from_millis(50));

        let mut delay = policy.initial_interval;
        for _ in 0..10 {
            assert!(delay <= Duration::from_millis(50));
            delay = policy.next_delay(delay);
        }
    }

    #[test]
    fn test_policy_serialization() {
        let policy = RetryPolicy::default()
            .with_max_attempts(7)
            .with_initial_interval(Duration::from_millis(20));

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::default();

        let result: Result<u32, RetryError<String>> =
            retry(&cancel, &policy, || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits_without_invoking() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::default();

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = retry(&cancel, &policy, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_final_error() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_interval(Duration::from_millis(1));

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = retry(&cancel, &policy, || {
            let call = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move { Err(format!("failure on call {call}")) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "failure on call 3");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
