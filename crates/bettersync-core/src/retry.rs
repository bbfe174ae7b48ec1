//! Fixed-delay retry helper.
//!
//! Every retry in the crate goes through [`with_retry`]: a bounded number of
//! attempts separated by a blocking sleep. There is no exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::retry::{with_retry, RetryPolicy};
//!
//! let outcome = with_retry(&RetryPolicy::new(3, Duration::from_millis(500)), |_| {
//!     transport.delete_object(handle)
//! });
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, TransportError, TransportResult};
use crate::transport::{DeviceObject, Transport};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below one.
    pub max_attempts: u32,
    /// Wait before each retry.
    pub delay: Duration,
    /// Skip the wait before the second attempt.
    #[serde(default)]
    pub immediate_first_retry: bool,
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            immediate_first_retry: false,
        }
    }

    /// A single attempt, no retry.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Retry the first failure right away and wait before later ones.
    #[must_use]
    pub const fn with_immediate_first_retry(mut self) -> Self {
        self.immediate_first_retry = true;
        self
    }

    /// Wait applied before attempt number `attempt` (1-based).
    #[must_use]
    pub const fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || (attempt == 2 && self.immediate_first_retry) {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    /// Whether to keep trying after this error.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result of [`with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        /// Produced value.
        value: T,
        /// Attempt that succeeded (1-based).
        attempts: u32,
    },
    /// A fallback succeeded with reduced guarantees.
    Degraded {
        /// Produced value.
        value: T,
        /// Attempts made, including the fallback.
        attempts: u32,
    },
    /// Every attempt failed, or a non-retryable error stopped the loop.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last_error: E,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Degraded { attempts, .. }
            | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Whether a value was produced.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Exhausted { .. })
    }

    /// Collapse into a `Result`, treating degraded as success.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { value, .. } | Self::Degraded { value, .. } => Ok(value),
            Self::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    /// If exhausted, run `fallback`; its success is reported as degraded.
    pub fn or_degraded(self, fallback: impl FnOnce(&E) -> Result<T, E>) -> Self {
        match self {
            Self::Exhausted {
                attempts,
                last_error,
            } => match fallback(&last_error) {
                Ok(value) => Self::Degraded {
                    value,
                    attempts: attempts + 1,
                },
                Err(last_error) => Self::Exhausted {
                    attempts: attempts + 1,
                    last_error,
                },
            },
            other => other,
        }
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or the policy is
/// used up. `op` receives the 1-based attempt number.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match op(attempt) {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if attempt < max && e.is_retryable() => {
                debug!("Attempt {}/{} failed, retrying: {}", attempt, max, e);
                attempt += 1;
            }
            Err(last_error) => {
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error,
                };
            }
        }
    }
}

// =============================================================================
// Listing helpers
// =============================================================================

/// List children, retrying transient failures.
pub(crate) fn list_children<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    storage_id: u32,
    parent_handle: u32,
) -> TransportResult<Vec<u32>> {
    with_retry(policy, |_| transport.list_children(storage_id, parent_handle)).into_result()
}

/// Read object metadata, retrying transient failures.
pub(crate) fn object_info<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    handle: u32,
) -> TransportResult<DeviceObject> {
    with_retry(policy, |_| transport.get_object_info(handle)).into_result()
}

/// Metadata of every child of `parent_handle`. Children whose metadata
/// cannot be read are skipped.
pub(crate) fn children_info<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    storage_id: u32,
    parent_handle: u32,
) -> TransportResult<Vec<DeviceObject>> {
    let handles = list_children(transport, policy, storage_id, parent_handle)?;
    Ok(handles
        .into_iter()
        .filter_map(|handle| match object_info(transport, policy, handle) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping handle {}: {}", handle, e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn test_success_on_first_attempt() {
        let outcome: RetryOutcome<u32, TransportError> = with_retry(&quick(3), |_| Ok(7));
        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 7,
                attempts: 1
            }
        );
    }

    #[test]
    fn test_retries_transient_until_success() {
        let outcome = with_retry(&quick(3), |attempt| {
            if attempt < 3 {
                Err(TransportError::Busy)
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result(), Ok(3));
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), _> = with_retry(&quick(3), |_| {
            calls.set(calls.get() + 1);
            Err(TransportError::Busy)
        });
        assert_eq!(calls.get(), 3);
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: TransportError::Busy
            }
        ));
    }

    #[test]
    fn test_non_retryable_error_stops_immediately() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), _> = with_retry(&quick(5), |_| {
            calls.set(calls.get() + 1);
            Err(TransportError::NotFound { handle: 3 })
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let outcome: RetryOutcome<u8, TransportError> = with_retry(&quick(0), |_| Ok(1));
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_or_degraded_reports_fallback() {
        let outcome: RetryOutcome<&str, TransportError> =
            with_retry(&quick(2), |_| Err(TransportError::Busy)).or_degraded(|_| Ok("partial"));
        assert_eq!(
            outcome,
            RetryOutcome::Degraded {
                value: "partial",
                attempts: 3
            }
        );
    }

    #[test]
    fn test_delay_schedule() {
        let policy =
            RetryPolicy::new(3, Duration::from_secs(2)).with_immediate_first_retry();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::ZERO);
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));

        let plain = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(plain.delay_before(2), Duration::from_millis(500));
    }
}
