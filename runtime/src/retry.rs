//! Bounded retry policy for the optimistic allocator.
//!
//! Version conflicts are retried immediately: the loser of a compare-and-swap
//! re-reads and tries again. A small random jitter can spread retries when
//! many requests collide on the same row.
//!
//! # Example
//!
//! ```rust
//! use seatgate_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .jitter(Duration::from_millis(2))
//!     .build();
//!
//! assert_eq!(policy.max_attempts, 5);
//! assert!(policy.jitter_delay().is_some());
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for version conflicts.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `jitter`: zero (retry immediately)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Upper bound of the random pause before a retry
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            jitter: None,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Random pause in `[0, jitter]`, or `None` when jitter is disabled.
    #[must_use]
    pub fn jitter_delay(&self) -> Option<Duration> {
        if self.jitter.is_zero() {
            return None;
        }
        let max_micros = u64::try_from(self.jitter.as_micros()).unwrap_or(u64::MAX);
        let micros = rand::thread_rng().gen_range(0..=max_micros);
        Some(Duration::from_micros(micros))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    jitter: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set total attempts (first attempt included).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the jitter bound.
    #[must_use]
    pub const fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the retry policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}
