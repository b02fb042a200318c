//! Retry policy for remote calls.
//!
//! A retry is only safe when repeating the request cannot create a duplicate
//! on the server. Failures before the request left the device are always
//! safe; anything after that depends on the method.

use crate::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one attempt, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Connection could not be established; the request was never sent
    ConnectFailed,
    /// The request was sent but no response arrived (timeout, reset)
    NoResponse,
    /// A response arrived with this status
    Status(u16),
}

/// Retry budget and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether the failure class allows another attempt, ignoring the budget.
    pub fn is_retryable(method: Method, attempt: Attempt) -> bool {
        match attempt {
            Attempt::ConnectFailed => true,
            Attempt::NoResponse => method.is_idempotent(),
            Attempt::Status(401 | 403) => false,
            Attempt::Status(status) => status >= 500 && method.is_idempotent(),
        }
    }

    /// Whether to retry after `attempts_made` attempts ended with `attempt`.
    pub fn should_retry(&self, method: Method, attempt: Attempt, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts && Self::is_retryable(method, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.should_retry(Method::Get, Attempt::ConnectFailed, 2));
        assert!(!policy.should_retry(Method::Get, Attempt::ConnectFailed, 3));
    }

    #[test]
    fn exponential_delay_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn connect_failure_retried_for_any_method() {
        for method in [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(RetryPolicy::is_retryable(method, Attempt::ConnectFailed));
        }
    }

    #[test]
    fn create_not_retried_once_sent() {
        assert!(!RetryPolicy::is_retryable(Method::Post, Attempt::NoResponse));
        assert!(!RetryPolicy::is_retryable(Method::Post, Attempt::Status(503)));
        assert!(RetryPolicy::is_retryable(Method::Put, Attempt::NoResponse));
        assert!(RetryPolicy::is_retryable(Method::Delete, Attempt::Status(502)));
    }

    #[test]
    fn auth_and_client_errors_never_retried() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!RetryPolicy::is_retryable(Method::Get, Attempt::Status(status)));
        }
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(Method::Get, Attempt::ConnectFailed, 1));
    }
}
