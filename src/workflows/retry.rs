//! Retry policy for failed workflow runs.
//!
//! Implements exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::WorkflowError;

/// Re-runs allowed when a workflow does not set its own count.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Re-runs allowed after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each retry.
    pub multiplier: f64,
    /// Random extra wait, as a fraction of the computed backoff (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Same policy with a different retry count.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Check if an error should be retried given the retries already made.
    ///
    /// Returns true if the error is transient and `retry_count < max_retries`.
    pub fn should_retry(&self, error: &WorkflowError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Backoff without jitter: `initial_backoff * multiplier^retry_count`,
    /// capped at `max_backoff`.
    pub fn base_backoff(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Wait before retry number `retry_count + 1`, jitter included, never
    /// above `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let base = self.base_backoff(retry_count);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let extra_max = base.as_millis() as f64 * self.jitter;
        let extra = rand::rng().random_range(0.0..=extra_max);
        (base + Duration::from_millis(extra as u64)).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            multiplier,
            jitter: 0.0,
        }
    }

    fn transient() -> WorkflowError {
        WorkflowError::Status {
            service: "api-gateway",
            path: "/system/tenants".to_string(),
            status: 503,
        }
    }

    #[test]
    fn test_default() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(100, 10_000, 2.0);

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capping() {
        let policy = policy(1000, 3000, 2.0);

        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(3000));
        assert_eq!(policy.backoff(30), Duration::from_millis(3000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy(1000, 60_000, 2.0)
        };

        for _ in 0..50 {
            let wait = policy.backoff(1);
            assert!(wait >= Duration::from_millis(2000));
            assert!(wait <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            jitter: 1.0,
            ..policy(1000, 1500, 2.0)
        };

        for _ in 0..50 {
            assert!(policy.backoff(3) <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_zero_initial_backoff() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy(0, 100, 2.0)
        };

        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_transient_errors() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(&transient(), 0));
        assert!(policy.should_retry(&transient(), 2));
        assert!(!policy.should_retry(&transient(), 3));
    }

    #[test]
    fn test_should_not_retry_permanent_errors() {
        let policy = RetryPolicy::default();
        let not_found = WorkflowError::Status {
            service: "api-gateway",
            path: "/content/1".to_string(),
            status: 404,
        };

        assert!(!policy.should_retry(&not_found, 0));
        assert!(!policy.should_retry(&WorkflowError::MissingInput("contentId"), 0));
        assert!(!policy.should_retry(&WorkflowError::decode("tenants", "not an array"), 0));
    }

    #[test]
    fn test_rate_limited_is_retried() {
        let policy = RetryPolicy::default();
        let limited = WorkflowError::Status {
            service: "third-party",
            path: "/api/v1/producthunt/topics".to_string(),
            status: 429,
        };

        assert!(policy.should_retry(&limited, 0));
    }

    #[test]
    fn test_with_max_retries_keeps_backoff() {
        let base = policy(100, 1000, 3.0);
        let none = base.with_max_retries(0);

        assert_eq!(none.max_retries, 0);
        assert_eq!(none.backoff(1), Duration::from_millis(300));
        assert!(!none.should_retry(&transient(), 0));
    }
}
