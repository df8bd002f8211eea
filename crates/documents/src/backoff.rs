//! Capped exponential backoff for status polling and quota waits.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use docintel_core::DomainError;

/// Polling schedule: `initial * multiplier^(n-1)`, capped at `max_interval`,
/// for at most `max_attempts` polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Poll budget; reaching it while still running times the job out
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            max_attempts: 180,
        }
    }
}

impl BackoffPolicy {
    /// Fixed interval, mostly useful for tests.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            multiplier: 1.0,
            max_interval: interval,
            max_attempts,
        }
    }

    /// Reject configurations that would make the schedule shrink or never start.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.initial_interval.is_zero() {
            return Err(DomainError::validation("initial interval must be positive"));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(DomainError::validation("multiplier must be a finite value >= 1.0"));
        }
        if self.max_interval < self.initial_interval {
            return Err(DomainError::validation(
                "max interval must not be shorter than the initial interval",
            ));
        }
        if self.max_attempts == 0 {
            return Err(DomainError::validation("max attempts must be at least 1"));
        }
        Ok(())
    }

    /// Interval to wait after the given (1-indexed) poll attempt.
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.initial_interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        let exp = (attempt - 1).min(1024) as i32;
        let delay_ms = (base_ms * self.multiplier.max(1.0).powi(exp)).min(max_ms);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Interval that follows `current` on the schedule.
    pub fn next_interval(&self, current: Duration) -> Duration {
        if current < self.initial_interval {
            return self.initial_interval;
        }
        let next_ms = current.as_millis() as f64 * self.multiplier.max(1.0);
        let max_ms = self.max_interval.as_millis() as f64;
        Duration::from_millis(next_ms.min(max_ms) as u64)
    }

    /// Whether `attempts` polls have used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Upper bound on total sleeping time over the whole budget.
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|n| self.interval_for_attempt(n))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule_grows_then_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.interval_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(p.interval_for_attempt(2), Duration::from_millis(1500));
        assert_eq!(p.interval_for_attempt(3), Duration::from_millis(2250));
        assert_eq!(p.interval_for_attempt(4), Duration::from_millis(3375));
        assert_eq!(p.interval_for_attempt(5), Duration::from_millis(5000));
        assert_eq!(p.interval_for_attempt(180), Duration::from_millis(5000));
    }

    #[test]
    fn next_interval_follows_the_same_schedule() {
        let p = BackoffPolicy::default();
        let mut current = p.initial_interval;
        for attempt in 1..20 {
            assert_eq!(current, p.interval_for_attempt(attempt));
            current = p.next_interval(current);
        }
    }

    #[test]
    fn budget_is_exhausted_at_max_attempts() {
        let p = BackoffPolicy::default();
        assert!(!p.is_exhausted(179));
        assert!(p.is_exhausted(180));
        // 4 growing intervals then 176 capped ones
        assert_eq!(
            p.worst_case_wait(),
            Duration::from_millis(1000 + 1500 + 2250 + 3375 + 176 * 5000)
        );
    }

    #[test]
    fn validate_rejects_shrinking_schedules() {
        assert!(BackoffPolicy::default().validate().is_ok());
        let p = BackoffPolicy {
            multiplier: 0.5,
            ..BackoffPolicy::default()
        };
        assert!(p.validate().is_err());
        let p = BackoffPolicy {
            max_interval: Duration::from_millis(10),
            ..BackoffPolicy::default()
        };
        assert!(p.validate().is_err());
        assert!(BackoffPolicy::fixed(0, Duration::from_secs(1)).validate().is_err());
    }

    proptest! {
        /// Property: intervals are non-decreasing and never exceed the cap.
        #[test]
        fn intervals_are_monotonic_and_capped(
            initial_ms in 1u64..10_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..10_000,
        ) {
            let p = BackoffPolicy {
                initial_interval: Duration::from_millis(initial_ms),
                multiplier,
                max_interval: Duration::from_millis(initial_ms + extra_ms),
                max_attempts: 180,
            };
            let a = p.interval_for_attempt(attempt);
            let b = p.interval_for_attempt(attempt + 1);
            prop_assert!(a <= b);
            prop_assert!(b <= p.max_interval);
            prop_assert!(a >= p.initial_interval);
        }
    }
}
