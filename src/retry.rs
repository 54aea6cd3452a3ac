//! Bounded polling budgets shared by the stack poll and readiness loops.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Fixed-interval retry budget. Both caps are optional; a policy without
/// either retries until cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Maximum number of attempts, counting the first.
    pub max_attempts: Option<u32>,
    /// Maximum wall-clock time measured from the first attempt.
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Policy that retries every `interval` with no cap.
    #[must_use]
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            max_elapsed: None,
        }
    }

    /// Caps the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Caps the total elapsed time.
    #[must_use]
    pub const fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    /// Builds a policy from second-based settings where `0` disables a cap.
    #[must_use]
    pub const fn from_secs(interval_secs: u64, max_elapsed_secs: u64, max_attempts: u32) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            max_attempts: if max_attempts == 0 {
                None
            } else {
                Some(max_attempts)
            },
            max_elapsed: if max_elapsed_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(max_elapsed_secs))
            },
        }
    }

    /// Returns `true` once `attempts` made since `started` leave no room for
    /// another one.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32, started: Instant) -> bool {
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return true;
        }
        self.max_elapsed
            .is_some_and(|max| started.elapsed().saturating_add(self.interval) > max)
    }
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `true` when the
/// sleep was cut short by cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(5, 0, 0, None, None)]
    #[case(5, 60, 0, None, Some(Duration::from_secs(60)))]
    #[case(1, 0, 3, Some(3), None)]
    fn from_secs_treats_zero_as_unbounded(
        #[case] interval: u64,
        #[case] elapsed: u64,
        #[case] attempts: u32,
        #[case] expected_attempts: Option<u32>,
        #[case] expected_elapsed: Option<Duration>,
    ) {
        let policy = RetryPolicy::from_secs(interval, elapsed, attempts);
        assert_eq!(policy.interval, Duration::from_secs(interval));
        assert_eq!(policy.max_attempts, expected_attempts);
        assert_eq!(policy.max_elapsed, expected_elapsed);
    }

    #[test]
    fn attempt_cap_exhausts_budget() {
        let policy = RetryPolicy::unbounded(Duration::ZERO).with_max_attempts(2);
        let started = Instant::now();
        assert!(!policy.is_exhausted(1, started));
        assert!(policy.is_exhausted(2, started));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_cap_accounts_for_next_interval() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(5))
            .with_max_elapsed(Duration::from_secs(12));
        let started = Instant::now();
        assert!(!policy.is_exhausted(1, started));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(policy.is_exhausted(2, started));
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancellation() {
        let cancel = CancellationToken::new();
        assert!(!sleep_or_cancel(Duration::from_secs(5), &cancel).await);
    }
}
