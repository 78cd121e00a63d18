//! Retry schedules.
//!
//! [`Backoff`] is the connect schedule used during pool initialization.
//! [`DeadlockRetry`] is the bounded state machine the transaction coordinator
//! drives between attempts.

use crate::error::DbError;
use std::time::Duration;

/// Capped exponential backoff: `delay(n) = min(base × 2^(n−1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay after the failed `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What the coordinator should do after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Release the connection, sleep, then start a fresh attempt.
    Retry { delay: Duration },
    /// Surface this error to the caller.
    Fail(DbError),
}

/// Bounded deadlock retry state.
///
/// A transaction is attempted at most `max_retries + 1` times. Only deadlocks
/// are retried; every other error fails immediately, unchanged.
#[derive(Debug, Clone)]
pub struct DeadlockRetry {
    max_retries: u32,
    enabled: bool,
    attempts: u32,
}

impl DeadlockRetry {
    pub const BASE_DELAY: Duration = Duration::from_millis(100);
    pub const MAX_DELAY: Duration = Duration::from_millis(1_000);

    pub fn new(max_retries: u32, enabled: bool) -> Self {
        Self {
            max_retries,
            enabled,
            attempts: 0,
        }
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries performed so far.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Pause before retry number `retry` (1-based): `min(100 × 2^retry, 1000)` ms.
    pub fn delay_for(retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        Self::BASE_DELAY.saturating_mul(factor).min(Self::MAX_DELAY)
    }

    /// Decide how to continue after the current attempt failed with `error`.
    pub fn on_error(&mut self, error: DbError) -> RetryDecision {
        if !self.enabled || !error.is_deadlock() {
            return RetryDecision::Fail(error);
        }
        if self.retries() >= self.max_retries {
            return RetryDecision::Fail(DbError::retries_exhausted(self.attempts, error));
        }
        RetryDecision::Retry {
            delay: Self::delay_for(self.retries() + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (1..=7).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
    }

    #[test]
    fn test_deadlock_delays() {
        assert_eq!(DeadlockRetry::delay_for(1), Duration::from_millis(200));
        assert_eq!(DeadlockRetry::delay_for(2), Duration::from_millis(400));
        assert_eq!(DeadlockRetry::delay_for(3), Duration::from_millis(800));
        assert_eq!(DeadlockRetry::delay_for(4), Duration::from_millis(1_000));
        assert_eq!(DeadlockRetry::delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_deadlock_retry_bound() {
        let mut retry = DeadlockRetry::new(3, true);
        let mut delays = Vec::new();
        loop {
            retry.begin_attempt();
            match retry.on_error(DbError::deadlock("victim")) {
                RetryDecision::Retry { delay } => delays.push(delay),
                RetryDecision::Fail(err) => {
                    assert!(matches!(err, DbError::RetriesExhausted { attempts: 4, .. }));
                    break;
                }
            }
        }
        assert_eq!(retry.attempts(), 4);
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_non_deadlock_errors_fail_unchanged() {
        let mut retry = DeadlockRetry::new(3, true);
        retry.begin_attempt();
        match retry.on_error(DbError::lock_timeout("waited")) {
            RetryDecision::Fail(DbError::LockTimeout { .. }) => {}
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_disabled_retry_surfaces_deadlock() {
        let mut retry = DeadlockRetry::new(3, false);
        retry.begin_attempt();
        assert!(matches!(
            retry.on_error(DbError::deadlock("victim")),
            RetryDecision::Fail(DbError::Deadlock { .. })
        ));
    }

    #[test]
    fn test_zero_retries_exhausts_after_one_attempt() {
        let mut retry = DeadlockRetry::new(0, true);
        retry.begin_attempt();
        assert!(matches!(
            retry.on_error(DbError::deadlock("victim")),
            RetryDecision::Fail(DbError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
