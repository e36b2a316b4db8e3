//! Retry pacing for failed replica operations and failed passes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::model::PendingReplica;

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,

    /// Ceiling.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5 * 60),
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic delay after `retries` consecutive failures.
    ///
    /// `delay(1) == base`, doubling per failure up to `max`.
    pub fn delay(&self, retries: u32) -> Duration {
        if retries == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retries.saturating_sub(1).min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// [`delay`](Self::delay) spread by up to `jitter` in either direction,
    /// never above `max`.
    pub fn jittered(&self, retries: u32) -> Duration {
        let delay = self.delay(retries);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        delay.mul_f64((1.0 + spread).max(0.0)).min(self.max)
    }

    /// When the next attempt for `pending` is allowed.
    pub fn next_attempt(&self, pending: &PendingReplica) -> Option<DateTime<Utc>> {
        let last = pending.last_attempt?;
        let delay = chrono::Duration::from_std(self.delay(pending.retries)).ok()?;
        Some(last + delay)
    }

    /// Time left before `pending` may be retried; zero when due.
    pub fn remaining(&self, pending: &PendingReplica, now: DateTime<Utc>) -> Duration {
        self.next_attempt(pending)
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

// =============================================================================
// Retry Tracker
// =============================================================================

/// Consecutive pass failures per fleet, within a window.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: BackoffPolicy,

    /// Failures older than this are forgotten.
    window: Duration,

    /// fleet key -> (count, first failure)
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    pub fn new(policy: BackoffPolicy, window: Duration) -> Self {
        Self {
            policy,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn record_failure(&mut self, key: &str) -> Duration {
        let now = Instant::now();
        let (count, first) = self
            .failures
            .entry(key.to_string())
            .or_insert((0, now));

        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        self.policy.jittered(*count)
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |(count, _)| *count)
    }

    /// Forget failures of `key` after a successful pass.
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop entries outside the window.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PendingReason;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }

    #[test]
    fn test_backoff_doubles_until_ceiling() {
        let policy = policy();
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(16));
        assert_eq!(policy.delay(6), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy();
        for _ in 0..100 {
            let d = policy.jittered(3);
            assert!(d >= Duration::from_secs(3), "{d:?}");
            assert!(d <= Duration::from_secs(5), "{d:?}");
            assert!(policy.jittered(10) <= policy.max);
        }
    }

    #[test]
    fn test_remaining_for_pending_replica() {
        let policy = policy();
        let now = Utc::now();
        let pending = PendingReplica {
            ordinal: 1,
            reason: PendingReason::CreateFailed,
            since: now,
            last_attempt: Some(now),
            retries: 3,
            generation: 1,
        };

        assert_eq!(policy.remaining(&pending, now), Duration::from_secs(4));
        assert_eq!(
            policy.remaining(&pending, now + chrono::Duration::seconds(5)),
            Duration::ZERO
        );

        let waiting = PendingReplica {
            last_attempt: None,
            retries: 0,
            reason: PendingReason::NotReady,
            ..pending
        };
        assert_eq!(policy.remaining(&waiting, now), Duration::ZERO);
    }

    #[test]
    fn test_retry_tracker() {
        let mut tracker = RetryTracker::new(
            BackoffPolicy {
                jitter: 0.0,
                ..policy()
            },
            Duration::from_secs(60),
        );

        assert_eq!(tracker.record_failure("garden/seeds"), Duration::from_secs(1));
        assert_eq!(tracker.record_failure("garden/seeds"), Duration::from_secs(2));
        assert_eq!(tracker.failures("garden/seeds"), 2);

        tracker.clear("garden/seeds");
        assert_eq!(tracker.failures("garden/seeds"), 0);
    }
}
