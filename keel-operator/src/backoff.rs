//! Bounded exponential backoff for transient gate failures.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Backoff state for consecutive transient failures.
///
/// Delays double from `initial_ms` up to `max_ms`. After `max_attempts`
/// consecutive failures the backoff is exhausted and the caller stops
/// requeueing until the next external signal.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff with the given policy.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Delay before the next attempt, or `None` once exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(self.attempts).unwrap_or(u64::MAX);
        let ms = self
            .config
            .initial_ms
            .saturating_mul(factor)
            .min(self.config.max_ms);
        self.attempts += 1;
        Some(Duration::from_millis(ms))
    }

    /// Consecutive failures so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap_then_gives_up() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60, 60]);
        assert_eq!(backoff.attempts(), 8);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            max_attempts: 2,
        });
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_ms: u64::MAX / 2,
            max_ms: u64::MAX,
            max_attempts: 100,
        });
        for _ in 0..100 {
            assert!(backoff.next_delay().is_some());
        }
    }
}
