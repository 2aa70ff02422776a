//! # Fibonacci Backoff
//!
//! Retry delays for Agents whose reconcile keeps hitting backend errors.
//! Each delay is the sum of the previous two, starting from the configured
//! requeue interval and capped at a maximum.
//! Sequence for a 60s base and 600s cap: 60s, 60s, 120s, 180s, 300s, 480s, 600s.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new backoff between `min` and `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max: max.max(min),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

/// Backoff sequences per resource key (`namespace/name`)
#[derive(Debug)]
pub struct BackoffTracker {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffTracker {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for `key`, advancing its sequence
    pub fn next(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min, self.max))
            .next_backoff()
    }

    /// Forget the sequence of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backoff) = states.get_mut(key) {
            backoff.reset();
        }
    }

    /// Drop all state for a deleted resource
    pub fn forget(&self, key: &str) {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(secs(60), secs(600));

        let seq: Vec<u64> = (0..9).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![60, 60, 120, 180, 300, 480, 600, 600, 600]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(secs(60), secs(600));
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), secs(120));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), secs(60));
        assert_eq!(backoff.next_backoff(), secs(60));
        assert_eq!(backoff.next_backoff(), secs(120));
    }

    #[test]
    fn test_tracker_keeps_sequences_apart() {
        let tracker = BackoffTracker::new(secs(10), secs(100));
        assert_eq!(tracker.next("ns/a"), secs(10));
        assert_eq!(tracker.next("ns/a"), secs(10));
        assert_eq!(tracker.next("ns/a"), secs(20));
        assert_eq!(tracker.next("ns/b"), secs(10));

        tracker.reset("ns/a");
        assert_eq!(tracker.next("ns/a"), secs(10));

        tracker.forget("ns/b");
        assert_eq!(tracker.next("ns/b"), secs(10));
    }
}
