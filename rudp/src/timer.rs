//! Retransmission timers and retry budgets.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetransmitTimer`] — a fixed per-segment timeout, checked against the
//!   segment's last transmission time.
//! - [`RetryBudget`] — a bounded (or unbounded) counter of retransmissions
//!   used by the handshake, teardown and data paths.
//!
//! Timers are not tasks.  The endpoint loop wakes at least once per tick and
//! asks the timer whether a deadline has passed.

use std::time::{Duration, Instant};

/// Fixed retransmission timeout shared by every segment of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitTimer {
    timeout: Duration,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `true` once `timeout` has elapsed since `sent_at`.
    pub fn expired(&self, sent_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(sent_at) >= self.timeout
    }

    /// Instant at which a segment sent at `sent_at` expires.
    pub fn deadline(&self, sent_at: Instant) -> Instant {
        sent_at + self.timeout
    }
}

/// Counts retransmissions against an optional limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    used: u32,
    limit: Option<u32>,
}

impl RetryBudget {
    /// A budget allowing `limit` retries.
    pub fn limited(limit: u32) -> Self {
        Self {
            used: 0,
            limit: Some(limit),
        }
    }

    /// A budget allowing `limit` retries, or unlimited retries for `None`.
    pub fn new(limit: Option<u32>) -> Self {
        Self { used: 0, limit }
    }

    /// Consume one retry.  Returns `false` when the budget was already spent.
    pub fn take(&mut self) -> bool {
        match self.limit {
            Some(limit) if self.used >= limit => false,
            _ => {
                self.used += 1;
                true
            }
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inclusive() {
        let t = RetransmitTimer::new(Duration::from_millis(500));
        let sent = Instant::now();
        assert!(!t.expired(sent, sent + Duration::from_millis(499)));
        assert!(t.expired(sent, sent + Duration::from_millis(500)));
        assert_eq!(t.deadline(sent), sent + Duration::from_millis(500));
    }

    #[test]
    fn clock_going_backwards_never_expires() {
        let t = RetransmitTimer::new(Duration::from_millis(1));
        let sent = Instant::now() + Duration::from_secs(1);
        assert!(!t.expired(sent, Instant::now()));
    }

    #[test]
    fn limited_budget_runs_out() {
        let mut b = RetryBudget::limited(2);
        assert!(b.take());
        assert!(b.take());
        assert!(!b.take());
        assert_eq!(b.used(), 2);
        b.reset();
        assert!(b.take());
    }

    #[test]
    fn unbounded_budget_never_runs_out() {
        let mut b = RetryBudget::new(None);
        for _ in 0..10_000 {
            assert!(b.take());
        }
    }
}
