//! The sliding window log shared by the in-process backend.
//!
//! Invariants:
//! - A timestamp counts while it is strictly greater than `now - window`.
//! - After a call returns, the log holds at most `max_requests` timestamps.
//! - A denied call never mutates the log.

use super::{Policy, QuotaDecision};
use std::collections::VecDeque;

/// Admitted timestamps (epoch millis) for one `(identity, policy)` pair,
/// oldest first.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowLog {
    stamps: VecDeque<u64>,
    window_millis: u64,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timestamps currently held, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// True when nothing in the log would still count at `now`.
    pub fn is_idle(&self, now_millis: u64) -> bool {
        match now_millis.checked_sub(self.window_millis) {
            Some(window_start) => self.stamps.back().map_or(true, |&newest| newest <= window_start),
            // The window reaches back before the epoch: every stamp still counts.
            None => self.stamps.is_empty(),
        }
    }

    /// Prune, compare, and (if allowed) append `now`.
    pub fn check_and_record(&mut self, policy: &Policy, now_millis: u64) -> QuotaDecision {
        let window = policy.window_millis();
        // `None` when the window starts before the epoch; nothing is pruned then.
        let window_start = now_millis.checked_sub(window);
        self.window_millis = window;

        if let Some(window_start) = window_start {
            while self.stamps.front().is_some_and(|&t| t <= window_start) {
                self.stamps.pop_front();
            }
        }

        let limit = policy.max_requests();
        let count = u32::try_from(self.stamps.len()).unwrap_or(u32::MAX);
        let window_reset_at = window_start.map_or(now_millis, |start| start + window);

        if count >= limit {
            let retry_at = self
                .stamps
                .front()
                .map_or(now_millis, |&oldest| oldest.saturating_add(window));
            return QuotaDecision::denied(limit, window_reset_at, retry_at);
        }

        self.stamps.push_back(now_millis);
        QuotaDecision::admitted(limit, limit - (count + 1), window_reset_at, now_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const POLICY: Policy = Policy::new("test", Duration::from_secs(10), 3);

    #[test]
    fn admits_up_to_limit_then_denies() {
        let mut log = SlidingWindowLog::new();
        let remaining: Vec<u32> =
            (0..3).map(|i| log.check_and_record(&POLICY, 1_000 + i).remaining).collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = log.check_and_record(&POLICY, 1_010);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_at, 11_000);
        assert_eq!(log.len(), 3, "denial must not consume quota");
    }

    #[test]
    fn timestamp_exactly_at_window_start_no_longer_counts() {
        let mut log = SlidingWindowLog::new();
        for _ in 0..3 {
            assert!(log.check_and_record(&POLICY, 1_000).allowed);
        }
        assert!(!log.check_and_record(&POLICY, 10_999).allowed);
        // now - window == 1_000 exactly: the old stamps fall out.
        let decision = log.check_and_record(&POLICY, 11_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn window_reset_at_is_window_start_plus_duration() {
        let mut log = SlidingWindowLog::new();
        let decision = log.check_and_record(&POLICY, 50_000);
        assert_eq!(decision.window_reset_at, 50_000);
    }

    #[test]
    fn limit_holds_before_first_window_elapses() {
        let policy = Policy::new("early", Duration::from_secs(60), 2);
        let mut log = SlidingWindowLog::new();
        let admissions: Vec<bool> =
            (0..5).map(|_| log.check_and_record(&policy, 0).allowed).collect();
        assert_eq!(admissions, vec![true, true, false, false, false]);

        let denied = log.check_and_record(&policy, 30_000);
        assert!(!denied.allowed);
        assert_eq!(denied.window_reset_at, 30_000);
        assert_eq!(denied.retry_at, 60_000);
        assert!(!log.is_idle(59_999));
        assert!(log.is_idle(60_000));
    }

    #[test]
    fn idle_logs_are_detected() {
        let mut log = SlidingWindowLog::new();
        assert!(log.is_idle(0));
        log.check_and_record(&POLICY, 1_000);
        assert!(!log.is_idle(5_000));
        assert!(log.is_idle(11_000));
    }
}
