//! Hard deadline around a single remote attempt.

use std::future::Future;
use std::time::{Duration, Instant};

/// The wrapped future did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {limit:?} elapsed after {elapsed:?}")]
pub struct DeadlineElapsed {
    pub elapsed: Duration,
    pub limit: Duration,
}

/// Bounds how long one attempt may run.
///
/// The future is dropped when the deadline fires, which releases whatever it
/// held (for an HTTP exchange, the in-flight connection).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Duration,
}

impl Deadline {
    /// Create a deadline. Panics if `limit` is zero or `Duration::MAX`.
    pub fn new(limit: Duration) -> Self {
        assert!(
            limit > Duration::ZERO && limit < Duration::MAX,
            "deadline must be non-zero and finite",
        );
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Drive `future` to completion or give up at the deadline.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, DeadlineElapsed>
    where
        F: Future,
    {
        let start = Instant::now();
        tokio::time::timeout(self.limit, future)
            .await
            .map_err(|_| DeadlineElapsed { elapsed: start.elapsed(), limit: self.limit })
    }
}
