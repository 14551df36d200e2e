use super::window::SlidingWindowLog;
use super::{BackendError, BackendKind, Policy, QuotaBackend, QuotaDecision};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Records between automatic sweeps of idle keys.
pub const SWEEP_INTERVAL: u64 = 1024;

/// In-process sliding window backend.
///
/// Correct only inside a single process. Each key's read-prune-compare-append
/// runs under that key's shard lock, so concurrent callers for one identity
/// cannot both observe spare capacity, while unrelated identities on other
/// shards proceed in parallel. Clones share the same table.
///
/// Every [`SWEEP_INTERVAL`] records the table drops identities with no
/// timestamp left in their window, so it stays bounded by recently active
/// identities. [`sweep`](Self::sweep) can also be called directly.
#[derive(Debug, Default, Clone)]
pub struct LocalWindow {
    logs: Arc<DashMap<String, SlidingWindowLog>>,
    records: Arc<AtomicU64>,
}

impl LocalWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a log in memory.
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }

    /// Forget keys whose every timestamp has left its window. Returns how many
    /// were removed.
    pub fn sweep(&self, now_millis: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| !log.is_idle(now_millis));
        before.saturating_sub(self.logs.len())
    }

    /// Synchronous form of [`QuotaBackend::check_and_record`]; this backend
    /// never fails.
    pub fn record(&self, key: &str, policy: &Policy, now_millis: u64) -> QuotaDecision {
        let decision = {
            let mut log = self.logs.entry(key.to_owned()).or_default();
            log.check_and_record(policy, now_millis)
        };
        // The entry guard must be released before sweeping the whole table.
        let seen = self.records.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % SWEEP_INTERVAL == 0 {
            let removed = self.sweep(now_millis);
            if removed > 0 {
                tracing::debug!(removed, "swept idle quota keys");
            }
        }
        decision
    }
}

#[async_trait]
impl QuotaBackend for LocalWindow {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<QuotaDecision, BackendError> {
        Ok(self.record(key, policy, now_millis))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}
