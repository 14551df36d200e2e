//! Per-identity admission control.
//!
//! This module provides the building blocks for quota tracking:
//! - [`Policy`]: a named `(window, max_requests)` pair.
//! - [`QuotaBackend`]: where timestamp logs live. [`LocalWindow`] keeps them
//!   in process; networked implementations (see the `relayguard-redis` crate)
//!   share them between instances.
//! - [`QuotaTracker`]: picks the backend, applies the fallback mode, reads the
//!   clock and emits telemetry.
//! - [`QuotaLayer`]: tower middleware that enforces a policy per request.
//!
//! # Algorithm
//!
//! Sliding window log. For a call at `now`, timestamps `<= now - window` are
//! discarded; if the remaining count has reached the limit the call is denied
//! and nothing is written, otherwise `now` is appended. Being over quota is a
//! normal [`QuotaDecision`], not an error.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::time::Duration;

pub mod layer;
pub mod local;
pub mod policy;
pub mod tracker;
pub mod window;

pub use layer::{QuotaLayer, QuotaService, QuotaServiceError};
pub use local::LocalWindow;
pub use policy::Policy;
pub use tracker::{FallbackMode, PolicyQuota, QuotaTracker, QuotaTrackerBuilder};
pub use window::SlidingWindowLog;

/// Result of one `check_and_record` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Whether the operation was admitted (and recorded).
    pub allowed: bool,
    /// Admissions left in the window after this call. Always 0 when denied.
    pub remaining: u32,
    /// The policy's `max_requests`.
    pub limit: u32,
    /// End of the evaluated window (`window_start + window`), epoch millis.
    pub window_reset_at: u64,
    /// Earliest instant another call can be admitted, epoch millis. Equal to
    /// the call time when admitted.
    pub retry_at: u64,
}

impl QuotaDecision {
    pub fn admitted(limit: u32, remaining: u32, window_reset_at: u64, now_millis: u64) -> Self {
        Self { allowed: true, remaining, limit, window_reset_at, retry_at: now_millis }
    }

    pub fn denied(limit: u32, window_reset_at: u64, retry_at: u64) -> Self {
        Self { allowed: false, remaining: 0, limit, window_reset_at, retry_at }
    }

    /// How long a denied caller should wait, measured from `now_millis`.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.retry_at.saturating_sub(now_millis))
    }

    /// `window_reset_at` as an RFC 3339 UTC timestamp with milliseconds,
    /// e.g. `2025-01-01T00:00:00.000Z`.
    pub fn reset_at_rfc3339(&self) -> String {
        let millis = i64::try_from(self.window_reset_at).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Which family of backend served a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Shared by every process instance.
    Networked,
    /// This process only.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Networked => write!(f, "networked"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// A backend could not be reached or answered garbage.
#[derive(Debug, thiserror::Error)]
#[error("{backend} quota backend failed: {source}")]
pub struct BackendError {
    pub backend: &'static str,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl BackendError {
    pub fn new<E>(backend: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self { backend, source: source.into() }
    }
}

/// Storage for sliding window logs.
///
/// Implementations must make the prune-compare-append sequence atomic per
/// key: either with a lock (in process) or with a server-side primitive
/// (networked). `now_millis` is supplied by the tracker's clock.
#[async_trait::async_trait]
pub trait QuotaBackend: Send + Sync + fmt::Debug {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<QuotaDecision, BackendError>;

    fn kind(&self) -> BackendKind;
}
