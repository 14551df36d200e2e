//! The quota tracker: backend selection, fallback and telemetry around the
//! sliding window algorithm.

use super::{BackendError, BackendKind, LocalWindow, Policy, QuotaBackend, QuotaDecision};
use crate::clock::{Clock, SystemClock};
use crate::telemetry::{self, BoxedSink, GuardEvent, NullSink, QuotaEvent};
use crate::GuardError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What to do when the networked backend cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    /// Refuse the request with [`GuardError::QuotaBackendUnavailable`].
    #[default]
    FailClosed,
    /// Answer from an in-process [`LocalWindow`] and emit
    /// [`QuotaEvent::Degraded`].
    Local,
}

impl FromStr for FallbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "fail_closed" | "closed" => Ok(FallbackMode::FailClosed),
            "local" => Ok(FallbackMode::Local),
            other => Err(format!("expected `fail-closed` or `local`, got `{other}`")),
        }
    }
}

/// Admission control over one backend. Cheap to clone; clones share state.
///
/// Build it once at startup and hand it (or a [`PolicyQuota`] bound to one
/// policy) to request handlers.
#[derive(Clone)]
pub struct QuotaTracker {
    backend: Arc<dyn QuotaBackend>,
    fallback: Option<LocalWindow>,
    clock: Arc<dyn Clock>,
    sink: BoxedSink,
}

impl fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("backend", &self.backend)
            .field("fallback", &self.fallback.is_some())
            .field("clock", &self.clock)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl QuotaTracker {
    pub fn builder() -> QuotaTrackerBuilder {
        QuotaTrackerBuilder::new()
    }

    /// Tracker over a fresh in-process backend with the system clock.
    pub fn local() -> Self {
        Self::builder().build()
    }

    /// Kind of the primary backend.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Admit-and-record, or deny, the next operation for `identity` under
    /// `policy`.
    ///
    /// # Errors
    /// Only [`GuardError::QuotaBackendUnavailable`], when the primary backend
    /// fails and the fallback mode is [`FallbackMode::FailClosed`]. Being over
    /// quota is `Ok` with `allowed == false`.
    pub async fn check_and_record(
        &self,
        identity: &str,
        policy: &Policy,
    ) -> Result<QuotaDecision, GuardError> {
        let key = policy.key_for(identity);
        let now = self.clock.now_millis();

        let (decision, served_by) = match self.backend.check_and_record(&key, policy, now).await {
            Ok(decision) => (decision, self.backend.kind()),
            Err(err) => (self.recover(&key, policy, now, err).await?, BackendKind::Local),
        };

        let event = if decision.allowed {
            tracing::debug!(
                policy = policy.name(),
                remaining = decision.remaining,
                backend = %served_by,
                "quota admitted"
            );
            QuotaEvent::Admitted {
                policy: policy.name(),
                remaining: decision.remaining,
                backend: served_by,
            }
        } else {
            let retry_after = decision.retry_after(now);
            tracing::debug!(policy = policy.name(), ?retry_after, "quota exceeded");
            QuotaEvent::Denied { policy: policy.name(), retry_after }
        };
        telemetry::emit_best_effort(self.sink.clone(), GuardEvent::Quota(event)).await;

        Ok(decision)
    }

    /// Bind this tracker to one policy.
    pub fn for_policy(&self, policy: Policy) -> PolicyQuota {
        PolicyQuota { tracker: self.clone(), policy }
    }

    async fn recover(
        &self,
        key: &str,
        policy: &Policy,
        now: u64,
        err: BackendError,
    ) -> Result<QuotaDecision, GuardError> {
        let reason = err.to_string();
        match &self.fallback {
            Some(local) => {
                tracing::warn!(
                    policy = policy.name(),
                    error = %reason,
                    "quota backend unavailable; enforcing per-process limits"
                );
                telemetry::emit_best_effort(
                    self.sink.clone(),
                    GuardEvent::Quota(QuotaEvent::Degraded { policy: policy.name(), reason }),
                )
                .await;
                Ok(local.record(key, policy, now))
            }
            None => {
                tracing::error!(
                    policy = policy.name(),
                    error = %reason,
                    "quota backend unavailable; failing closed"
                );
                telemetry::emit_best_effort(
                    self.sink.clone(),
                    GuardEvent::Quota(QuotaEvent::BackendFailed { policy: policy.name(), reason }),
                )
                .await;
                Err(GuardError::QuotaBackendUnavailable(err))
            }
        }
    }
}

/// A tracker bound to a single policy, the form request handlers receive.
#[derive(Debug, Clone)]
pub struct PolicyQuota {
    tracker: QuotaTracker,
    policy: Policy,
}

impl PolicyQuota {
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn tracker(&self) -> &QuotaTracker {
        &self.tracker
    }

    /// [`QuotaTracker::check_and_record`] with the bound policy.
    pub async fn check(&self, identity: &str) -> Result<QuotaDecision, GuardError> {
        self.tracker.check_and_record(identity, &self.policy).await
    }

    /// Like [`check`](Self::check) but turns a denial into
    /// [`GuardError::QuotaExceeded`], for handlers that short-circuit with `?`.
    pub async fn admit(&self, identity: &str) -> Result<QuotaDecision, GuardError> {
        let decision = self.check(identity).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(GuardError::QuotaExceeded {
                decision,
                message: self.policy.denial_message().to_string(),
            })
        }
    }
}

/// Builder for [`QuotaTracker`].
pub struct QuotaTrackerBuilder {
    backend: Option<Arc<dyn QuotaBackend>>,
    fallback: FallbackMode,
    clock: Arc<dyn Clock>,
    sink: BoxedSink,
}

impl Default for QuotaTrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaTrackerBuilder {
    /// Defaults: in-process backend, fail closed, system clock, no telemetry.
    pub fn new() -> Self {
        Self {
            backend: None,
            fallback: FallbackMode::FailClosed,
            clock: Arc::new(SystemClock),
            sink: telemetry::boxed(NullSink),
        }
    }

    /// Primary backend. Without one, a fresh [`LocalWindow`] is used.
    pub fn backend<B>(mut self, backend: B) -> Self
    where
        B: QuotaBackend + 'static,
    {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Primary backend already behind an `Arc`.
    pub fn shared_backend(mut self, backend: Arc<dyn QuotaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Behavior when the primary backend fails.
    pub fn fallback(mut self, mode: FallbackMode) -> Self {
        self.fallback = mode;
        self
    }

    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sink(mut self, sink: BoxedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> QuotaTracker {
        let backend = self.backend.unwrap_or_else(|| Arc::new(LocalWindow::new()));
        // A local primary cannot fail, so a local fallback would never be used.
        let fallback = match (self.fallback, backend.kind()) {
            (FallbackMode::Local, BackendKind::Networked) => Some(LocalWindow::new()),
            _ => None,
        };
        QuotaTracker { backend, fallback, clock: self.clock, sink: self.sink }
    }
}
