//! Structured events emitted by the quota tracker and the resilient caller.
//!
//! Events flow into sinks, which are plain `tower::Service<GuardEvent>`
//! implementations so they can be composed with standard tower combinators.
//! Delivery is best effort: a sink that is not ready or fails simply loses the
//! event, the guarded operation is never affected.
//!
//! ```rust
//! use relayguard::telemetry::{GuardEvent, MemorySink, QuotaEvent};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(GuardEvent::Quota(QuotaEvent::Degraded {
//!     policy: "chat",
//!     reason: "connection refused".into(),
//! }))
//! .await
//! .unwrap();
//! assert_eq!(sink.events().len(), 1);
//! # }
//! ```

use crate::caller::OutcomeKind;
use crate::quota::BackendKind;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::Service;

/// Type-erased sink stored inside trackers and callers.
pub type BoxedSink = BoxCloneSyncService<GuardEvent, (), Infallible>;

/// Erase a concrete sink.
pub fn boxed<S>(sink: S) -> BoxedSink
where
    S: Service<GuardEvent, Response = (), Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(sink)
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: GuardEvent)
where
    S: Service<GuardEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Every event either component can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardEvent {
    Quota(QuotaEvent),
    Call(CallEvent),
}

/// Quota tracker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// An operation was admitted and recorded.
    Admitted { policy: &'static str, remaining: u32, backend: BackendKind },
    /// An operation was over quota.
    Denied { policy: &'static str, retry_after: Duration },
    /// The networked backend failed and the local fallback answered instead.
    /// Limits are now per process, not per deployment.
    Degraded { policy: &'static str, reason: String },
    /// The networked backend failed and no fallback is configured.
    BackendFailed { policy: &'static str, reason: String },
}

/// Resilient caller events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// A gateway error was received; one more attempt follows after `delay`.
    Retrying { context: String, status: u16, delay: Duration },
    /// A logical call finished.
    Completed { context: String, outcome: OutcomeKind, attempts: u8, duration: Duration },
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::Quota(QuotaEvent::Admitted { policy, remaining, backend }) => {
                write!(f, "Quota::Admitted(policy={policy}, remaining={remaining}, backend={backend})")
            }
            GuardEvent::Quota(QuotaEvent::Denied { policy, retry_after }) => {
                write!(f, "Quota::Denied(policy={policy}, retry_after={retry_after:?})")
            }
            GuardEvent::Quota(QuotaEvent::Degraded { policy, reason }) => {
                write!(f, "Quota::Degraded(policy={policy}, reason={reason})")
            }
            GuardEvent::Quota(QuotaEvent::BackendFailed { policy, reason }) => {
                write!(f, "Quota::BackendFailed(policy={policy}, reason={reason})")
            }
            GuardEvent::Call(CallEvent::Retrying { context, status, delay }) => {
                write!(f, "Call::Retrying(context={context}, status={status}, delay={delay:?})")
            }
            GuardEvent::Call(CallEvent::Completed { context, outcome, attempts, duration }) => {
                write!(
                    f,
                    "Call::Completed(context={context}, outcome={outcome}, attempts={attempts}, duration={duration:?})"
                )
            }
        }
    }
}

type SinkFuture = BoxFuture<'static, Result<(), Infallible>>;

/// Discards everything.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GuardEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GuardEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

/// Logs events through `tracing`. Degradation and backend failures go out at
/// WARN, everything else at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GuardEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        match &event {
            GuardEvent::Quota(QuotaEvent::Degraded { .. })
            | GuardEvent::Quota(QuotaEvent::BackendFailed { .. }) => {
                tracing::warn!(event = %event, "guard_event");
            }
            _ => tracing::info!(event = %event, "guard_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

/// Keeps events in memory, for tests and debugging. Bounded; the oldest
/// events are dropped first.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GuardEvent>>>,
    capacity: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())), capacity: capacity.max(1) }
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<GuardEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, event: GuardEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(event);
    }
}

impl Service<GuardEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        self.push(event);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        for remaining in 0..3 {
            emit_best_effort(
                sink.clone(),
                GuardEvent::Quota(QuotaEvent::Admitted {
                    policy: "chat",
                    remaining,
                    backend: BackendKind::Local,
                }),
            )
            .await;
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            GuardEvent::Quota(QuotaEvent::Admitted { remaining: 1, .. })
        ));
    }

    #[tokio::test]
    async fn boxed_sink_forwards_to_inner() {
        let memory = MemorySink::new();
        let sink = boxed(memory.clone());
        emit_best_effort(
            sink,
            GuardEvent::Quota(QuotaEvent::Denied { policy: "api", retry_after: Duration::ZERO }),
        )
        .await;
        assert_eq!(memory.events().len(), 1);
    }

    #[test]
    fn display_is_compact() {
        let event = GuardEvent::Call(CallEvent::Retrying {
            context: "Chat service".into(),
            status: 502,
            delay: Duration::from_secs(1),
        });
        assert_eq!(
            event.to_string(),
            "Call::Retrying(context=Chat service, status=502, delay=1s)"
        );
    }
}
