use super::{PolicyQuota, QuotaDecision};
use crate::GuardError;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Errors produced by [`QuotaService`].
#[derive(Debug, thiserror::Error)]
pub enum QuotaServiceError<E> {
    /// The identity is over quota; the inner service was not called.
    #[error("{message}")]
    Throttled { decision: QuotaDecision, message: &'static str },
    /// The tracker could not decide (backend down, failing closed).
    #[error(transparent)]
    Guard(GuardError),
    /// The inner service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> QuotaServiceError<E> {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A layer that admits each request through a [`PolicyQuota`], keyed by the
/// identity `identify` extracts from the request.
pub struct QuotaLayer<F> {
    quota: PolicyQuota,
    identify: Arc<F>,
}

impl<F> Clone for QuotaLayer<F> {
    fn clone(&self) -> Self {
        Self { quota: self.quota.clone(), identify: self.identify.clone() }
    }
}

impl<F> fmt::Debug for QuotaLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLayer").field("quota", &self.quota).finish_non_exhaustive()
    }
}

impl<F> QuotaLayer<F> {
    pub fn new(quota: PolicyQuota, identify: F) -> Self {
        Self { quota, identify: Arc::new(identify) }
    }
}

impl<S, F> Layer<S> for QuotaLayer<F> {
    type Service = QuotaService<S, F>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService { inner: service, quota: self.quota.clone(), identify: self.identify.clone() }
    }
}

/// Middleware service produced by [`QuotaLayer`].
pub struct QuotaService<S, F> {
    inner: S,
    quota: PolicyQuota,
    identify: Arc<F>,
}

impl<S: Clone, F> Clone for QuotaService<S, F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), quota: self.quota.clone(), identify: self.identify.clone() }
    }
}

impl<S: fmt::Debug, F> fmt::Debug for QuotaService<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaService")
            .field("inner", &self.inner)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

impl<S, F, Req> Service<Req> for QuotaService<S, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = QuotaServiceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(QuotaServiceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let quota = self.quota.clone();
        let identity = (self.identify)(&req);
        // The clone is not necessarily ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision = quota.check(&identity).await.map_err(QuotaServiceError::Guard)?;
            if !decision.allowed {
                tracing::warn!(
                    policy = quota.policy().name(),
                    identity = %identity,
                    "request throttled"
                );
                return Err(QuotaServiceError::Throttled {
                    decision,
                    message: quota.policy().denial_message(),
                });
            }
            inner.call(req).await.map_err(QuotaServiceError::Inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quota::{Policy, QuotaTracker};
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    const POLICY: Policy = Policy::new("layer", Duration::from_secs(60), 1);

    #[tokio::test]
    async fn throttles_per_identity() {
        let quota = QuotaTracker::builder().clock(ManualClock::new(0)).build().for_policy(POLICY);
        let layer = QuotaLayer::new(quota, |req: &(&'static str, u32)| req.0.to_string());
        let svc = layer.layer(service_fn(|req: (&'static str, u32)| async move {
            Ok::<_, Infallible>(req.1 * 2)
        }));

        assert_eq!(svc.clone().oneshot(("alice", 2)).await.unwrap(), 4);
        let err = svc.clone().oneshot(("alice", 3)).await.unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(svc.oneshot(("bob", 5)).await.unwrap(), 10);
    }
}
