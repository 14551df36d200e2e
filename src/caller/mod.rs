//! Resilient remote call.
//!
//! Semantics:
//! - Every attempt runs under the request's deadline; a fired deadline is
//!   [`Outcome::Timeout`] and is never retried.
//! - A 502 or 504 earns exactly one more attempt, after a fixed pause, when
//!   the request allows it. The retry's result is final.
//! - Any other non-2xx is [`Outcome::RemoteRejected`], not retried.
//! - A 2xx must carry JSON; otherwise it is [`Outcome::ServiceUnavailable`].
//! - Transport failures (DNS, refused, TLS, reset) are
//!   [`Outcome::ServiceUnavailable`], not retried.
//!
//! Invariants:
//! - At most two requests reach the remote per logical call.
//! - No transport error escapes; every path ends in an [`Outcome`].
//!
//! Limitation: if the remote ran its business logic before a gateway in front
//! of it answered 502/504, the retry runs it again. Only enable the retry for
//! endpoints that tolerate a duplicate.

use crate::config::WebhookConfig;
use crate::deadline::Deadline;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{self, BoxedSink, CallEvent, GuardEvent, NullSink};
use crate::GuardError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod outcome;
pub mod request;

pub use outcome::{Outcome, OutcomeKind};
pub use request::{CallAttempt, CallRequest, DEFAULT_DEADLINE};

use outcome::{classify, Classified};

/// Pause before the single gateway retry.
pub const GATEWAY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Executes [`CallRequest`]s. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ResilientCaller {
    client: reqwest::Client,
    retry_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
    sink: BoxedSink,
}

impl fmt::Debug for ResilientCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("retry_delay", &self.retry_delay)
            .field("sleeper", &self.sleeper)
            .field("sink", &"<sink>")
            .finish_non_exhaustive()
    }
}

impl ResilientCaller {
    pub fn builder() -> ResilientCallerBuilder {
        ResilientCallerBuilder::new()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Same caller with a different pause before the gateway retry. The
    /// connection pool is shared with `self`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Perform the call and classify the result.
    pub async fn call(&self, request: &CallRequest) -> Outcome {
        let started = Instant::now();
        let first = CallAttempt::first(request);
        let mut attempts: u8 = 1;

        let outcome = match self.attempt(first).await {
            Classified::Gateway { status, .. } if first.may_retry() => {
                tracing::warn!(
                    context = %request.context,
                    status,
                    delay = ?self.retry_delay,
                    "gateway error, retrying once"
                );
                telemetry::emit_best_effort(
                    self.sink.clone(),
                    GuardEvent::Call(CallEvent::Retrying {
                        context: request.context.clone(),
                        status,
                        delay: self.retry_delay,
                    }),
                )
                .await;
                self.sleeper.sleep(self.retry_delay).await;
                attempts += 1;
                self.attempt(CallAttempt::retry(request)).await.settle()
            }
            classified => classified.settle(),
        };

        let duration = started.elapsed();
        tracing::debug!(
            context = %request.context,
            outcome = %outcome.kind(),
            attempts,
            ?duration,
            "remote call finished"
        );
        telemetry::emit_best_effort(
            self.sink.clone(),
            GuardEvent::Call(CallEvent::Completed {
                context: request.context.clone(),
                outcome: outcome.kind(),
                attempts,
                duration,
            }),
        )
        .await;
        outcome
    }

    /// [`call`](Self::call) mapped onto [`GuardError`], with the request's
    /// context label in messages.
    pub async fn call_json(&self, request: &CallRequest) -> Result<serde_json::Value, GuardError> {
        self.call(request).await.into_result(&request.context)
    }

    async fn attempt(&self, attempt: CallAttempt<'_>) -> Classified {
        let request = attempt.request;
        let deadline = Deadline::new(request.deadline);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        // Reading the body is part of the exchange, so it shares the deadline.
        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match deadline.run(exchange).await {
            Ok(Ok((status, body))) => classify(status, &body),
            Ok(Err(err)) if err.is_timeout() => Classified::Final(Outcome::Timeout {
                elapsed: deadline.limit(),
                limit: deadline.limit(),
            }),
            Ok(Err(err)) => {
                tracing::debug!(
                    context = %request.context,
                    retry = attempt.is_retry,
                    error = %err,
                    "transport failure"
                );
                Classified::Final(Outcome::ServiceUnavailable { cause: err.to_string() })
            }
            Err(elapsed) => Classified::Final(Outcome::Timeout {
                elapsed: elapsed.elapsed,
                limit: elapsed.limit,
            }),
        }
    }
}

/// Builder for [`ResilientCaller`].
pub struct ResilientCallerBuilder {
    client: Option<reqwest::Client>,
    retry_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
    sink: BoxedSink,
}

impl Default for ResilientCallerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilientCallerBuilder {
    /// Defaults: fresh client, 1s retry pause, tokio sleeper, no telemetry.
    pub fn new() -> Self {
        Self {
            client: None,
            retry_delay: GATEWAY_RETRY_DELAY,
            sleeper: Arc::new(TokioSleeper),
            sink: telemetry::boxed(NullSink),
        }
    }

    /// Reuse an existing client (and its pool).
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply the retry pause from configuration.
    pub fn configured(self, config: &WebhookConfig) -> Self {
        self.retry_delay(config.retry_delay())
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn sink(mut self, sink: BoxedSink) -> Self {
        self.sink = sink;
        self
    }

    /// # Errors
    /// [`GuardError::HttpClient`] if no client was supplied and the default one
    /// cannot be constructed (e.g. TLS backend initialisation failed).
    pub fn build(self) -> Result<ResilientCaller, GuardError> {
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder().build().map_err(GuardError::HttpClient)?,
        };
        Ok(ResilientCaller {
            client,
            retry_delay: self.retry_delay,
            sleeper: self.sleeper,
            sink: self.sink,
        })
    }
}
