//! Quota check, then resilient webhook call: the sequence a relay endpoint
//! runs for every user message.

use crate::caller::{CallRequest, ResilientCaller};
use crate::config::WebhookConfig;
use crate::quota::PolicyQuota;
use crate::reply::Reply;
use crate::GuardError;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Header carrying the caller identity to the webhook.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Where one user's messages go.
#[derive(Clone)]
pub struct WebhookTarget {
    url: String,
    secret: Option<String>,
}

impl fmt::Debug for WebhookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookTarget")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl WebhookTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), secret: None }
    }

    /// Secret sent as a bearer token.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST request carrying `payload`, signed with the secret if any.
    pub fn request(&self, identity: &str, payload: Value) -> CallRequest {
        let mut request = CallRequest::post(self.url.clone()).json(payload);
        if let Ok(value) = HeaderValue::from_str(identity) {
            request = request.header(HeaderName::from_static(USER_ID_HEADER), value);
        }
        if let Some(secret) = &self.secret {
            request = request.bearer(secret);
        }
        request
    }
}

/// Admission control plus webhook invocation for one kind of operation.
#[derive(Debug, Clone)]
pub struct WebhookRelay {
    quota: PolicyQuota,
    caller: ResilientCaller,
    context: String,
    deadline: Duration,
    retry_on_gateway_error: bool,
}

impl WebhookRelay {
    /// Relay with a 30s deadline and gateway retry enabled.
    pub fn new(quota: PolicyQuota, caller: ResilientCaller, context: impl Into<String>) -> Self {
        let defaults = WebhookConfig::default();
        Self {
            quota,
            caller,
            context: context.into(),
            deadline: defaults.timeout(),
            retry_on_gateway_error: defaults.retry_on_gateway_error,
        }
    }

    /// Apply deadline, retry switch and retry pause from configuration.
    pub fn configured(mut self, config: &WebhookConfig) -> Self {
        self.deadline = config.timeout();
        self.retry_on_gateway_error = config.retry_on_gateway_error;
        self.caller = self.caller.with_retry_delay(config.retry_delay());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn retry_on_gateway_error(mut self, enabled: bool) -> Self {
        self.retry_on_gateway_error = enabled;
        self
    }

    /// Charge `identity` one operation and forward `payload` to `target`.
    ///
    /// # Errors
    /// [`GuardError::QuotaExceeded`] before any network traffic when over
    /// quota, [`GuardError::QuotaBackendUnavailable`] when the tracker fails
    /// closed, otherwise the remote outcome's error.
    pub async fn relay(
        &self,
        identity: &str,
        target: &WebhookTarget,
        payload: Value,
    ) -> Result<Value, GuardError> {
        self.quota.admit(identity).await?;

        let request = target
            .request(identity, payload)
            .deadline(self.deadline)
            .retry_on_gateway_error(self.retry_on_gateway_error)
            .context(self.context.clone());
        self.caller.call_json(&request).await
    }

    /// [`relay`](Self::relay) rendered as a [`Reply`].
    pub async fn respond(&self, identity: &str, target: &WebhookTarget, payload: Value) -> Reply {
        match self.relay(identity, target, payload).await {
            Ok(body) => Reply::ok(body),
            Err(err) => {
                if !err.is_quota_exceeded() {
                    tracing::warn!(context = %self.context, error = %err, "relay failed");
                }
                Reply::from_error(&err)
            }
        }
    }
}
