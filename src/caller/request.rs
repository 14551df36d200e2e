use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use std::time::Duration;

/// Default per-attempt deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// One logical remote call: where, what, and how patiently.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub(crate) url: String,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) deadline: Duration,
    pub(crate) retry_on_gateway_error: bool,
    pub(crate) context: String,
}

impl CallRequest {
    /// A request with a 30s deadline, gateway retry enabled and the context
    /// label `"webhook"`.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            deadline: DEFAULT_DEADLINE,
            retry_on_gateway_error: true,
            context: "webhook".to_string(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Send `body` as JSON.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add `Authorization: Bearer <token>`. A token that is not a valid header
    /// value is skipped with a warning rather than sent mangled.
    pub fn bearer(mut self, token: &str) -> Self {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!(context = %self.context, "bearer token is not a valid header value");
            }
        }
        self
    }

    /// Per-attempt deadline. Panics if zero or `Duration::MAX`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        assert!(
            deadline > Duration::ZERO && deadline < Duration::MAX,
            "deadline must be non-zero and finite",
        );
        self.deadline = deadline;
        self
    }

    /// Allow one retry after a 502/504.
    pub fn retry_on_gateway_error(mut self, enabled: bool) -> Self {
        self.retry_on_gateway_error = enabled;
        self
    }

    /// Human label used in error messages, e.g. `"Chat service"`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn deadline_duration(&self) -> Duration {
        self.deadline
    }

    pub fn retries_gateway_errors(&self) -> bool {
        self.retry_on_gateway_error
    }

    pub fn context_label(&self) -> &str {
        &self.context
    }
}

/// One try of a [`CallRequest`]. Retries are never themselves retried.
#[derive(Debug, Clone, Copy)]
pub struct CallAttempt<'a> {
    pub request: &'a CallRequest,
    pub is_retry: bool,
}

impl<'a> CallAttempt<'a> {
    pub fn first(request: &'a CallRequest) -> Self {
        Self { request, is_retry: false }
    }

    pub fn retry(request: &'a CallRequest) -> Self {
        Self { request, is_retry: true }
    }

    /// Whether a gateway error on this attempt earns another one.
    pub fn may_retry(&self) -> bool {
        self.request.retry_on_gateway_error && !self.is_retry
    }
}
