//! Framework-agnostic HTTP replies for guard outcomes.
//!
//! The hosting web framework copies `status`, `headers` and `body` into its own
//! response type.

use crate::quota::QuotaDecision;
use crate::GuardError;
use serde_json::{json, Value};

pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

impl Reply {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self { status: 200, headers: Vec::new(), body }
    }

    /// 429 carrying the remaining quota and reset time.
    pub fn throttled(decision: &QuotaDecision, message: &str) -> Self {
        Self {
            status: 429,
            headers: quota_headers(decision),
            body: json!({ "error": message }),
        }
    }

    /// Error body `{"error": ..., "details"?: ...}` with the mapped status.
    pub fn from_error(err: &GuardError) -> Self {
        if let GuardError::QuotaExceeded { decision, message } = err {
            return Self::throttled(decision, message);
        }

        let body = match err.public_details() {
            Some(details) => json!({ "error": err.public_message(), "details": details }),
            None => json!({ "error": err.public_message() }),
        };
        Self { status: err.status_code(), headers: Vec::new(), body }
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl From<GuardError> for Reply {
    fn from(err: GuardError) -> Self {
        Reply::from_error(&err)
    }
}

impl From<Result<Value, GuardError>> for Reply {
    fn from(result: Result<Value, GuardError>) -> Self {
        match result {
            Ok(body) => Reply::ok(body),
            Err(err) => Reply::from_error(&err),
        }
    }
}

fn quota_headers(decision: &QuotaDecision) -> Vec<(&'static str, String)> {
    // For a trailing window the window end is the decision instant.
    let wait_ms = decision.retry_after(decision.window_reset_at).as_millis();
    let retry_after_secs = wait_ms.div_ceil(1000);
    vec![
        (HEADER_REMAINING, decision.remaining.to_string()),
        (HEADER_RESET, decision.reset_at_rfc3339()),
        (HEADER_RETRY_AFTER, retry_after_secs.to_string()),
    ]
}
