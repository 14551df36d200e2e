//! Error taxonomy for the guard layer.
//!
//! Every failure either component can produce is one of these variants; no raw
//! transport error reaches the request handler. [`GuardError::status_code`]
//! and [`GuardError::public_message`] give the HTTP mapping.

use crate::quota::{BackendError, QuotaDecision};
use serde_json::Value;
use std::time::Duration;

/// Generic text shown for timeouts and unavailability, so internal detail
/// never reaches end users.
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Over quota. Not a fault, surfaced as 429.
    #[error("{message}")]
    QuotaExceeded { decision: QuotaDecision, message: String },

    /// The shared quota store failed and no fallback is configured.
    #[error("quota backend unavailable: {0}")]
    QuotaBackendUnavailable(#[source] BackendError),

    /// The remote did not answer within the deadline.
    #[error("{context} request timed out after {}ms", .limit.as_millis())]
    RemoteTimeout { context: String, limit: Duration },

    /// The remote answered with a non-2xx status.
    #[error("{context} failed: {message}")]
    RemoteRejected { context: String, status: u16, message: String, details: Value },

    /// Transport failure or an unparseable success body.
    #[error("{context} service unavailable")]
    RemoteUnavailable { context: String, cause: String },

    /// The HTTP client could not be built.
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl GuardError {
    /// HTTP status the request handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::QuotaExceeded { .. } => 429,
            GuardError::QuotaBackendUnavailable(_) => 503,
            GuardError::RemoteTimeout { .. } => 408,
            GuardError::RemoteRejected { status, .. } => *status,
            GuardError::RemoteUnavailable { .. } => 503,
            GuardError::HttpClient(_) => 500,
        }
    }

    /// Text that is safe to show the end user.
    pub fn public_message(&self) -> String {
        match self {
            GuardError::QuotaExceeded { message, .. } => message.clone(),
            GuardError::RemoteRejected { .. } => self.to_string(),
            GuardError::QuotaBackendUnavailable(_)
            | GuardError::RemoteTimeout { .. }
            | GuardError::RemoteUnavailable { .. } => UNAVAILABLE_MESSAGE.to_string(),
            GuardError::HttpClient(_) => "Internal server error".to_string(),
        }
    }

    /// Remote-supplied detail worth forwarding, if any.
    pub fn public_details(&self) -> Option<&Value> {
        match self {
            GuardError::RemoteRejected { details, .. } => Some(details),
            _ => None,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, GuardError::QuotaExceeded { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::RemoteTimeout { .. })
    }

    /// Quota metadata for throttled responses.
    pub fn quota_decision(&self) -> Option<&QuotaDecision> {
        match self {
            GuardError::QuotaExceeded { decision, .. } => Some(decision),
            _ => None,
        }
    }
}
