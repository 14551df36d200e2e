use crate::GuardError;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Final result of one logical call, after any retry has resolved.
///
/// A 502/504 is classified as a transient gateway error only while a retry is
/// still available; once spent (or disabled) it is reported as
/// [`Outcome::RemoteRejected`] like any other non-2xx status.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx with a JSON body.
    Success(Value),
    /// Non-2xx. `details` is the parsed error body, or `{"message": reason}`.
    RemoteRejected { status: u16, details: Value },
    /// The deadline fired before the exchange completed.
    Timeout { elapsed: Duration, limit: Duration },
    /// Transport failure, or a 2xx whose body was not valid JSON.
    ServiceUnavailable { cause: String },
}

/// Payload-free tag of an [`Outcome`], for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    RemoteRejected,
    Timeout,
    ServiceUnavailable,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::RemoteRejected => "remote_rejected",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::ServiceUnavailable => "service_unavailable",
        };
        f.write_str(label)
    }
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::RemoteRejected { .. } => OutcomeKind::RemoteRejected,
            Outcome::Timeout { .. } => OutcomeKind::Timeout,
            Outcome::ServiceUnavailable { .. } => OutcomeKind::ServiceUnavailable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Status code of a rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert to the error taxonomy, labelling messages with `context`.
    pub fn into_result(self, context: &str) -> Result<Value, GuardError> {
        match self {
            Outcome::Success(body) => Ok(body),
            Outcome::RemoteRejected { status, details } => {
                let message = details
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| reason_phrase(status));
                Err(GuardError::RemoteRejected {
                    context: context.to_string(),
                    status,
                    message,
                    details,
                })
            }
            Outcome::Timeout { limit, .. } => {
                Err(GuardError::RemoteTimeout { context: context.to_string(), limit })
            }
            Outcome::ServiceUnavailable { cause } => {
                Err(GuardError::RemoteUnavailable { context: context.to_string(), cause })
            }
        }
    }
}

/// Per-attempt classification; the retry decision is made on top of it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Classified {
    Final(Outcome),
    /// 502 or 504: eligible for the single retry.
    Gateway { status: u16, details: Value },
}

impl Classified {
    /// Resolve without retrying.
    pub(crate) fn settle(self) -> Outcome {
        match self {
            Classified::Final(outcome) => outcome,
            Classified::Gateway { status, details } => Outcome::RemoteRejected { status, details },
        }
    }
}

pub(crate) fn is_gateway_error(status: StatusCode) -> bool {
    status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT
}

/// Classify a complete response.
pub(crate) fn classify(status: StatusCode, body: &[u8]) -> Classified {
    if status.is_success() {
        return Classified::Final(match serde_json::from_slice::<Value>(body) {
            Ok(value) => Outcome::Success(value),
            Err(err) => {
                Outcome::ServiceUnavailable { cause: format!("malformed success response: {err}") }
            }
        });
    }

    let details = serde_json::from_slice::<Value>(body)
        .unwrap_or_else(|_| json!({ "message": reason_phrase(status.as_u16()) }));

    if is_gateway_error(status) {
        Classified::Gateway { status: status.as_u16(), details }
    } else {
        Classified::Final(Outcome::RemoteRejected { status: status.as_u16(), details })
    }
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_is_parsed() {
        let classified = classify(StatusCode::OK, br#"{"reply":"hi"}"#);
        assert_eq!(classified, Classified::Final(Outcome::Success(json!({ "reply": "hi" }))));
    }

    #[test]
    fn malformed_success_is_unavailable() {
        let outcome = classify(StatusCode::OK, b"<html>").settle();
        assert_eq!(outcome.kind(), OutcomeKind::ServiceUnavailable);
    }

    #[test]
    fn gateway_statuses_are_retry_candidates() {
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, b""),
            Classified::Gateway { status: 502, .. }
        ));
        assert!(matches!(
            classify(StatusCode::GATEWAY_TIMEOUT, b""),
            Classified::Gateway { status: 504, .. }
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, b""),
            Classified::Final(Outcome::RemoteRejected { status: 503, .. })
        ));
    }

    #[test]
    fn non_json_error_body_falls_back_to_reason() {
        let outcome = classify(StatusCode::BAD_REQUEST, b"nope").settle();
        assert_eq!(
            outcome,
            Outcome::RemoteRejected { status: 400, details: json!({ "message": "Bad Request" }) }
        );
    }

    #[test]
    fn rejection_message_prefers_remote_message() {
        let outcome = Outcome::RemoteRejected {
            status: 422,
            details: json!({ "message": "conversation closed" }),
        };
        let err = outcome.into_result("Chat service").unwrap_err();
        assert_eq!(err.to_string(), "Chat service failed: conversation closed");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn timeout_maps_to_remote_timeout() {
        let err = Outcome::Timeout {
            elapsed: Duration::from_millis(101),
            limit: Duration::from_millis(100),
        }
        .into_result("Chat service")
        .unwrap_err();
        assert_eq!(err.to_string(), "Chat service request timed out after 100ms");
    }
}
