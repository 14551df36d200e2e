//! Convenient re-exports for request handlers.
pub use crate::{
    caller::{CallRequest, Outcome, ResilientCaller},
    quota::{FallbackMode, Policy, PolicyQuota, QuotaDecision, QuotaTracker},
    relay::{WebhookRelay, WebhookTarget},
    reply::Reply,
    GuardConfig, GuardError,
};
