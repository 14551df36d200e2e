#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # relayguard
//!
//! Outbound call resilience and per-identity quota tracking for services that
//! relay user messages to a user-configured webhook.
//!
//! ## Features
//!
//! - **Sliding window quotas** per `(identity, policy)` with interchangeable
//!   backends: in-process ([`LocalWindow`]) or networked (`relayguard-redis`)
//! - **Explicit fallback**: a failing shared store either fails closed or
//!   degrades to per-process limits, loudly
//! - **Resilient remote call** with a hard per-attempt deadline and a single
//!   retry reserved for 502/504
//! - **Typed outcomes** mapped onto HTTP replies with rate-limit headers
//! - **Telemetry** as tower services, plus `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relayguard::{Policy, QuotaTracker, ResilientCaller, WebhookRelay, WebhookTarget};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relayguard::GuardError> {
//!     let quotas = QuotaTracker::local();
//!     let caller = ResilientCaller::builder().build()?;
//!     let chat = WebhookRelay::new(quotas.for_policy(Policy::CHAT), caller, "Chat service");
//!
//!     let target = WebhookTarget::new("https://hooks.example.com/chat").with_secret("s3cret");
//!     let reply = chat.respond("user-42", &target, json!({ "message": "hello" })).await;
//!     println!("{} {}", reply.status, reply.body);
//!     Ok(())
//! }
//! ```

pub mod caller;
pub mod clock;
pub mod config;
pub mod deadline;
pub mod error;
pub mod prelude;
pub mod quota;
pub mod relay;
pub mod reply;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use caller::{CallRequest, Outcome, OutcomeKind, ResilientCaller, ResilientCallerBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GuardConfig, QuotaConfig, WebhookConfig};
pub use deadline::{Deadline, DeadlineElapsed};
pub use error::GuardError;
pub use quota::{
    BackendError, BackendKind, FallbackMode, LocalWindow, Policy, PolicyQuota, QuotaBackend,
    QuotaDecision, QuotaLayer, QuotaTracker,
};
pub use relay::{WebhookRelay, WebhookTarget};
pub use reply::Reply;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
