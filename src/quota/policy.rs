use std::fmt;
use std::time::Duration;

const DEFAULT_DENIAL_MESSAGE: &str = "Too many requests. Please try again later.";

/// A named sliding-window quota: at most `max_requests` admissions in any
/// trailing `window`.
///
/// Policies are process-wide constants. The name is part of the storage key,
/// so two policies with the same name share counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    name: &'static str,
    window: Duration,
    max_requests: u32,
    denial_message: &'static str,
}

impl Policy {
    /// Chat messaging: 30 messages per 5 minutes.
    pub const CHAT: Policy = Policy::new("chat", Duration::from_secs(5 * 60), 30)
        .with_denial_message("Too many messages. Please try again later.");

    /// Profile updates: 10 per minute.
    pub const PROFILE_UPDATE: Policy = Policy::new("profile_update", Duration::from_secs(60), 10)
        .with_denial_message("Too many profile updates. Please try again later.");

    /// Generic API access: 100 per hour.
    pub const API: Policy = Policy::new("api", Duration::from_secs(60 * 60), 100);

    /// Analytics queries: 60 per hour.
    pub const ANALYTICS: Policy = Policy::new("analytics", Duration::from_secs(60 * 60), 60);

    /// Define a policy. Panics if the window is shorter than a millisecond or
    /// `max_requests` is zero.
    pub const fn new(name: &'static str, window: Duration, max_requests: u32) -> Self {
        assert!(window.as_millis() > 0, "policy window must be at least 1ms");
        assert!(max_requests > 0, "policy must admit at least one request");
        Self { name, window, max_requests, denial_message: DEFAULT_DENIAL_MESSAGE }
    }

    /// Replace the message shown to throttled callers.
    pub const fn with_denial_message(mut self, message: &'static str) -> Self {
        self.denial_message = message;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole milliseconds, the unit timestamps are kept in.
    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn denial_message(&self) -> &'static str {
        self.denial_message
    }

    /// Storage key for one identity under this policy.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}:{}", self.name, identity)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} per {:?})", self.name, self.max_requests, self.window)
    }
}
