//! Process configuration, read once at startup.
//!
//! Loadable from environment variables with [`GuardConfig::from_env`], or
//! deserialized from whatever config document the host already uses.
//!
//! | Variable | Default |
//! |---|---|
//! | `RELAYGUARD_REDIS_URL` | unset (in-process quotas) |
//! | `RELAYGUARD_REDIS_PREFIX` | `relayguard:` |
//! | `RELAYGUARD_QUOTA_FALLBACK` | `fail-closed` |
//! | `RELAYGUARD_WEBHOOK_TIMEOUT_MS` | `30000` |
//! | `RELAYGUARD_WEBHOOK_RETRY_ON_GATEWAY` | `true` |
//! | `RELAYGUARD_WEBHOOK_RETRY_DELAY_MS` | `1000` |

use crate::quota::FallbackMode;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_REDIS_URL: &str = "RELAYGUARD_REDIS_URL";
pub const ENV_REDIS_PREFIX: &str = "RELAYGUARD_REDIS_PREFIX";
pub const ENV_QUOTA_FALLBACK: &str = "RELAYGUARD_QUOTA_FALLBACK";
pub const ENV_WEBHOOK_TIMEOUT_MS: &str = "RELAYGUARD_WEBHOOK_TIMEOUT_MS";
pub const ENV_WEBHOOK_RETRY_ON_GATEWAY: &str = "RELAYGUARD_WEBHOOK_RETRY_ON_GATEWAY";
pub const ENV_WEBHOOK_RETRY_DELAY_MS: &str = "RELAYGUARD_WEBHOOK_RETRY_DELAY_MS";

const DEFAULT_KEY_PREFIX: &str = "relayguard:";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// A configuration value could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value `{value}` for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub quota: QuotaConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Shared store URL (`redis://` or `rediss://`). `None` means every
    /// process enforces its own limits.
    pub shared_store_url: Option<String>,
    pub key_prefix: String,
    pub on_backend_error: FallbackMode,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            shared_store_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            on_backend_error: FallbackMode::FailClosed,
        }
    }
}

impl QuotaConfig {
    /// The shared store URL if it is usable; placeholders and non-Redis
    /// schemes count as "not configured".
    pub fn usable_store_url(&self) -> Option<&str> {
        let url = self.shared_store_url.as_deref()?.trim();
        let scheme_ok = url.starts_with("redis://") || url.starts_with("rediss://");
        if !scheme_ok || url.contains("your-redis") {
            tracing::warn!("ignoring shared quota store URL: not a redis:// URL or still a placeholder");
            return None;
        }
        Some(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub timeout_ms: u64,
    pub retry_on_gateway_error: bool,
    pub retry_delay_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_on_gateway_error: true,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl GuardConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`, which returns the raw value of a variable.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = GuardConfig::default();

        config.quota.shared_store_url = get(ENV_REDIS_URL);
        if let Some(prefix) = get(ENV_REDIS_PREFIX) {
            config.quota.key_prefix = prefix;
        }
        if let Some(raw) = get(ENV_QUOTA_FALLBACK) {
            config.quota.on_backend_error = raw
                .parse::<FallbackMode>()
                .map_err(|reason| ConfigError { key: ENV_QUOTA_FALLBACK, value: raw, reason })?;
        }
        if let Some(raw) = get(ENV_WEBHOOK_TIMEOUT_MS) {
            config.webhook.timeout_ms = parse_millis(ENV_WEBHOOK_TIMEOUT_MS, raw)?;
        }
        if let Some(raw) = get(ENV_WEBHOOK_RETRY_ON_GATEWAY) {
            config.webhook.retry_on_gateway_error = parse_bool(ENV_WEBHOOK_RETRY_ON_GATEWAY, raw)?;
        }
        if let Some(raw) = get(ENV_WEBHOOK_RETRY_DELAY_MS) {
            config.webhook.retry_delay_ms = parse_millis(ENV_WEBHOOK_RETRY_DELAY_MS, raw)?;
        }

        if config.webhook.timeout_ms == 0 {
            return Err(ConfigError {
                key: ENV_WEBHOOK_TIMEOUT_MS,
                value: "0".into(),
                reason: "timeout must be non-zero".into(),
            });
        }
        Ok(config)
    }
}

fn parse_millis(key: &'static str, raw: String) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError { key, value: raw.clone(), reason: e.to_string() })
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError { key, value: raw, reason: "expected a boolean".into() }),
    }
}
