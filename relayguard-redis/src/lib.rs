//! Redis sliding window backend for `relayguard` (companion crate).
//!
//! Every process pointing at the same Redis shares one quota per
//! `(identity, policy)`. Each key is a sorted set of admission timestamps; the
//! prune, count and append run inside one Lua script, so concurrent callers
//! across processes cannot both take the last slot.
//!
//! The caller's clock is trusted: timestamps come from the process issuing the
//! check, so hosts should keep their clocks synchronised.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use relayguard::quota::QuotaTrackerBuilder;
use relayguard::{
    BackendError, BackendKind, FallbackMode, GuardError, Policy, QuotaBackend, QuotaConfig,
    QuotaDecision, QuotaTracker,
};
use std::fmt;
use std::time::Duration;

const BACKEND: &str = "redis";

// KEYS[1] = log key
// ARGV = now_millis, window_millis, max_requests, member
// Returns {allowed, count_after, oldest_score}.
const CHECK_AND_RECORD: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count >= limit then
  local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
  local oldest_score = now
  if oldest[2] then
    oldest_score = tonumber(oldest[2])
  end
  return {0, count, oldest_score}
end

redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
return {1, count + 1, now}
";

/// Connection settings for [`RedisWindow`].
#[derive(Debug, Clone)]
pub struct RedisWindowConfig {
    /// Prepended to every quota key (default: `"relayguard:"`).
    pub key_prefix: String,
    /// Bound on establishing the initial connection.
    pub connect_timeout: Duration,
    /// Bound on a single check; a slow store counts as a failed one.
    pub response_timeout: Duration,
}

impl Default for RedisWindowConfig {
    fn default() -> Self {
        Self {
            key_prefix: "relayguard:".to_string(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(500),
        }
    }
}

/// Networked quota backend over Redis sorted sets.
#[derive(Clone)]
pub struct RedisWindow {
    connection: ConnectionManager,
    config: RedisWindowConfig,
    script: Script,
}

impl fmt::Debug for RedisWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindow")
            .field("config", &self.config)
            .field("connection", &"<redis::aio::ConnectionManager>")
            .finish_non_exhaustive()
    }
}

impl RedisWindow {
    /// Connect with the default configuration.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or Redis cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        Self::connect_with_config(url, RedisWindowConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid, or Redis cannot be reached within
    /// `connect_timeout`.
    pub async fn connect_with_config(
        url: &str,
        config: RedisWindowConfig,
    ) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(backend_error)?;
        let connection = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|elapsed| BackendError::new(BACKEND, elapsed))?
            .map_err(backend_error)?;

        tracing::debug!(prefix = %config.key_prefix, "connected to redis quota store");
        Ok(Self { connection, config, script: Script::new(CHECK_AND_RECORD) })
    }

    pub fn config(&self) -> &RedisWindowConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl QuotaBackend for RedisWindow {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<QuotaDecision, BackendError> {
        let mut conn = self.connection.clone();
        let window = policy.window_millis();
        let limit = policy.max_requests();
        // Unique member so two admissions in the same millisecond both count.
        let member = format!("{}-{}", now_millis, uuid::Uuid::new_v4());

        let invocation = async {
            let reply: (i64, i64, i64) = self
                .script
                .key(self.key(key))
                .arg(now_millis)
                .arg(window)
                .arg(limit)
                .arg(member)
                .invoke_async(&mut conn)
                .await?;
            Ok::<_, RedisError>(reply)
        };
        let (allowed, count, oldest) =
            tokio::time::timeout(self.config.response_timeout, invocation)
                .await
                .map_err(|elapsed| BackendError::new(BACKEND, elapsed))?
                .map_err(backend_error)?;

        // For a trailing window, window_start + window is the call instant.
        let window_reset_at = now_millis;
        if allowed == 1 {
            let used = u32::try_from(count).unwrap_or(limit);
            Ok(QuotaDecision::admitted(limit, limit.saturating_sub(used), window_reset_at, now_millis))
        } else {
            let oldest = u64::try_from(oldest).unwrap_or(now_millis);
            Ok(QuotaDecision::denied(limit, window_reset_at, oldest.saturating_add(window)))
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }
}

fn backend_error(err: RedisError) -> BackendError {
    BackendError::new(BACKEND, err)
}

/// Build a tracker from configuration.
///
/// - No usable store URL: in-process quotas, with a warning, since limits are
///   then per process.
/// - Store reachable: Redis-backed tracker honouring `on_backend_error`.
/// - Store unreachable at startup: a local tracker under
///   [`FallbackMode::Local`], otherwise an error.
///
/// `builder` carries the clock and sink; its backend and fallback settings are
/// replaced.
///
/// # Errors
/// [`GuardError::QuotaBackendUnavailable`] when the store cannot be reached and
/// the configuration fails closed.
pub async fn tracker_from_config(
    config: &QuotaConfig,
    builder: QuotaTrackerBuilder,
) -> Result<QuotaTracker, GuardError> {
    let Some(url) = config.usable_store_url() else {
        tracing::warn!("no shared quota store configured; limits are enforced per process");
        return Ok(builder.build());
    };

    let window_config =
        RedisWindowConfig { key_prefix: config.key_prefix.clone(), ..RedisWindowConfig::default() };
    match RedisWindow::connect_with_config(url, window_config).await {
        Ok(window) => Ok(builder.backend(window).fallback(config.on_backend_error).build()),
        Err(err) => match config.on_backend_error {
            FallbackMode::Local => {
                tracing::warn!(error = %err, "redis quota store unreachable; limits are enforced per process");
                Ok(builder.build())
            }
            FallbackMode::FailClosed => {
                tracing::error!(error = %err, "redis quota store unreachable");
                Err(GuardError::QuotaBackendUnavailable(err))
            }
        },
    }
}
