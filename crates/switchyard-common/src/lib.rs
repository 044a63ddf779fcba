use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid engine config field {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Stable identifier of one inbound request, shared by every attempt it makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Time-ordered id (UUIDv7) so logs sort by arrival.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const DEFAULT_PER_CREDENTIAL_SLOTS: usize = 8;
const DEFAULT_MAX_WAITERS: usize = 1024;
const DEFAULT_RATE_LIMIT_COOLDOWN_MS: u64 = 30_000;
const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_BREAKER_WINDOW_MS: u64 = 60_000;
const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 10_000;
const DEFAULT_MAX_COOLDOWN_MS: u64 = 3_600_000;
/// Upper bound for `max_cooldown_ms`; keeps deadline arithmetic in range.
pub const COOLDOWN_LIMIT_MS: u64 = 30 * 24 * 3_600_000;
const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Slot limits applied by the concurrency governor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Slots per (provider, credential) unless the provider declares its own.
    pub per_credential_slots: usize,
    /// Optional cap across every provider.
    pub global_slots: Option<usize>,
    /// Callers allowed to queue on one slot pool before new arrivals are rejected.
    pub max_waiters: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            per_credential_slots: DEFAULT_PER_CREDENTIAL_SLOTS,
            global_slots: None,
            max_waiters: DEFAULT_MAX_WAITERS,
        }
    }
}

/// Cooldown and circuit-breaker settings for the credential pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Cooldown used when a rate-limited upstream gives no retry-after.
    pub rate_limit_cooldown_ms: u64,
    /// Consecutive transient failures that open the breaker.
    pub breaker_threshold: u32,
    /// Failures older than this no longer count towards the streak.
    pub breaker_window_ms: u64,
    pub breaker_cooldown_ms: u64,
    /// Longest cooldown any single report can impose, upstream retry-after included.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_max_cooldown_ms() -> u64 {
    DEFAULT_MAX_COOLDOWN_MS
}

impl PoolConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_millis(self.breaker_window_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms.min(COOLDOWN_LIMIT_MS))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown_ms: DEFAULT_RATE_LIMIT_COOLDOWN_MS,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_window_ms: DEFAULT_BREAKER_WINDOW_MS,
            breaker_cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            max_cooldown_ms: DEFAULT_MAX_COOLDOWN_MS,
        }
    }
}

/// Final, merged engine configuration used by the running dispatcher.
///
/// Merge order is decided by the loader; `EngineConfigPatch::overlay` lets the
/// later layer win field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Capacity of the broadcast channel behind the event hub.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            governor: GovernorConfig::default(),
            pool: PoolConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.per_credential_slots == 0 {
            return Err(invalid("governor.per_credential_slots", "must be > 0"));
        }
        if self.governor.global_slots == Some(0) {
            return Err(invalid("governor.global_slots", "must be > 0 when set"));
        }
        if self.pool.breaker_threshold == 0 {
            return Err(invalid("pool.breaker_threshold", "must be > 0"));
        }
        if self.pool.max_cooldown_ms == 0 || self.pool.max_cooldown_ms > COOLDOWN_LIMIT_MS {
            return Err(invalid("pool.max_cooldown_ms", "must be within (0, 30 days]"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

/// Optional layer used for merging engine config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfigPatch {
    pub per_credential_slots: Option<usize>,
    pub global_slots: Option<usize>,
    pub max_waiters: Option<usize>,
    pub rate_limit_cooldown_ms: Option<u64>,
    pub breaker_threshold: Option<u32>,
    pub breaker_window_ms: Option<u64>,
    pub breaker_cooldown_ms: Option<u64>,
    pub max_cooldown_ms: Option<u64>,
    pub event_buffer: Option<usize>,
}

impl EngineConfigPatch {
    pub fn overlay(&mut self, other: EngineConfigPatch) {
        if other.per_credential_slots.is_some() {
            self.per_credential_slots = other.per_credential_slots;
        }
        if other.global_slots.is_some() {
            self.global_slots = other.global_slots;
        }
        if other.max_waiters.is_some() {
            self.max_waiters = other.max_waiters;
        }
        if other.rate_limit_cooldown_ms.is_some() {
            self.rate_limit_cooldown_ms = other.rate_limit_cooldown_ms;
        }
        if other.breaker_threshold.is_some() {
            self.breaker_threshold = other.breaker_threshold;
        }
        if other.breaker_window_ms.is_some() {
            self.breaker_window_ms = other.breaker_window_ms;
        }
        if other.breaker_cooldown_ms.is_some() {
            self.breaker_cooldown_ms = other.breaker_cooldown_ms;
        }
        if other.max_cooldown_ms.is_some() {
            self.max_cooldown_ms = other.max_cooldown_ms;
        }
        if other.event_buffer.is_some() {
            self.event_buffer = other.event_buffer;
        }
    }

    pub fn into_config(self) -> Result<EngineConfig, ConfigError> {
        let governor = GovernorConfig {
            per_credential_slots: self
                .per_credential_slots
                .unwrap_or(DEFAULT_PER_CREDENTIAL_SLOTS),
            global_slots: self.global_slots,
            max_waiters: self.max_waiters.unwrap_or(DEFAULT_MAX_WAITERS),
        };
        let pool = PoolConfig {
            rate_limit_cooldown_ms: self
                .rate_limit_cooldown_ms
                .unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN_MS),
            breaker_threshold: self.breaker_threshold.unwrap_or(DEFAULT_BREAKER_THRESHOLD),
            breaker_window_ms: self.breaker_window_ms.unwrap_or(DEFAULT_BREAKER_WINDOW_MS),
            breaker_cooldown_ms: self
                .breaker_cooldown_ms
                .unwrap_or(DEFAULT_BREAKER_COOLDOWN_MS),
            max_cooldown_ms: self.max_cooldown_ms.unwrap_or(DEFAULT_MAX_COOLDOWN_MS),
        };
        let config = EngineConfig {
            governor,
            pool,
            event_buffer: self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER),
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<EngineConfig> for EngineConfigPatch {
    fn from(value: EngineConfig) -> Self {
        Self {
            per_credential_slots: Some(value.governor.per_credential_slots),
            global_slots: value.governor.global_slots,
            max_waiters: Some(value.governor.max_waiters),
            rate_limit_cooldown_ms: Some(value.pool.rate_limit_cooldown_ms),
            breaker_threshold: Some(value.pool.breaker_threshold),
            breaker_window_ms: Some(value.pool.breaker_window_ms),
            breaker_cooldown_ms: Some(value.pool.breaker_cooldown_ms),
            max_cooldown_ms: Some(value.pool.max_cooldown_ms),
            event_buffer: Some(value.event_buffer),
        }
    }
}
