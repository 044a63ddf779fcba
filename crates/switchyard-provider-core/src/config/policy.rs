use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_common::ConfigError;

use crate::errors::ErrorKind;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 200;
const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
const DEFAULT_JITTER_RATIO: f64 = 0.5;
const DEFAULT_SLOT_TIMEOUT_MS: u64 = 30_000;
/// Largest accepted timeout or delay; keeps deadline arithmetic in range.
pub const MAX_TIMEOUT_MS: u64 = 30 * 24 * 3_600_000;

/// A (provider, model) pair considered for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl From<Candidate> for WeightedCandidate {
    fn from(candidate: Candidate) -> Self {
        Self {
            candidate,
            weight: default_weight(),
        }
    }
}

/// How fallbacks after the primary are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrdering {
    #[default]
    Declared,
    /// Stable sort by descending provider weight.
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per candidate, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter is drawn from `[0, jitter_ratio * base_delay)`; kept below 1.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorKind>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_jitter_ratio() -> f64 {
    DEFAULT_JITTER_RATIO
}

fn default_retryable() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Transient,
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::Backpressure,
    ]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be > 0"));
        }
        if self.max_delay_ms > MAX_TIMEOUT_MS {
            return Err(invalid("retry.max_delay_ms", "must not exceed 30 days"));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(invalid("retry.jitter_ratio", "must be within [0, 1)"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub candidates: Vec<WeightedCandidate>,
    #[serde(default)]
    pub ordering: CandidateOrdering,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// How long one attempt may wait for a concurrency slot.
    #[serde(default = "default_slot_timeout_ms")]
    pub slot_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
    /// Deadline for the whole request, backoff included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

fn default_slot_timeout_ms() -> u64 {
    DEFAULT_SLOT_TIMEOUT_MS
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            ordering: CandidateOrdering::default(),
            retry: RetryPolicy::default(),
            slot_timeout_ms: DEFAULT_SLOT_TIMEOUT_MS,
            attempt_timeout_ms: None,
            request_timeout_ms: None,
        }
    }
}

impl RoutingPolicy {
    pub fn new(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        Self {
            candidates: candidates.into_iter().map(WeightedCandidate::from).collect(),
            ..Default::default()
        }
    }

    pub fn weighted(candidates: impl IntoIterator<Item = (Candidate, u32)>) -> Self {
        Self {
            candidates: candidates
                .into_iter()
                .map(|(candidate, weight)| WeightedCandidate { candidate, weight })
                .collect(),
            ordering: CandidateOrdering::Weighted,
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn slot_timeout(&self) -> Duration {
        bounded(self.slot_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(bounded)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(bounded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        let timeouts = [
            ("slot_timeout_ms", Some(self.slot_timeout_ms)),
            ("attempt_timeout_ms", self.attempt_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value.is_some_and(|ms| ms > MAX_TIMEOUT_MS) {
                return Err(invalid(field, "must not exceed 30 days"));
            }
        }
        if self
            .candidates
            .iter()
            .any(|c| c.candidate.provider.trim().is_empty() || c.candidate.model.trim().is_empty())
        {
            return Err(invalid("candidates", "provider and model must not be empty"));
        }
        Ok(())
    }
}

/// Per-model routing policies with a fallback default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub default: RoutingPolicy,
    #[serde(default)]
    pub models: HashMap<String, RoutingPolicy>,
}

impl PolicyTable {
    pub fn new(default: RoutingPolicy) -> Self {
        Self {
            default,
            models: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, policy: RoutingPolicy) -> Self {
        self.models.insert(model.into(), policy);
        self
    }

    pub fn for_model(&self, model: &str) -> &RoutingPolicy {
        self.models.get(model).unwrap_or(&self.default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default.validate()?;
        self.models.values().try_for_each(RoutingPolicy::validate)
    }
}

fn bounded(ms: u64) -> Duration {
    Duration::from_millis(ms.min(MAX_TIMEOUT_MS))
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_with_defaults() {
        let policy: RoutingPolicy = serde_json::from_str(
            r#"{"candidates":[{"provider":"a","model":"m1","weight":3},
                {"provider":"b","model":"m2"}],"ordering":"weighted"}"#,
        )
        .unwrap();
        assert_eq!(policy.candidates[0].weight, 3);
        assert_eq!(policy.candidates[1].weight, 1);
        assert_eq!(policy.ordering, CandidateOrdering::Weighted);
        assert_eq!(policy.retry, RetryPolicy::default());
        assert_eq!(policy.slot_timeout(), Duration::from_secs(30));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn jitter_ratio_must_stay_below_one() {
        let retry = RetryPolicy {
            jitter_ratio: 1.0,
            ..Default::default()
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn nan_jitter_and_inverted_delays_rejected() {
        let nan = RetryPolicy {
            jitter_ratio: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());

        let inverted = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn unbounded_timeouts_rejected_and_clamped() {
        let policy = RoutingPolicy {
            request_timeout_ms: Some(u64::MAX),
            slot_timeout_ms: u64::MAX,
            ..RoutingPolicy::new([Candidate::new("a", "m")])
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid {
                field: "slot_timeout_ms",
                ..
            })
        ));
        assert_eq!(
            policy.request_timeout(),
            Some(Duration::from_millis(MAX_TIMEOUT_MS))
        );
    }

    #[test]
    fn table_falls_back_to_default() {
        let table = PolicyTable::new(RoutingPolicy::new([Candidate::new("a", "m")]))
            .with_model("special", RoutingPolicy::new([Candidate::new("b", "special")]));
        assert_eq!(table.for_model("special").candidates[0].candidate.provider, "b");
        assert_eq!(table.for_model("other").candidates[0].candidate.provider, "a");
    }

    #[test]
    fn default_retryable_kinds() {
        let retry = RetryPolicy::default();
        assert!(retry.is_retryable(ErrorKind::RateLimited));
        assert!(retry.is_retryable(ErrorKind::Backpressure));
        assert!(!retry.is_retryable(ErrorKind::TerminalCredential));
        assert!(!retry.is_retryable(ErrorKind::Validation));
    }
}
