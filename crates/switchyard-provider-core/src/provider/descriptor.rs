use serde::{Deserialize, Serialize};

use crate::request::OperationKind;

/// Limits a provider declares for each of its credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    /// Slot capacity per credential; the governor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<(f32, f32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<(f32, f32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stop_sequences: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub operations: Vec<OperationKind>,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default)]
    pub bounds: ParamBounds,
}

impl ProviderDescriptor {
    pub fn new(
        name: impl Into<String>,
        operations: impl IntoIterator<Item = OperationKind>,
    ) -> Self {
        Self {
            name: name.into(),
            operations: operations.into_iter().collect(),
            rate_limits: RateLimits::default(),
            bounds: ParamBounds::default(),
        }
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_bounds(mut self, bounds: ParamBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn supports(&self, operation: OperationKind) -> bool {
        self.operations.contains(&operation)
    }
}
