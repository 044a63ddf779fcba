use std::fmt;

use serde::{Deserialize, Serialize};
use switchyard_provider_core::{AcquireError, Attempt, Candidate, ValidationError};

use crate::governor::GovernorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    UnknownProvider,
    UnsupportedOperation,
    NoHealthyCredential,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExclusionReason::UnknownProvider => "unknown provider",
            ExclusionReason::UnsupportedOperation => "operation not supported",
            ExclusionReason::NoHealthyCredential => "no healthy credential",
        })
    }
}

/// Why the router dropped a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub candidate: Candidate,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Caller,
    DeadlineElapsed,
}

/// Everything a caller of the dispatcher can see go wrong.
///
/// Variants raised after the first upstream attempt always carry the attempt
/// log so the whole fallback chain can be diagnosed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Attempt-level: the engine records it in the attempt log and moves on,
    /// so a dispatch only returns it through [`From<AcquireError>`].
    #[error("provider {provider} has no healthy credential")]
    NoHealthyCredential { provider: String },
    /// Attempt-level, like [`DispatchError::NoHealthyCredential`]; built from
    /// a [`GovernorError`] other than cancellation.
    #[error("no concurrency slot available: {message}")]
    Backpressure { message: String },
    #[error("no route available ({} candidates excluded)", exclusions.len())]
    NoRouteAvailable { exclusions: Vec<Exclusion> },
    #[error("all candidates exhausted after {} attempts", attempts.len())]
    AllCandidatesExhausted { attempts: Vec<Attempt> },
    #[error("stream interrupted after partial output: {message}")]
    StreamInterrupted {
        message: String,
        partial_output: String,
        attempts: Vec<Attempt>,
    },
    #[error("request cancelled ({reason:?}) after {} attempts", attempts.len())]
    Cancelled {
        reason: CancelReason,
        attempts: Vec<Attempt>,
    },
    #[error("plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "validation",
            DispatchError::NoHealthyCredential { .. } => "no_healthy_credential",
            DispatchError::Backpressure { .. } => "backpressure",
            DispatchError::NoRouteAvailable { .. } => "no_route_available",
            DispatchError::AllCandidatesExhausted { .. } => "all_candidates_exhausted",
            DispatchError::StreamInterrupted { .. } => "stream_interrupted",
            DispatchError::Cancelled { .. } => "cancelled",
            DispatchError::Plugin { .. } => "plugin",
        }
    }

    pub fn attempts(&self) -> &[Attempt] {
        match self {
            DispatchError::AllCandidatesExhausted { attempts }
            | DispatchError::StreamInterrupted { attempts, .. }
            | DispatchError::Cancelled { attempts, .. } => attempts,
            _ => &[],
        }
    }

    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

impl From<AcquireError> for DispatchError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::ProviderUnknown(provider)
            | AcquireError::NoHealthyCredential(provider) => {
                DispatchError::NoHealthyCredential { provider }
            }
        }
    }
}

impl From<GovernorError> for DispatchError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::Cancelled => DispatchError::Cancelled {
                reason: CancelReason::Caller,
                attempts: Vec::new(),
            },
            other => DispatchError::Backpressure {
                message: other.to_string(),
            },
        }
    }
}
