use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub type CredentialId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Healthy,
    /// Excluded while `now < until`; usable again at `until` even if the
    /// recovery task has not run yet.
    CoolingDown {
        until: Instant,
        reason: UnavailableReason,
    },
    /// Stays disabled until an operator re-enables it.
    Disabled { reason: UnavailableReason },
}

impl CredentialState {
    pub fn is_available_at(&self, now: Instant) -> bool {
        match self {
            CredentialState::Healthy => true,
            CredentialState::CoolingDown { until, .. } => now >= *until,
            CredentialState::Disabled { .. } => false,
        }
    }

    pub fn cooling_until(&self) -> Option<Instant> {
        match self {
            CredentialState::CoolingDown { until, .. } => Some(*until),
            _ => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, CredentialState::Disabled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    RateLimit,
    CircuitOpen,
    AuthInvalid,
    Manual,
}
