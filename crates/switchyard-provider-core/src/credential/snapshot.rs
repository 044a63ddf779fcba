use std::collections::HashMap;

use tokio::time::Instant;

use super::state::{CredentialId, CredentialState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHealth {
    pub id: CredentialId,
    pub weight: u32,
    pub state: CredentialState,
}

/// Point-in-time copy of every credential's health, published after each
/// transition. May be briefly stale; acquisition re-checks the live state.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub(crate) providers: HashMap<String, Vec<CredentialHealth>>,
}

impl HealthSnapshot {
    pub fn knows(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn credentials(&self, provider: &str) -> &[CredentialHealth] {
        self.providers
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn available_count_at(&self, provider: &str, now: Instant) -> usize {
        self.credentials(provider)
            .iter()
            .filter(|c| c.state.is_available_at(now))
            .count()
    }

    pub fn available_count(&self, provider: &str) -> usize {
        self.available_count_at(provider, Instant::now())
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
