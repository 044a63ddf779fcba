mod bucket;
mod pool;
mod snapshot;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool, PoolError};
pub use snapshot::{CredentialHealth, HealthSnapshot};
pub use state::{CredentialId, CredentialState, UnavailableReason};

use std::fmt;
use std::sync::Arc;

/// Opaque secret material. Never printed, never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRef(Arc<str>);

impl SecretRef {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self(secret.into())
    }

    /// Only adapters should call this, right before building the upstream call.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretRef(***)")
    }
}

/// What the secret-loading collaborator hands the pool at startup.
#[derive(Debug, Clone)]
pub struct CredentialSpec {
    pub id: CredentialId,
    pub secret: SecretRef,
    pub weight: u32,
    /// Overrides the provider's declared requests-per-minute.
    pub requests_per_minute: Option<u32>,
}

impl CredentialSpec {
    pub fn new(id: CredentialId, secret: SecretRef) -> Self {
        Self {
            id,
            secret,
            weight: 1,
            requests_per_minute: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }
}

/// Read-only view of a credential handed to the engine and adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHandle {
    pub id: CredentialId,
    pub provider: String,
    pub secret: SecretRef,
}
