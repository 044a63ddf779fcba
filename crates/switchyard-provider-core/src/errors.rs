use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Flat classification shared by attempts, retry policies and the credential pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    Timeout,
    RateLimited,
    TerminalCredential,
    UnsupportedOperation,
    NoHealthyCredential,
    Backpressure,
    StreamInterrupted,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TerminalCredential => "terminal_credential",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
            ErrorKind::NoHealthyCredential => "no_healthy_credential",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::StreamInterrupted => "stream_interrupted",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Failures that say something about the credential's health.
    pub fn affects_credential(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient
                | ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::TerminalCredential
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request rejected before any upstream traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid request field {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Connect, DNS, TLS, reset.
    Network,
    Timeout,
    /// Upstream answered with a server-side failure.
    Upstream,
}

/// Failure reported by a provider adapter, already mapped onto the fixed taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("transient upstream failure ({kind:?}): {message}")]
    Transient { kind: TransientKind, message: String },
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("credential rejected: {message}")]
    TerminalCredential { message: String },
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },
    #[error("request rejected by provider: {message}")]
    InvalidRequest { message: String },
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            kind: TransientKind::Network,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            kind: TransientKind::Timeout,
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        ProviderError::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transient {
                kind: TransientKind::Timeout,
                ..
            } => ErrorKind::Timeout,
            ProviderError::Transient { .. } => ErrorKind::Transient,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::TerminalCredential { .. } => ErrorKind::TerminalCredential,
            ProviderError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            ProviderError::InvalidRequest { .. } => ErrorKind::Validation,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
