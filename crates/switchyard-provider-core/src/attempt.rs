use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use switchyard_common::RequestId;

use crate::config::Candidate;
use crate::credential::CredentialId;
use crate::errors::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed { kind: ErrorKind, message: String },
}

impl AttemptOutcome {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        AttemptOutcome::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// One concrete try of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub request_id: RequestId,
    /// 1-based, counted across the whole request.
    pub attempt_no: u32,
    pub candidate: Candidate,
    pub credential_id: Option<CredentialId>,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    /// Delay slept before this attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
    pub started_at: SystemTime,
    /// Text already delivered downstream when a stream broke off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<String>,
}

/// Append-only record of every attempt a request made, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptLog {
    entries: Vec<Attempt>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: Attempt) {
        self.entries.push(attempt);
    }

    pub fn entries(&self) -> &[Attempt] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_attempt_no(&self) -> u32 {
        u32::try_from(self.entries.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    pub fn into_vec(self) -> Vec<Attempt> {
        self.entries
    }
}
