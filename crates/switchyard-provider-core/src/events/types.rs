use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use switchyard_common::RequestId;

use crate::attempt::Attempt;
use crate::credential::{CredentialId, UnavailableReason};
use crate::request::OperationKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Request(RequestSummary),
    Operational(OperationalEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Success {
        provider: Option<String>,
        model: Option<String>,
        credential_id: Option<CredentialId>,
    },
    Failed {
        error: String,
        message: String,
    },
}

impl SummaryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SummaryOutcome::Success { .. })
    }
}

/// Immutable record of one finished request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub at: SystemTime,
    pub model: String,
    pub operation: OperationKind,
    pub streamed: bool,
    pub short_circuited: bool,
    pub outcome: SummaryOutcome,
    pub latency: Duration,
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
    CredentialDisabled(CredentialDisabledEvent),
    CredentialEnabled(CredentialEnabledEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableStartEvent {
    pub at: SystemTime,
    pub provider: String,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableEndEvent {
    pub at: SystemTime,
    pub provider: String,
    pub credential_id: CredentialId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDisabledEvent {
    pub at: SystemTime,
    pub provider: String,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEnabledEvent {
    pub at: SystemTime,
    pub provider: String,
    pub credential_id: CredentialId,
}
