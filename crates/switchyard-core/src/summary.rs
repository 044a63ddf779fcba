use std::time::SystemTime;

use switchyard_provider_core::{
    Attempt, CanonicalRequest, CredentialId, Event, EventHub, OperationKind, RequestId,
    RequestSummary, SummaryOutcome,
};
use tokio::time::Instant;
use tracing::info;

use crate::error::DispatchError;

/// Request-level fields of a summary, captured before the outcome is known.
#[derive(Debug, Clone)]
pub(crate) struct SummaryDraft {
    request_id: RequestId,
    model: String,
    operation: OperationKind,
    started: Instant,
    streamed: bool,
    short_circuited: bool,
    prior: Vec<Attempt>,
}

impl SummaryDraft {
    pub(crate) fn new(
        request: &CanonicalRequest,
        started: Instant,
        streamed: bool,
        short_circuited: bool,
    ) -> Self {
        Self {
            request_id: request.id,
            model: request.model.clone(),
            operation: request.operation,
            started,
            streamed,
            short_circuited,
            prior: Vec::new(),
        }
    }

    /// Attempts that precede whatever the final outcome carries.
    pub(crate) fn with_prior_attempts(mut self, attempts: Vec<Attempt>) -> Self {
        self.prior = attempts;
        self
    }

    pub(crate) async fn succeeded(
        self,
        events: &EventHub,
        provider: Option<&str>,
        model: Option<&str>,
        credential_id: Option<CredentialId>,
        attempts: Vec<Attempt>,
    ) {
        let outcome = SummaryOutcome::Success {
            provider: provider.map(str::to_string),
            model: model.map(str::to_string),
            credential_id,
        };
        self.emit(events, outcome, attempts).await;
    }

    pub(crate) async fn failed(self, events: &EventHub, error: &DispatchError) {
        let outcome = SummaryOutcome::Failed {
            error: error.code().to_string(),
            message: error.to_string(),
        };
        self.emit(events, outcome, error.attempts().to_vec()).await;
    }

    async fn emit(self, events: &EventHub, outcome: SummaryOutcome, attempts: Vec<Attempt>) {
        let mut all = self.prior;
        all.extend(attempts);
        let summary = RequestSummary {
            request_id: self.request_id,
            at: SystemTime::now(),
            model: self.model,
            operation: self.operation,
            streamed: self.streamed,
            short_circuited: self.short_circuited,
            outcome,
            latency: self.started.elapsed(),
            attempts: all,
        };
        info!(
            request_id = %summary.request_id,
            model = %summary.model,
            success = summary.outcome.is_success(),
            attempts = summary.attempts.len(),
            latency_ms = summary.latency.as_millis() as u64,
            "request finished"
        );
        events.emit(Event::Request(summary)).await;
    }
}
