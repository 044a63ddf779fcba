use async_trait::async_trait;
use tracing::{info, warn};

use super::{Event, EventSink, EventSinkError, OperationalEvent, SummaryOutcome};

/// Logs every event through `tracing`; the subscriber decides formatting.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, event: &Event) -> Result<(), EventSinkError> {
        match event {
            Event::Request(summary) => match &summary.outcome {
                SummaryOutcome::Success {
                    provider, model, ..
                } => info!(
                    request_id = %summary.request_id,
                    operation = %summary.operation,
                    provider = provider.as_deref().unwrap_or("-"),
                    model = model.as_deref().unwrap_or(summary.model.as_str()),
                    attempts = summary.attempts.len(),
                    latency_ms = summary.latency.as_millis() as u64,
                    short_circuited = summary.short_circuited,
                    "request completed"
                ),
                SummaryOutcome::Failed { error, message } => warn!(
                    request_id = %summary.request_id,
                    operation = %summary.operation,
                    model = %summary.model,
                    attempts = summary.attempts.len(),
                    latency_ms = summary.latency.as_millis() as u64,
                    error = %error,
                    message = %message,
                    "request failed"
                ),
            },
            Event::Operational(op) => match op {
                OperationalEvent::UnavailableStart(ev) => warn!(
                    provider = %ev.provider,
                    credential_id = ev.credential_id,
                    reason = ?ev.reason,
                    "credential cooling down"
                ),
                OperationalEvent::UnavailableEnd(ev) => info!(
                    provider = %ev.provider,
                    credential_id = ev.credential_id,
                    "credential recovered"
                ),
                OperationalEvent::CredentialDisabled(ev) => warn!(
                    provider = %ev.provider,
                    credential_id = ev.credential_id,
                    reason = ?ev.reason,
                    "credential disabled"
                ),
                OperationalEvent::CredentialEnabled(ev) => info!(
                    provider = %ev.provider,
                    credential_id = ev.credential_id,
                    "credential enabled"
                ),
            },
        }
        Ok(())
    }
}
