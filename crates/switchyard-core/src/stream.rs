use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use switchyard_provider_core::{
    AttemptOutcome, CanonicalResponse, ErrorKind, EventHub, FinishReason, ProviderError,
    ResponseChunk, ResponseOutput,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CancelReason, DispatchError};
use crate::plugin::StreamMeta;
use crate::retry::{Committed, Engine, StreamStart};
use crate::summary::SummaryDraft;

const STREAM_BUFFER: usize = 32;

type StreamItem = Result<ResponseChunk, DispatchError>;

/// Chunks of a committed stream. Every chunk belongs to the same provider and
/// credential; a failure after the first chunk arrives as a final
/// [`DispatchError::StreamInterrupted`] item.
///
/// Dropping the stream cancels the upstream call and releases its slot.
#[derive(Debug)]
pub struct DispatchStream {
    rx: mpsc::Receiver<StreamItem>,
    meta: Option<StreamMeta>,
}

impl DispatchStream {
    /// `None` for streams produced by a plugin short-circuit.
    pub fn meta(&self) -> Option<&StreamMeta> {
        self.meta.as_ref()
    }

    /// Wraps a complete response as a single terminal chunk.
    pub(crate) fn from_response(response: &CanonicalResponse) -> Self {
        let delta = match &response.output {
            ResponseOutput::Message(message) => message.content.clone(),
            ResponseOutput::Text(text) => text.clone(),
            ResponseOutput::Embeddings(_) => String::new(),
        };
        let chunk = ResponseChunk::delta(0, delta)
            .finish(FinishReason::Stop)
            .with_usage(response.usage);
        let (tx, rx) = mpsc::channel(1);
        // Fresh channel with capacity one; cannot be full.
        let _ = tx.try_send(Ok(chunk));
        Self { rx, meta: None }
    }
}

impl Stream for DispatchStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum StreamEnd {
    Completed,
    Failed(ProviderError),
    Cancelled(CancelReason),
    Dropped,
}

/// Pumps a committed upstream stream to the caller on its own task.
pub(crate) struct Forwarder {
    pub(crate) engine: Arc<Engine>,
    pub(crate) events: EventHub,
    pub(crate) committed: Committed<StreamStart>,
    pub(crate) summary: SummaryDraft,
    pub(crate) cancel: CancellationToken,
    pub(crate) deadline: Option<Instant>,
}

impl Forwarder {
    pub(crate) fn spawn(self, meta: StreamMeta) -> DispatchStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(self.run(tx));
        DispatchStream {
            rx,
            meta: Some(meta),
        }
    }

    async fn run(self, tx: mpsc::Sender<StreamItem>) {
        let Forwarder {
            engine,
            events,
            committed,
            summary,
            cancel,
            deadline,
        } = self;
        let Committed {
            output: StreamStart { first, mut rest },
            credential,
            slot,
            draft,
            mut log,
        } = committed;
        let mut partial = String::new();

        let end = 'forward: {
            if let Some(chunk) = first {
                if let Err(end) = deliver(&tx, chunk, &mut partial, &cancel, deadline).await {
                    break 'forward end;
                }
            }
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        break 'forward StreamEnd::Cancelled(CancelReason::Caller)
                    }
                    _ = until(deadline) => {
                        break 'forward StreamEnd::Cancelled(CancelReason::DeadlineElapsed)
                    }
                    _ = tx.closed() => break 'forward StreamEnd::Dropped,
                    next = rest.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        if let Err(end) =
                            deliver(&tx, chunk, &mut partial, &cancel, deadline).await
                        {
                            break 'forward end;
                        }
                    }
                    Some(Err(err)) => break 'forward StreamEnd::Failed(err),
                    None => break 'forward StreamEnd::Completed,
                }
            }
        };

        drop(rest);
        drop(slot);
        let provider = draft.candidate.provider.clone();
        let model = draft.candidate.model.clone();
        let partial_output = (!partial.is_empty()).then(|| partial.clone());

        match end {
            StreamEnd::Completed => {
                engine.report_success(credential.id).await;
                log.push(draft.finish(Some(credential.id), AttemptOutcome::Success, None));
                debug!(
                    request_id = %draft.request_id,
                    provider = %provider,
                    credential_id = credential.id,
                    "stream completed"
                );
                summary
                    .succeeded(
                        &events,
                        Some(provider.as_str()),
                        Some(model.as_str()),
                        Some(credential.id),
                        log.into_vec(),
                    )
                    .await;
            }
            StreamEnd::Failed(err) => {
                engine.report_failure(credential.id, &err).await;
                log.push(draft.finish(
                    Some(credential.id),
                    AttemptOutcome::failed(ErrorKind::StreamInterrupted, err.to_string()),
                    partial_output,
                ));
                warn!(
                    request_id = %draft.request_id,
                    provider = %provider,
                    credential_id = credential.id,
                    error = %err,
                    "stream interrupted"
                );
                let error = DispatchError::StreamInterrupted {
                    message: err.to_string(),
                    partial_output: partial,
                    attempts: log.into_vec(),
                };
                summary.failed(&events, &error).await;
                let _ = tx.send(Err(error)).await;
            }
            StreamEnd::Cancelled(reason) => {
                log.push(draft.finish(
                    Some(credential.id),
                    AttemptOutcome::failed(ErrorKind::Cancelled, "stream cancelled"),
                    partial_output,
                ));
                let error = DispatchError::Cancelled {
                    reason,
                    attempts: log.into_vec(),
                };
                summary.failed(&events, &error).await;
                let _ = tx.send(Err(error)).await;
            }
            StreamEnd::Dropped => {
                log.push(draft.finish(
                    Some(credential.id),
                    AttemptOutcome::failed(ErrorKind::Cancelled, "stream dropped by caller"),
                    partial_output,
                ));
                debug!(request_id = %draft.request_id, "stream dropped by caller");
                let error = DispatchError::Cancelled {
                    reason: CancelReason::Caller,
                    attempts: log.into_vec(),
                };
                summary.failed(&events, &error).await;
            }
        }
    }
}

/// Hands one chunk to the caller once buffer space frees up, giving up on
/// cancellation, the deadline, or a dropped receiver while waiting.
async fn deliver(
    tx: &mpsc::Sender<StreamItem>,
    chunk: ResponseChunk,
    partial: &mut String,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<(), StreamEnd> {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamEnd::Cancelled(CancelReason::Caller)),
        _ = until(deadline) => return Err(StreamEnd::Cancelled(CancelReason::DeadlineElapsed)),
        permit = tx.reserve() => permit.map_err(|_| StreamEnd::Dropped)?,
    };
    partial.push_str(&chunk.delta);
    permit.send(Ok(chunk));
    Ok(())
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
