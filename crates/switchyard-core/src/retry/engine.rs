use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures_util::StreamExt;
use switchyard_provider_core::{
    Attempt, AttemptLog, AttemptOutcome, CallContext, CanonicalRequest, Candidate, ChunkStream,
    CredentialHandle, CredentialId, CredentialPool, ErrorKind, ProviderAdapter, ProviderError,
    ProviderRegistry, ProviderReply, RequestId, ResponseChunk, RoutingPolicy,
};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backoff::backoff_delay;
use crate::error::{CancelReason, DispatchError};
use crate::governor::{ConcurrencyGovernor, GovernorError, Slot, SlotKey};

/// What one upstream call produces. Lets the same attempt loop drive
/// buffered and streamed requests.
#[async_trait]
pub(crate) trait Invocation: Send + Sync {
    type Output: Send;

    async fn invoke(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<Self::Output, ProviderError>;
}

pub(crate) struct Buffered;

#[async_trait]
impl Invocation for Buffered {
    type Output = ProviderReply;

    async fn invoke(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<ProviderReply, ProviderError> {
        adapter.execute(request, credential, ctx).await
    }
}

/// A stream that has produced its first item (or ended cleanly).
pub(crate) struct StreamStart {
    pub(crate) first: Option<ResponseChunk>,
    pub(crate) rest: ChunkStream,
}

pub(crate) struct Streaming;

#[async_trait]
impl Invocation for Streaming {
    type Output = StreamStart;

    /// Opens the stream and waits for the first chunk, so every failure up to
    /// that point is still eligible for fallback.
    async fn invoke(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<StreamStart, ProviderError> {
        let mut stream = adapter.execute_stream(request, credential, ctx).await?;
        match stream.next().await {
            Some(Ok(chunk)) => Ok(StreamStart {
                first: Some(chunk),
                rest: stream,
            }),
            Some(Err(err)) => Err(err),
            None => Ok(StreamStart {
                first: None,
                rest: stream,
            }),
        }
    }
}

/// Everything one request's attempt loop needs.
pub(crate) struct RunScope {
    pub(crate) request: Arc<CanonicalRequest>,
    pub(crate) policy: RoutingPolicy,
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) cancel: CancellationToken,
    pub(crate) deadline: Option<Instant>,
}

impl RunScope {
    fn interrupted(&self) -> Option<CancelReason> {
        if self.cancel.is_cancelled() {
            return Some(CancelReason::Caller);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineElapsed),
            _ => None,
        }
    }

    /// Slot wait deadline, never past the request deadline. A slot timeout
    /// beyond the clock's range fails the wait at once.
    fn slot_deadline(&self) -> Instant {
        let now = Instant::now();
        match (now.checked_add(self.policy.slot_timeout()), self.deadline) {
            (Some(slot), Some(limit)) => slot.min(limit),
            (Some(slot), None) => slot,
            (None, limit) => limit.unwrap_or(now),
        }
    }

    /// Runs `fut` unless the caller cancels or the request deadline passes first.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CancelReason::Caller),
            _ = deadline => Err(CancelReason::DeadlineElapsed),
            out = fut => Ok(out),
        }
    }
}

/// Attempt fields known before the outcome.
#[derive(Debug, Clone)]
pub(crate) struct AttemptDraft {
    pub(crate) request_id: RequestId,
    pub(crate) attempt_no: u32,
    pub(crate) candidate: Candidate,
    pub(crate) started: Instant,
    pub(crate) started_at: SystemTime,
    pub(crate) backoff: Option<Duration>,
}

impl AttemptDraft {
    pub(crate) fn finish(
        &self,
        credential_id: Option<CredentialId>,
        outcome: AttemptOutcome,
        partial_output: Option<String>,
    ) -> Attempt {
        Attempt {
            request_id: self.request_id,
            attempt_no: self.attempt_no,
            candidate: self.candidate.clone(),
            credential_id,
            outcome,
            latency: self.started.elapsed(),
            backoff: self.backoff,
            started_at: self.started_at,
            partial_output,
        }
    }
}

/// A successful call whose attempt has not been recorded yet; the caller
/// records it once it knows how the call really ended.
pub(crate) struct Committed<T> {
    pub(crate) output: T,
    pub(crate) credential: CredentialHandle,
    pub(crate) slot: Slot,
    pub(crate) draft: AttemptDraft,
    pub(crate) log: AttemptLog,
}

/// Drives candidates in order with per-candidate retries and backoff.
pub(crate) struct Engine {
    registry: Arc<ProviderRegistry>,
    pool: Arc<CredentialPool>,
    governor: Arc<ConcurrencyGovernor>,
}

impl Engine {
    pub(crate) fn new(
        registry: Arc<ProviderRegistry>,
        pool: Arc<CredentialPool>,
        governor: Arc<ConcurrencyGovernor>,
    ) -> Self {
        Self {
            registry,
            pool,
            governor,
        }
    }

    pub(crate) async fn run<I: Invocation>(
        &self,
        invocation: &I,
        scope: &RunScope,
    ) -> Result<Committed<I::Output>, DispatchError> {
        let request = scope.request.as_ref();
        let retry = &scope.policy.retry;
        let mut log = AttemptLog::new();

        for candidate in &scope.candidates {
            let Some(provider) = self.registry.get(&candidate.provider) else {
                debug!(
                    request_id = %request.id,
                    candidate = %candidate,
                    "skipping unregistered provider"
                );
                continue;
            };

            if let Err(err) = request.check_bounds(&provider.descriptor.bounds) {
                let draft = self.draft(request, &log, candidate, None);
                log.push(draft.finish(
                    None,
                    AttemptOutcome::failed(ErrorKind::Validation, err.to_string()),
                    None,
                ));
                warn!(
                    request_id = %request.id,
                    provider = %candidate.provider,
                    error = %err,
                    "request outside provider bounds"
                );
                continue;
            }

            let mut tries: u32 = 0;
            let mut backoff: Option<Duration> = None;
            loop {
                tries += 1;
                if let Some(reason) = scope.interrupted() {
                    return Err(cancelled(reason, log));
                }
                let draft = self.draft(request, &log, candidate, backoff);

                let kind = 'attempt: {
                    let credential = match self.pool.acquire(&candidate.provider).await {
                        Ok(credential) => credential,
                        Err(err) => {
                            log.push(draft.finish(
                                None,
                                AttemptOutcome::failed(
                                    ErrorKind::NoHealthyCredential,
                                    DispatchError::from(err).to_string(),
                                ),
                                None,
                            ));
                            warn!(
                                request_id = %request.id,
                                provider = %candidate.provider,
                                attempt_no = draft.attempt_no,
                                "no healthy credential"
                            );
                            break 'attempt ErrorKind::NoHealthyCredential;
                        }
                    };

                    let key = SlotKey::new(candidate.provider.clone(), credential.id);
                    let acquired = self
                        .governor
                        .acquire(key, scope.slot_deadline(), &scope.cancel)
                        .await;
                    let slot = match acquired {
                        Ok(slot) => slot,
                        Err(err) => {
                            let interrupted = match err {
                                GovernorError::Cancelled => Some(CancelReason::Caller),
                                _ => scope.interrupted(),
                            };
                            if let Some(reason) = interrupted {
                                log.push(draft.finish(
                                    Some(credential.id),
                                    AttemptOutcome::failed(ErrorKind::Cancelled, err.to_string()),
                                    None,
                                ));
                                return Err(cancelled(reason, log));
                            }
                            log.push(draft.finish(
                                Some(credential.id),
                                AttemptOutcome::failed(
                                    ErrorKind::Backpressure,
                                    DispatchError::from(err.clone()).to_string(),
                                ),
                                None,
                            ));
                            warn!(
                                request_id = %request.id,
                                provider = %candidate.provider,
                                credential_id = credential.id,
                                attempt_no = draft.attempt_no,
                                error = %err,
                                "no concurrency slot"
                            );
                            break 'attempt ErrorKind::Backpressure;
                        }
                    };

                    let ctx = CallContext {
                        request_id: request.id,
                        attempt_no: draft.attempt_no,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        cancel: scope.cancel.child_token(),
                    };
                    let call = async {
                        let adapter = provider.adapter.as_ref();
                        let call = invocation.invoke(adapter, request, &credential, &ctx);
                        match scope.policy.attempt_timeout() {
                            Some(limit) => timeout(limit, call).await.unwrap_or_else(|_| {
                                Err(ProviderError::timeout(format!(
                                    "attempt exceeded {}ms",
                                    limit.as_millis()
                                )))
                            }),
                            None => call.await,
                        }
                    };

                    let result = match scope.guard(call).await {
                        Ok(result) => result,
                        Err(reason) => {
                            ctx.cancel.cancel();
                            log.push(draft.finish(
                                Some(credential.id),
                                AttemptOutcome::failed(ErrorKind::Cancelled, "cancelled in flight"),
                                None,
                            ));
                            return Err(cancelled(reason, log));
                        }
                    };

                    match result {
                        Ok(output) => {
                            debug!(
                                request_id = %request.id,
                                provider = %candidate.provider,
                                credential_id = credential.id,
                                attempt_no = draft.attempt_no,
                                "attempt succeeded"
                            );
                            return Ok(Committed {
                                output,
                                credential,
                                slot,
                                draft,
                                log,
                            });
                        }
                        Err(err) => {
                            drop(slot);
                            self.report_failure(credential.id, &err).await;
                            let kind = err.kind();
                            log.push(draft.finish(
                                Some(credential.id),
                                AttemptOutcome::failed(kind, err.to_string()),
                                None,
                            ));
                            warn!(
                                request_id = %request.id,
                                provider = %candidate.provider,
                                credential_id = credential.id,
                                attempt_no = draft.attempt_no,
                                kind = %kind,
                                error = %err,
                                "upstream attempt failed"
                            );
                            kind
                        }
                    }
                };

                if !retry.is_retryable(kind) || tries >= retry.max_attempts {
                    break;
                }
                if self.pool.health().available_count(&candidate.provider) == 0 {
                    debug!(
                        request_id = %request.id,
                        provider = %candidate.provider,
                        "no credential left, moving to next candidate"
                    );
                    break;
                }
                let delay = backoff_delay(retry, tries - 1);
                if let Err(reason) = scope.guard(sleep(delay)).await {
                    return Err(cancelled(reason, log));
                }
                backoff = Some(delay);
            }
        }

        warn!(
            request_id = %request.id,
            attempts = log.len(),
            "all candidates exhausted"
        );
        Err(DispatchError::AllCandidatesExhausted {
            attempts: log.into_vec(),
        })
    }

    /// Feeds a provider failure back into the credential pool.
    pub(crate) async fn report_failure(&self, credential_id: CredentialId, err: &ProviderError) {
        match err {
            ProviderError::RateLimited { retry_after, .. } => {
                self.pool
                    .report_rate_limited(credential_id, *retry_after)
                    .await;
            }
            other => self.pool.report_failure(credential_id, other.kind()).await,
        }
    }

    pub(crate) async fn report_success(&self, credential_id: CredentialId) {
        self.pool.report_success(credential_id).await;
    }

    fn draft(
        &self,
        request: &CanonicalRequest,
        log: &AttemptLog,
        candidate: &Candidate,
        backoff: Option<Duration>,
    ) -> AttemptDraft {
        AttemptDraft {
            request_id: request.id,
            attempt_no: log.next_attempt_no(),
            candidate: candidate.clone(),
            started: Instant::now(),
            started_at: SystemTime::now(),
            backoff,
        }
    }
}

fn cancelled(reason: CancelReason, log: AttemptLog) -> DispatchError {
    DispatchError::Cancelled {
        reason,
        attempts: log.into_vec(),
    }
}
