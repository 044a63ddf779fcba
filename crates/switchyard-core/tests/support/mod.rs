#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use switchyard_core::provider::{
    CallContext, CanonicalRequest, Candidate, ChunkStream, CredentialHandle, CredentialId,
    CredentialSpec, Message, OperationKind, ProviderAdapter, ProviderDescriptor, ProviderError,
    ProviderReply, ResponseChunk, ResponseOutput, RetryPolicy, RoutingPolicy, SecretRef, Usage,
};
use switchyard_core::{Dispatcher, DispatcherBuilder};

/// One scripted upstream behaviour, consumed per call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    ReplyAfter(Duration, String),
    Fail(ProviderError),
    Hang,
    Stream {
        items: Vec<Result<String, ProviderError>>,
        hang: bool,
    },
}

impl Step {
    pub fn chunks(chunks: &[&str]) -> Self {
        Step::Stream {
            items: chunks.iter().map(|c| Ok(c.to_string())).collect(),
            hang: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub attempt_no: u32,
    pub credential_id: CredentialId,
    pub model: String,
}

/// Adapter that replays a queue of steps and records each call. Replies
/// "ok" once the queue is empty.
#[derive(Default)]
pub struct ScriptedAdapter {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new([])
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next(&self, credential: &CredentialHandle, ctx: &CallContext) -> Step {
        self.calls.lock().unwrap().push(Call {
            attempt_no: ctx.attempt_no,
            credential_id: credential.id,
            model: ctx.model.clone(),
        });
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Reply("ok".into()))
    }
}

struct InFlight<'a>(&'a ScriptedAdapter);

impl<'a> InFlight<'a> {
    fn enter(adapter: &'a ScriptedAdapter) -> Self {
        let now = adapter.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        adapter.peak.fetch_max(now, Ordering::SeqCst);
        Self(adapter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reply(text: String) -> ProviderReply {
    ProviderReply {
        output: ResponseOutput::Message(Message::new(
            switchyard_core::provider::Role::Assistant,
            text,
        )),
        usage: Usage::new(3, 1),
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn execute(
        &self,
        _request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<ProviderReply, ProviderError> {
        let step = self.next(credential, ctx);
        let _guard = InFlight::enter(self);
        match step {
            Step::Reply(text) => Ok(reply(text)),
            Step::ReplyAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(reply(text))
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
            Step::Stream { .. } => {
                Err(ProviderError::unsupported("scripted stream on buffered call"))
            }
        }
    }

    async fn execute_stream(
        &self,
        _request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<ChunkStream, ProviderError> {
        match self.next(credential, ctx) {
            Step::Reply(text) => Ok(finite(vec![Ok(text)], false)),
            Step::ReplyAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(finite(vec![Ok(text)], false))
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
            Step::Stream { items, hang } => Ok(finite(items, hang)),
        }
    }
}

fn finite(items: Vec<Result<String, ProviderError>>, hang: bool) -> ChunkStream {
    let chunks = stream::iter(
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| item.map(|text| ResponseChunk::delta(i as u32, text))),
    );
    if hang {
        chunks.chain(stream::pending()).boxed()
    } else {
        chunks.boxed()
    }
}

pub fn chat(model: &str) -> CanonicalRequest {
    CanonicalRequest::chat(model, vec![Message::user("hello")])
}

pub fn descriptor(name: &str) -> ProviderDescriptor {
    ProviderDescriptor::new(
        name,
        [
            OperationKind::Chat,
            OperationKind::Completion,
            OperationKind::Embedding,
        ],
    )
}

pub fn credential(id: CredentialId) -> CredentialSpec {
    CredentialSpec::new(id, SecretRef::new(format!("sk-{id}")))
}

/// Policy over `providers` (all serving model "m") with zero jitter.
pub fn policy(providers: &[&str], max_attempts: u32) -> RoutingPolicy {
    RoutingPolicy::new(providers.iter().map(|p| Candidate::new(*p, "m"))).with_retry(RetryPolicy {
        max_attempts,
        jitter_ratio: 0.0,
        ..Default::default()
    })
}

pub fn transient() -> ProviderError {
    ProviderError::network("connection reset")
}

pub fn terminal() -> ProviderError {
    ProviderError::TerminalCredential {
        message: "invalid api key".into(),
    }
}

pub fn rate_limited(retry_after: Option<Duration>) -> ProviderError {
    ProviderError::RateLimited {
        retry_after,
        message: "slow down".into(),
    }
}

/// Builder with one provider per `(name, adapter, credential ids)`.
pub fn builder(providers: &[(&str, Arc<ScriptedAdapter>, &[CredentialId])]) -> DispatcherBuilder {
    let mut builder = Dispatcher::builder();
    for (name, adapter, ids) in providers {
        builder = builder.provider(descriptor(name), adapter.clone());
        for id in *ids {
            builder = builder.credential(*name, credential(*id));
        }
    }
    builder
}

pub async fn dispatcher(providers: &[(&str, Arc<ScriptedAdapter>, &[CredentialId])]) -> Dispatcher {
    builder(providers).build().await.unwrap()
}
