use std::sync::Arc;

use arc_swap::ArcSwap;
use switchyard_common::{ConfigError, EngineConfig};
use switchyard_provider_core::{
    Attempt, AttemptOutcome, CanonicalRequest, CanonicalResponse, CredentialPool, CredentialSpec,
    ErrorKind, EventHub, EventSink, PolicyTable, PoolError, ProviderAdapter, ProviderDescriptor,
    ProviderRegistry, RawRequest, RegistryError, RoutingPolicy, ValidationError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::governor::ConcurrencyGovernor;
use crate::plugin::{Outcome, Plugin, PluginContext, PluginPipeline, StreamMeta};
use crate::retry::{Buffered, Committed, Engine, RunScope, StreamStart, Streaming};
use crate::router::Router;
use crate::stream::{DispatchStream, Forwarder};
use crate::summary::SummaryDraft;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("credential for provider {provider}: {source}")]
    Pool {
        provider: String,
        #[source]
        source: PoolError,
    },
    #[error("credential registered for unknown provider {0}")]
    UnknownProvider(String),
}

/// What [`Dispatcher::handle`] produced, depending on the request's stream flag.
#[derive(Debug)]
pub enum Dispatched {
    Response(CanonicalResponse),
    Stream(DispatchStream),
}

#[derive(Default)]
pub struct DispatcherBuilder {
    config: EngineConfig,
    providers: Vec<(ProviderDescriptor, Arc<dyn ProviderAdapter>)>,
    credentials: Vec<(String, CredentialSpec)>,
    plugins: Vec<Arc<dyn Plugin>>,
    policies: PolicyTable,
    events: Option<EventHub>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(
        mut self,
        descriptor: ProviderDescriptor,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        self.providers.push((descriptor, adapter));
        self
    }

    pub fn credential(mut self, provider: impl Into<String>, spec: CredentialSpec) -> Self {
        self.credentials.push((provider.into(), spec));
        self
    }

    /// Plugins run in registration order.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Shares an existing hub instead of creating one from the config.
    pub fn event_hub(mut self, events: EventHub) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn build(self) -> Result<Dispatcher, BuildError> {
        self.config.validate()?;
        self.policies.validate()?;

        let events = self
            .events
            .unwrap_or_else(|| EventHub::new(self.config.event_buffer));
        for sink in self.sinks {
            events.add_sink(sink).await;
        }

        let pool = CredentialPool::new(self.config.pool.clone(), events.clone());
        let mut governor = ConcurrencyGovernor::new(self.config.governor.clone());
        let mut registry = ProviderRegistry::new();
        for (descriptor, adapter) in self.providers {
            if let Some(capacity) = descriptor.rate_limits.max_concurrency {
                governor = governor.with_provider_capacity(descriptor.name.clone(), capacity);
            }
            pool.register_provider(descriptor.name.clone(), descriptor.rate_limits)
                .await;
            registry.register(descriptor, adapter)?;
        }
        for (provider, spec) in self.credentials {
            if !registry.contains(&provider) {
                return Err(BuildError::UnknownProvider(provider));
            }
            pool.insert(provider.clone(), spec)
                .await
                .map_err(|source| BuildError::Pool { provider, source })?;
        }

        let registry = Arc::new(registry);
        let pool = Arc::new(pool);
        let governor = Arc::new(governor);
        info!(
            providers = registry.len(),
            plugins = self.plugins.len(),
            "dispatcher ready"
        );
        Ok(Dispatcher {
            inner: Arc::new(DispatcherInner {
                router: Router::new(registry.clone()),
                engine: Arc::new(Engine::new(registry.clone(), pool.clone(), governor.clone())),
                plugins: PluginPipeline::new(self.plugins),
                policies: ArcSwap::from_pointee(self.policies),
                registry,
                pool,
                governor,
                events,
            }),
        })
    }
}

struct DispatcherInner {
    registry: Arc<ProviderRegistry>,
    pool: Arc<CredentialPool>,
    governor: Arc<ConcurrencyGovernor>,
    router: Router,
    engine: Arc<Engine>,
    plugins: PluginPipeline,
    policies: ArcSwap<PolicyTable>,
    events: EventHub,
}

enum PolicySource {
    Table,
    Given(RoutingPolicy),
}

enum Executed {
    Response(CanonicalResponse),
    Stream(Committed<StreamStart>, Option<Instant>),
}

/// Entry point of the engine: validates, runs plugins, routes and executes a
/// request with retries and fallback. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.inner.pool
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.inner.governor
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn policies(&self) -> Arc<PolicyTable> {
        self.inner.policies.load_full()
    }

    /// Swaps the policy table. In-flight requests keep the policy they started with.
    pub fn set_policies(&self, policies: PolicyTable) -> Result<(), ConfigError> {
        policies.validate()?;
        self.inner.policies.store(Arc::new(policies));
        info!("routing policies replaced");
        Ok(())
    }

    /// Canonicalizes a raw request and dispatches it under the policy table
    /// entry for its (post-plugin) model.
    pub async fn handle(&self, raw: RawRequest) -> Result<Dispatched, DispatchError> {
        self.handle_with_cancel(raw, CancellationToken::new()).await
    }

    pub async fn handle_with_cancel(
        &self,
        raw: RawRequest,
        cancel: CancellationToken,
    ) -> Result<Dispatched, DispatchError> {
        let request = raw.canonicalize()?;
        let stream = request.stream;
        self.execute(request, PolicySource::Table, stream, cancel)
            .await
    }

    pub async fn dispatch(
        &self,
        request: CanonicalRequest,
        policy: &RoutingPolicy,
    ) -> Result<CanonicalResponse, DispatchError> {
        self.dispatch_with_cancel(request, policy, CancellationToken::new())
            .await
    }

    pub async fn dispatch_with_cancel(
        &self,
        request: CanonicalRequest,
        policy: &RoutingPolicy,
        cancel: CancellationToken,
    ) -> Result<CanonicalResponse, DispatchError> {
        match self
            .execute(request, PolicySource::Given(policy.clone()), false, cancel)
            .await?
        {
            Dispatched::Response(response) => Ok(response),
            Dispatched::Stream(_) => Err(DispatchError::plugin(
                "pipeline",
                "stream outcome on a buffered request",
            )),
        }
    }

    pub async fn dispatch_stream(
        &self,
        request: CanonicalRequest,
        policy: &RoutingPolicy,
    ) -> Result<DispatchStream, DispatchError> {
        self.dispatch_stream_with_cancel(request, policy, CancellationToken::new())
            .await
    }

    pub async fn dispatch_stream_with_cancel(
        &self,
        request: CanonicalRequest,
        policy: &RoutingPolicy,
        cancel: CancellationToken,
    ) -> Result<DispatchStream, DispatchError> {
        match self
            .execute(request, PolicySource::Given(policy.clone()), true, cancel)
            .await?
        {
            Dispatched::Stream(stream) => Ok(stream),
            Dispatched::Response(response) => Ok(DispatchStream::from_response(&response)),
        }
    }

    async fn execute(
        &self,
        mut request: CanonicalRequest,
        source: PolicySource,
        stream: bool,
        cancel: CancellationToken,
    ) -> Result<Dispatched, DispatchError> {
        let started = Instant::now();
        request.stream = stream;
        let checked = request.validate().map_err(DispatchError::from).and_then(|()| {
            match &source {
                PolicySource::Given(policy) => policy.validate().map_err(invalid_policy),
                PolicySource::Table => Ok(()),
            }
        });
        if let Err(error) = checked {
            SummaryDraft::new(&request, started, stream, false)
                .failed(&self.inner.events, &error)
                .await;
            return Err(error);
        }
        debug!(
            request_id = %request.id,
            model = %request.model,
            operation = %request.operation.as_str(),
            stream,
            "dispatch started"
        );

        let mut ctx = PluginContext::new(request);
        let ran = self.inner.plugins.run_pre(&mut ctx).await;
        let short_circuited = ctx.is_short_circuited();
        let mut committed = None;
        if !short_circuited {
            ctx.freeze();
            let policy = match source {
                PolicySource::Given(policy) => policy,
                PolicySource::Table => self
                    .inner
                    .policies
                    .load()
                    .for_model(&ctx.request().model)
                    .clone(),
            };
            let outcome = match self
                .run(ctx.request().clone(), policy, stream, started, cancel.clone())
                .await
            {
                Ok(Executed::Response(response)) => Outcome::Response(response),
                Ok(Executed::Stream(commit, deadline)) => {
                    let meta = StreamMeta {
                        provider: commit.draft.candidate.provider.clone(),
                        model: commit.draft.candidate.model.clone(),
                        credential_id: commit.credential.id,
                        attempts: commit.log.entries().to_vec(),
                    };
                    committed = Some((commit, deadline));
                    Outcome::Stream(meta)
                }
                Err(err) => Outcome::Error(err),
            };
            ctx.set_outcome(outcome);
        }
        self.inner.plugins.run_post(&mut ctx, ran).await;

        let mut summary = SummaryDraft::new(ctx.request(), started, stream, short_circuited);
        let outcome = ctx.take_outcome();
        if let Some((committed, deadline)) = committed {
            if let Some(Outcome::Stream(meta)) = outcome {
                let forwarder = Forwarder {
                    engine: self.inner.engine.clone(),
                    events: self.inner.events.clone(),
                    committed,
                    summary,
                    cancel,
                    deadline,
                };
                return Ok(Dispatched::Stream(forwarder.spawn(meta)));
            }
            summary = summary.with_prior_attempts(self.discard(committed).await);
        }

        match outcome {
            Some(Outcome::Response(response)) => {
                summary
                    .succeeded(
                        &self.inner.events,
                        (!short_circuited).then_some(response.provider.as_str()),
                        (!short_circuited).then_some(response.model.as_str()),
                        response.credential_id,
                        response.attempts.clone(),
                    )
                    .await;
                if stream {
                    Ok(Dispatched::Stream(DispatchStream::from_response(&response)))
                } else {
                    Ok(Dispatched::Response(response))
                }
            }
            Some(Outcome::Error(error)) => {
                summary.failed(&self.inner.events, &error).await;
                Err(error)
            }
            Some(Outcome::Stream(_)) | None => {
                let error = DispatchError::plugin("pipeline", "no usable outcome after plugins");
                summary.failed(&self.inner.events, &error).await;
                Err(error)
            }
        }
    }

    /// Closes a committed stream that a post plugin replaced. The credential
    /// is credited and the attempt is recorded as cancelled.
    async fn discard(&self, committed: Committed<StreamStart>) -> Vec<Attempt> {
        let Committed {
            output,
            credential,
            slot,
            draft,
            mut log,
        } = committed;
        drop(output);
        drop(slot);
        self.inner.engine.report_success(credential.id).await;
        log.push(draft.finish(
            Some(credential.id),
            AttemptOutcome::failed(ErrorKind::Cancelled, "stream replaced by post plugin"),
            None,
        ));
        debug!(
            request_id = %draft.request_id,
            provider = %draft.candidate.provider,
            credential_id = credential.id,
            "committed stream discarded"
        );
        log.into_vec()
    }

    async fn run(
        &self,
        request: CanonicalRequest,
        policy: RoutingPolicy,
        stream: bool,
        started: Instant,
        cancel: CancellationToken,
    ) -> Result<Executed, DispatchError> {
        request.validate()?;
        let deadline = policy
            .request_timeout()
            .and_then(|limit| started.checked_add(limit));
        let health = self.inner.pool.health();
        let candidates = self.inner.router.route(&request, &policy, &health)?;
        let scope = RunScope {
            request: Arc::new(request),
            policy,
            candidates,
            cancel,
            deadline,
        };

        if stream {
            let committed = self.inner.engine.run(&Streaming, &scope).await?;
            return Ok(Executed::Stream(committed, deadline));
        }

        let Committed {
            output,
            credential,
            slot,
            draft,
            mut log,
        } = self.inner.engine.run(&Buffered, &scope).await?;
        drop(slot);
        self.inner.engine.report_success(credential.id).await;
        log.push(draft.finish(Some(credential.id), AttemptOutcome::Success, None));
        Ok(Executed::Response(CanonicalResponse {
            request_id: draft.request_id,
            output: output.output,
            usage: output.usage,
            provider: draft.candidate.provider,
            model: draft.candidate.model,
            credential_id: Some(credential.id),
            latency: started.elapsed(),
            attempts: log.into_vec(),
        }))
    }
}

/// Caller-supplied policies are checked like request fields.
fn invalid_policy(err: ConfigError) -> DispatchError {
    let ConfigError::Invalid { field, message } = err;
    DispatchError::Validation(ValidationError::new(format!("policy.{field}"), message))
}
