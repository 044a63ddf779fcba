use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use switchyard_common::PoolConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::ErrorKind;
use crate::events::{
    CredentialDisabledEvent, CredentialEnabledEvent, Event, EventHub, OperationalEvent,
    UnavailableEndEvent, UnavailableStartEvent,
};
use crate::provider::RateLimits;

use super::bucket::TokenBucket;
use super::snapshot::{CredentialHealth, HealthSnapshot};
use super::state::{CredentialId, CredentialState, UnavailableReason};
use super::unavailable_queue::UnavailableQueue;
use super::{CredentialHandle, CredentialSpec, SecretRef};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("provider {0} has no credential pool")]
    ProviderUnknown(String),
    #[error("provider {0} has no healthy credential")]
    NoHealthyCredential(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("credential {0} already exists")]
    Duplicate(CredentialId),
    #[error("credential {0} not found")]
    UnknownCredential(CredentialId),
    #[error("credential {0} must have a weight > 0")]
    ZeroWeight(CredentialId),
}

struct CredentialEntry {
    id: CredentialId,
    provider: String,
    secret: SecretRef,
    weight: u32,
    runtime: Mutex<Runtime>,
}

struct Runtime {
    state: CredentialState,
    transient_streak: u32,
    streak_started: Option<Instant>,
    last_used: Option<Instant>,
    bucket: Option<TokenBucket>,
}

#[derive(Default)]
struct ProviderCredentials {
    /// Insertion order; also the final tie-break during selection.
    credentials: Vec<Arc<CredentialEntry>>,
    rate_limits: RateLimits,
    /// Smooth weighted round-robin state, guarded per provider.
    selector: Arc<Mutex<HashMap<CredentialId, i64>>>,
}

#[derive(Default)]
struct Tables {
    providers: HashMap<String, ProviderCredentials>,
    by_id: HashMap<CredentialId, Arc<CredentialEntry>>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    events: EventHub,
    tables: RwLock<Tables>,
    health: ArcSwap<HealthSnapshot>,
    publish: Mutex<()>,
    queue: Arc<UnavailableQueue>,
}

/// Per-provider credential sets with health and local rate-limit state.
///
/// Mutation is serialized per credential; readers use the lock-free
/// [`HealthSnapshot`] from [`CredentialPool::health`].
/// Must be created inside a tokio runtime: it spawns the recovery task.
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    pub fn new(config: PoolConfig, events: EventHub) -> Self {
        let queue = Arc::new(UnavailableQueue::new());
        let inner = Arc::new(PoolInner {
            config,
            events,
            tables: RwLock::new(Tables::default()),
            health: ArcSwap::from_pointee(HealthSnapshot::default()),
            publish: Mutex::new(()),
            queue: queue.clone(),
        });
        queue.spawn_recover_task(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    /// Makes a provider known to the pool, with the limits applied to
    /// credentials inserted afterwards.
    pub async fn register_provider(&self, provider: impl Into<String>, rate_limits: RateLimits) {
        {
            let mut tables = self.inner.tables.write().await;
            tables.providers.entry(provider.into()).or_default().rate_limits = rate_limits;
        }
        self.inner.publish().await;
    }

    pub async fn insert(
        &self,
        provider: impl Into<String>,
        spec: CredentialSpec,
    ) -> Result<(), PoolError> {
        if spec.weight == 0 {
            return Err(PoolError::ZeroWeight(spec.id));
        }
        let provider = provider.into();
        {
            let mut tables = self.inner.tables.write().await;
            if tables.by_id.contains_key(&spec.id) {
                return Err(PoolError::Duplicate(spec.id));
            }
            let slot = tables.providers.entry(provider.clone()).or_default();
            let rpm = spec
                .requests_per_minute
                .or(slot.rate_limits.requests_per_minute);
            let entry = Arc::new(CredentialEntry {
                id: spec.id,
                provider: provider.clone(),
                secret: spec.secret,
                weight: spec.weight,
                runtime: Mutex::new(Runtime {
                    state: CredentialState::Healthy,
                    transient_streak: 0,
                    streak_started: None,
                    last_used: None,
                    bucket: rpm.map(|rpm| TokenBucket::per_minute(rpm, Instant::now())),
                }),
            });
            slot.credentials.push(entry.clone());
            tables.by_id.insert(spec.id, entry);
        }
        debug!(provider = %provider, credential_id = spec.id, "credential inserted");
        self.inner.publish().await;
        Ok(())
    }

    pub async fn remove(&self, id: CredentialId) -> Result<(), PoolError> {
        let selector = {
            let mut tables = self.inner.tables.write().await;
            let entry = tables
                .by_id
                .remove(&id)
                .ok_or(PoolError::UnknownCredential(id))?;
            tables.providers.get_mut(&entry.provider).map(|slot| {
                slot.credentials.retain(|c| c.id != id);
                slot.selector.clone()
            })
        };
        if let Some(selector) = selector {
            selector.lock().await.remove(&id);
        }
        info!(credential_id = id, "credential removed");
        self.inner.publish().await;
        Ok(())
    }

    /// Picks a credential for `provider` without waiting.
    ///
    /// Smooth weighted round-robin over the currently available credentials;
    /// ties go to the least recently used, then to insertion order. Credentials
    /// whose token bucket is empty are skipped.
    pub async fn acquire(&self, provider: &str) -> Result<CredentialHandle, AcquireError> {
        let (credentials, selector) = {
            let tables = self.inner.tables.read().await;
            let slot = tables
                .providers
                .get(provider)
                .ok_or_else(|| AcquireError::ProviderUnknown(provider.to_string()))?;
            (slot.credentials.clone(), slot.selector.clone())
        };

        let mut current = selector.lock().await;
        let now = Instant::now();
        let mut recovered = Vec::new();
        let mut eligible = Vec::with_capacity(credentials.len());
        for (position, entry) in credentials.iter().enumerate() {
            let mut rt = entry.runtime.lock().await;
            if !rt.state.is_available_at(now) {
                continue;
            }
            if rt.state.cooling_until().is_some() {
                rt.state = CredentialState::Healthy;
                recovered.push(entry.clone());
            }
            if let Some(bucket) = rt.bucket.as_mut()
                && !bucket.has_token(now)
            {
                continue;
            }
            eligible.push((position, entry.clone(), rt.last_used));
        }

        let chosen = loop {
            let Some(pick) = pick_smooth_weighted(&mut current, &eligible) else {
                break None;
            };
            let (_, entry, _) = &eligible[pick];
            let mut rt = entry.runtime.lock().await;
            let usable = rt.state.is_available_at(now)
                && rt.bucket.as_mut().is_none_or(|bucket| bucket.try_take(now));
            if usable {
                rt.last_used = Some(now);
                break Some(entry.clone());
            }
            // Lost a race with a concurrent report; try the others.
            drop(rt);
            eligible.remove(pick);
        };
        drop(current);

        for entry in &recovered {
            self.inner.emit_recovered(entry).await;
        }
        if !recovered.is_empty() {
            self.inner.publish().await;
        }

        let entry = chosen.ok_or_else(|| AcquireError::NoHealthyCredential(provider.to_string()))?;
        Ok(CredentialHandle {
            id: entry.id,
            provider: entry.provider.clone(),
            secret: entry.secret.clone(),
        })
    }

    pub async fn report_success(&self, id: CredentialId) {
        let Some(entry) = self.inner.entry(id).await else {
            debug!(credential_id = id, "success reported for unknown credential");
            return;
        };
        let mut rt = entry.runtime.lock().await;
        rt.transient_streak = 0;
        rt.streak_started = None;
    }

    /// Records a failed call. Terminal kinds disable the credential, transient
    /// kinds feed the circuit breaker, rate limits start a default cooldown.
    pub async fn report_failure(&self, id: CredentialId, kind: ErrorKind) {
        match kind {
            ErrorKind::TerminalCredential => {
                self.inner
                    .disable_entry(id, UnavailableReason::AuthInvalid)
                    .await;
            }
            ErrorKind::RateLimited => self.report_rate_limited(id, None).await,
            ErrorKind::Transient | ErrorKind::Timeout => {
                self.inner.record_transient(id).await;
            }
            _ => {}
        }
    }

    /// Cools the credential down for `retry_after`, or the configured default.
    pub async fn report_rate_limited(&self, id: CredentialId, retry_after: Option<Duration>) {
        let duration = retry_after.unwrap_or_else(|| self.inner.config.rate_limit_cooldown());
        self.inner
            .cool_down(id, duration, UnavailableReason::RateLimit)
            .await;
    }

    pub async fn disable(&self, id: CredentialId) -> Result<(), PoolError> {
        if self.inner.disable_entry(id, UnavailableReason::Manual).await {
            Ok(())
        } else {
            Err(PoolError::UnknownCredential(id))
        }
    }

    /// Clears a disabled state or cooldown and resets the breaker streak.
    pub async fn enable(&self, id: CredentialId) -> Result<(), PoolError> {
        let entry = self
            .inner
            .entry(id)
            .await
            .ok_or(PoolError::UnknownCredential(id))?;
        let changed = {
            let mut rt = entry.runtime.lock().await;
            rt.transient_streak = 0;
            rt.streak_started = None;
            let changed = rt.state != CredentialState::Healthy;
            rt.state = CredentialState::Healthy;
            changed
        };
        if changed {
            info!(provider = %entry.provider, credential_id = id, "credential enabled");
            self.inner
                .events
                .emit(Event::Operational(OperationalEvent::CredentialEnabled(
                    CredentialEnabledEvent {
                        at: SystemTime::now(),
                        provider: entry.provider.clone(),
                        credential_id: id,
                    },
                )))
                .await;
            self.inner.publish().await;
        }
        Ok(())
    }

    pub async fn state(&self, id: CredentialId) -> Option<CredentialState> {
        let entry = self.inner.entry(id).await?;
        let rt = entry.runtime.lock().await;
        Some(rt.state.clone())
    }

    /// Latest published health; lock-free.
    pub fn health(&self) -> Arc<HealthSnapshot> {
        self.inner.health.load_full()
    }
}

impl Drop for CredentialPool {
    fn drop(&mut self) {
        self.inner.queue.close();
    }
}

impl PoolInner {
    async fn entry(&self, id: CredentialId) -> Option<Arc<CredentialEntry>> {
        self.tables.read().await.by_id.get(&id).cloned()
    }

    async fn record_transient(&self, id: CredentialId) {
        let Some(entry) = self.entry(id).await else {
            return;
        };
        let now = Instant::now();
        let tripped = {
            let mut rt = entry.runtime.lock().await;
            let window = self.config.breaker_window();
            let stale = rt
                .streak_started
                .is_none_or(|start| now.saturating_duration_since(start) > window);
            if stale {
                rt.transient_streak = 0;
                rt.streak_started = Some(now);
            }
            rt.transient_streak += 1;
            let tripped = rt.transient_streak >= self.config.breaker_threshold;
            if tripped {
                rt.transient_streak = 0;
                rt.streak_started = None;
            }
            tripped
        };
        if tripped {
            warn!(
                provider = %entry.provider,
                credential_id = id,
                threshold = self.config.breaker_threshold,
                "circuit opened after consecutive transient failures"
            );
            self.cool_down(
                id,
                self.config.breaker_cooldown(),
                UnavailableReason::CircuitOpen,
            )
            .await;
        }
    }

    async fn cool_down(&self, id: CredentialId, duration: Duration, reason: UnavailableReason) {
        let Some(entry) = self.entry(id).await else {
            return;
        };
        let now = Instant::now();
        let max = self.config.max_cooldown();
        if duration > max {
            debug!(
                credential_id = id,
                requested_ms = duration.as_millis() as u64,
                max_ms = max.as_millis() as u64,
                "cooldown clamped"
            );
        }
        let Some(mut until) = now.checked_add(duration.min(max)) else {
            warn!(credential_id = id, "cooldown beyond clock range, ignored");
            return;
        };
        let until = {
            let mut rt = entry.runtime.lock().await;
            if rt.state.is_disabled() {
                return;
            }
            // An overlapping cooldown never shortens the one in force.
            if let Some(existing) = rt.state.cooling_until()
                && existing > until
            {
                until = existing;
            }
            rt.state = CredentialState::CoolingDown { until, reason };
            until
        };
        self.queue.push(until, id).await;
        warn!(
            provider = %entry.provider,
            credential_id = id,
            reason = ?reason,
            cooldown_ms = until.saturating_duration_since(now).as_millis() as u64,
            "credential cooling down"
        );
        let until_wall = SystemTime::now()
            .checked_add(until.saturating_duration_since(now))
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    provider: entry.provider.clone(),
                    credential_id: id,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
        self.publish().await;
    }

    /// Returns false when the credential does not exist.
    async fn disable_entry(&self, id: CredentialId, reason: UnavailableReason) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        {
            let mut rt = entry.runtime.lock().await;
            if rt.state == (CredentialState::Disabled { reason }) {
                return true;
            }
            rt.state = CredentialState::Disabled { reason };
            rt.transient_streak = 0;
            rt.streak_started = None;
        }
        warn!(
            provider = %entry.provider,
            credential_id = id,
            reason = ?reason,
            "credential disabled"
        );
        self.events
            .emit(Event::Operational(OperationalEvent::CredentialDisabled(
                CredentialDisabledEvent {
                    at: SystemTime::now(),
                    provider: entry.provider.clone(),
                    credential_id: id,
                    reason,
                },
            )))
            .await;
        self.publish().await;
        true
    }

    /// Called by the recovery task; stale heap entries fall through untouched.
    pub(crate) async fn recover_if_due(&self, id: CredentialId, now: Instant) {
        let Some(entry) = self.entry(id).await else {
            return;
        };
        let recovered = {
            let mut rt = entry.runtime.lock().await;
            match rt.state {
                CredentialState::CoolingDown { until, .. } if until <= now => {
                    rt.state = CredentialState::Healthy;
                    true
                }
                _ => false,
            }
        };
        if recovered {
            self.emit_recovered(&entry).await;
            self.publish().await;
        }
    }

    async fn emit_recovered(&self, entry: &CredentialEntry) {
        info!(
            provider = %entry.provider,
            credential_id = entry.id,
            "credential recovered"
        );
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableEnd(
                UnavailableEndEvent {
                    at: SystemTime::now(),
                    provider: entry.provider.clone(),
                    credential_id: entry.id,
                },
            )))
            .await;
    }

    /// Rebuilds and stores the health snapshot. Serialized so a slower
    /// rebuild can never overwrite a newer one.
    async fn publish(&self) {
        let _guard = self.publish.lock().await;
        let tables = self.tables.read().await;
        let mut providers = HashMap::with_capacity(tables.providers.len());
        for (name, slot) in &tables.providers {
            let mut list = Vec::with_capacity(slot.credentials.len());
            for entry in &slot.credentials {
                let rt = entry.runtime.lock().await;
                list.push(CredentialHealth {
                    id: entry.id,
                    weight: entry.weight,
                    state: rt.state.clone(),
                });
            }
            providers.insert(name.clone(), list);
        }
        self.health.store(Arc::new(HealthSnapshot { providers }));
    }
}

/// Smooth weighted round-robin step over `eligible`; returns the index picked.
fn pick_smooth_weighted(
    current: &mut HashMap<CredentialId, i64>,
    eligible: &[(usize, Arc<CredentialEntry>, Option<Instant>)],
) -> Option<usize> {
    if eligible.is_empty() {
        return None;
    }
    let total: i64 = eligible.iter().map(|(_, e, _)| i64::from(e.weight)).sum();
    let mut best: Option<usize> = None;
    for (idx, (position, entry, last_used)) in eligible.iter().enumerate() {
        let weight = current.entry(entry.id).or_insert(0);
        *weight += i64::from(entry.weight);
        let score = *weight;
        let better = match best {
            None => true,
            Some(b) => {
                let (b_position, b_entry, b_last_used) = &eligible[b];
                let b_score = current.get(&b_entry.id).copied().unwrap_or(0);
                score > b_score
                    || (score == b_score
                        && (last_used_rank(*last_used), *position)
                            < (last_used_rank(*b_last_used), *b_position))
            }
        };
        if better {
            best = Some(idx);
        }
    }
    let picked = best?;
    if let Some(weight) = current.get_mut(&eligible[picked].1.id) {
        *weight -= total;
    }
    Some(picked)
}

/// Never-used sorts before any timestamp.
fn last_used_rank(last_used: Option<Instant>) -> (bool, Option<Instant>) {
    (last_used.is_some(), last_used)
}
