use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use switchyard_common::GovernorConfig;
use switchyard_provider_core::CredentialId;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SlotKey {
    pub provider: String,
    pub credential_id: CredentialId,
}

impl SlotKey {
    pub fn new(provider: impl Into<String>, credential_id: CredentialId) -> Self {
        Self {
            provider: provider.into(),
            credential_id,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.provider, self.credential_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernorError {
    #[error("slot queue for {scope} is full ({waiting} waiting)")]
    QueueFull { scope: String, waiting: usize },
    #[error("no slot for {scope} before the deadline")]
    DeadlineElapsed { scope: String },
    #[error("slot acquisition cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub peak: usize,
}

struct SlotPool {
    scope: String,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_waiters: usize,
    waiting: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the waiter count however the wait ends.
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SlotPool {
    fn new(scope: String, capacity: usize, max_waiters: usize) -> Self {
        Self {
            scope,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_waiters,
            waiting: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    fn note_acquired(&self) {
        self.peak.fetch_max(self.in_flight(), Ordering::AcqRel);
    }

    async fn acquire(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, GovernorError> {
        // Fails whenever others are already queued, so FIFO order holds.
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            self.note_acquired();
            return Ok(permit);
        }

        let waiting = self.waiting.fetch_add(1, Ordering::AcqRel);
        let _ticket = WaitTicket(&self.waiting);
        if waiting >= self.max_waiters {
            return Err(GovernorError::QueueFull {
                scope: self.scope.clone(),
                waiting,
            });
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GovernorError::Cancelled),
            res = timeout_at(deadline, self.semaphore.clone().acquire_owned()) => res,
        };
        match permit {
            Ok(Ok(permit)) => {
                self.note_acquired();
                Ok(permit)
            }
            // The semaphore is never closed; treat it like a timeout.
            Ok(Err(_)) | Err(_) => Err(GovernorError::DeadlineElapsed {
                scope: self.scope.clone(),
            }),
        }
    }

    fn stats(&self) -> SlotStats {
        SlotStats {
            capacity: self.capacity,
            in_flight: self.in_flight(),
            waiting: self.waiting.load(Ordering::Acquire),
            peak: self.peak.load(Ordering::Acquire),
        }
    }
}

/// A held concurrency slot. Released on drop.
pub struct Slot {
    key: SlotKey,
    _permit: OwnedSemaphorePermit,
    _global: Option<OwnedSemaphorePermit>,
}

impl Slot {
    pub fn key(&self) -> &SlotKey {
        &self.key
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("key", &self.key).finish()
    }
}

/// Bounded slot pools per (provider, credential), plus an optional global cap.
pub struct ConcurrencyGovernor {
    config: GovernorConfig,
    provider_capacity: HashMap<String, usize>,
    pools: Mutex<HashMap<SlotKey, Arc<SlotPool>>>,
    global: Option<SlotPool>,
}

impl ConcurrencyGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let global = config
            .global_slots
            .map(|cap| SlotPool::new("global".to_string(), cap, config.max_waiters));
        Self {
            config,
            provider_capacity: HashMap::new(),
            pools: Mutex::new(HashMap::new()),
            global,
        }
    }

    /// Per-credential capacity declared by a provider; overrides the default.
    pub fn with_provider_capacity(mut self, provider: impl Into<String>, capacity: usize) -> Self {
        self.provider_capacity
            .insert(provider.into(), capacity.max(1));
        self
    }

    pub fn capacity_for(&self, provider: &str) -> usize {
        self.provider_capacity
            .get(provider)
            .copied()
            .unwrap_or(self.config.per_credential_slots)
    }

    async fn pool(&self, key: &SlotKey) -> Arc<SlotPool> {
        let mut pools = self.pools.lock().await;
        pools
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(SlotPool::new(
                    key.to_string(),
                    self.capacity_for(&key.provider),
                    self.config.max_waiters,
                ))
            })
            .clone()
    }

    /// Waits FIFO for a slot until `deadline` or cancellation. Callers that
    /// arrive at a full wait queue are rejected at once.
    pub async fn acquire(
        &self,
        key: SlotKey,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Slot, GovernorError> {
        let pool = self.pool(&key).await;
        let permit = pool.acquire(deadline, cancel).await?;
        let global = match &self.global {
            Some(global) => Some(global.acquire(deadline, cancel).await?),
            None => None,
        };
        debug!(slot = %key, in_flight = pool.in_flight(), "slot acquired");
        Ok(Slot {
            key,
            _permit: permit,
            _global: global,
        })
    }

    pub async fn stats(&self, key: &SlotKey) -> Option<SlotStats> {
        let pools = self.pools.lock().await;
        pools.get(key).map(|pool| pool.stats())
    }

    pub fn global_stats(&self) -> Option<SlotStats> {
        self.global.as_ref().map(SlotPool::stats)
    }
}
