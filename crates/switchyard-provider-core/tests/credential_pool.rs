use std::collections::HashMap;
use std::time::Duration;

use switchyard_common::PoolConfig;
use switchyard_provider_core::{
    AcquireError, CredentialPool, CredentialSpec, CredentialState, ErrorKind, Event, EventHub,
    OperationalEvent, PoolError, RateLimits, SecretRef, UnavailableReason,
};
use tokio::time::{Instant, advance, timeout};

fn spec(id: i64) -> CredentialSpec {
    CredentialSpec::new(id, SecretRef::new(format!("key-{id}")))
}

async fn pool_with(ids: &[i64]) -> CredentialPool {
    let pool = CredentialPool::new(PoolConfig::default(), EventHub::new(64));
    for id in ids {
        pool.insert("test", spec(*id)).await.unwrap();
    }
    pool
}

#[tokio::test(start_paused = true)]
async fn unavailable_recovers_via_queue() {
    let hub = EventHub::new(16);
    let mut rx = hub.subscribe();
    let pool = CredentialPool::new(PoolConfig::default(), hub.clone());
    pool.insert("test", spec(1)).await.unwrap();

    pool.report_rate_limited(1, Some(Duration::from_millis(50)))
        .await;

    let ev = timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        ev,
        Event::Operational(OperationalEvent::UnavailableStart(ref start))
            if start.reason == UnavailableReason::RateLimit && start.credential_id == 1
    ));

    let ev = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        ev,
        Event::Operational(OperationalEvent::UnavailableEnd(_))
    ));

    assert_eq!(pool.state(1).await, Some(CredentialState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn cooldown_boundary_is_exact() {
    let pool = pool_with(&[1]).await;
    pool.report_rate_limited(1, Some(Duration::from_secs(10)))
        .await;

    advance(Duration::from_secs(10) - Duration::from_millis(1)).await;
    assert_eq!(pool.health().available_count("test"), 0);
    assert_eq!(
        pool.acquire("test").await.unwrap_err(),
        AcquireError::NoHealthyCredential("test".into())
    );

    advance(Duration::from_millis(1)).await;
    assert_eq!(pool.health().available_count_at("test", Instant::now()), 1);
    assert_eq!(pool.acquire("test").await.unwrap().id, 1);
}

#[tokio::test(start_paused = true)]
async fn huge_retry_after_is_clamped_to_max_cooldown() {
    let config = PoolConfig {
        max_cooldown_ms: 120_000,
        ..PoolConfig::default()
    };
    let pool = CredentialPool::new(config, EventHub::new(16));
    pool.insert("test", spec(1)).await.unwrap();

    pool.report_rate_limited(1, Some(Duration::from_secs(u64::MAX)))
        .await;
    pool.report_rate_limited(1, Some(Duration::MAX)).await;

    let Some(CredentialState::CoolingDown { until, .. }) = pool.state(1).await else {
        panic!("expected cooldown");
    };
    assert_eq!(until - Instant::now(), Duration::from_secs(120));

    advance(Duration::from_secs(120)).await;
    assert_eq!(pool.acquire("test").await.unwrap().id, 1);
}

#[tokio::test(start_paused = true)]
async fn default_cooldown_applies_without_retry_after() {
    let pool = pool_with(&[1]).await;
    pool.report_failure(1, ErrorKind::RateLimited).await;

    let Some(CredentialState::CoolingDown { until, reason }) = pool.state(1).await else {
        panic!("expected cooldown");
    };
    assert_eq!(reason, UnavailableReason::RateLimit);
    assert_eq!(until - Instant::now(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn stale_queue_entry_does_not_recover_early() {
    let pool = pool_with(&[1]).await;

    pool.report_rate_limited(1, Some(Duration::from_millis(80)))
        .await;
    pool.report_rate_limited(1, Some(Duration::from_millis(200)))
        .await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(matches!(
        pool.state(1).await,
        Some(CredentialState::CoolingDown { .. })
    ));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.state(1).await, Some(CredentialState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn shorter_cooldown_never_shortens_active_one() {
    let pool = pool_with(&[1]).await;

    pool.report_rate_limited(1, Some(Duration::from_millis(200)))
        .await;
    pool.report_rate_limited(1, Some(Duration::from_millis(50)))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        pool.state(1).await,
        Some(CredentialState::CoolingDown { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_disables_until_enabled() {
    let hub = EventHub::new(16);
    let mut rx = hub.subscribe();
    let pool = CredentialPool::new(PoolConfig::default(), hub);
    pool.insert("test", spec(1)).await.unwrap();

    pool.report_failure(1, ErrorKind::TerminalCredential).await;
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::Operational(OperationalEvent::CredentialDisabled(_))
    ));

    advance(Duration::from_secs(3600)).await;
    assert_eq!(
        pool.state(1).await,
        Some(CredentialState::Disabled {
            reason: UnavailableReason::AuthInvalid
        })
    );
    assert!(pool.acquire("test").await.is_err());

    // A rate limit never downgrades a disabled credential to a cooldown.
    pool.report_rate_limited(1, Some(Duration::from_secs(1)))
        .await;
    assert!(pool.state(1).await.unwrap().is_disabled());

    pool.enable(1).await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::Operational(OperationalEvent::CredentialEnabled(_))
    ));
    assert_eq!(pool.acquire("test").await.unwrap().id, 1);
}

#[tokio::test(start_paused = true)]
async fn consecutive_transient_failures_open_circuit() {
    let pool = pool_with(&[1]).await;

    pool.report_failure(1, ErrorKind::Transient).await;
    pool.report_failure(1, ErrorKind::Timeout).await;
    pool.report_success(1).await;
    pool.report_failure(1, ErrorKind::Transient).await;
    pool.report_failure(1, ErrorKind::Transient).await;
    assert_eq!(pool.state(1).await, Some(CredentialState::Healthy));

    pool.report_failure(1, ErrorKind::Transient).await;
    let Some(CredentialState::CoolingDown { until, reason }) = pool.state(1).await else {
        panic!("expected circuit to open");
    };
    assert_eq!(reason, UnavailableReason::CircuitOpen);
    assert_eq!(until - Instant::now(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn failures_outside_window_do_not_accumulate() {
    let pool = pool_with(&[1]).await;

    pool.report_failure(1, ErrorKind::Transient).await;
    pool.report_failure(1, ErrorKind::Transient).await;
    advance(Duration::from_secs(61)).await;
    pool.report_failure(1, ErrorKind::Transient).await;
    assert_eq!(pool.state(1).await, Some(CredentialState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn non_health_kinds_are_ignored() {
    let pool = pool_with(&[1]).await;
    for _ in 0..5 {
        pool.report_failure(1, ErrorKind::Validation).await;
        pool.report_failure(1, ErrorKind::Backpressure).await;
    }
    assert_eq!(pool.state(1).await, Some(CredentialState::Healthy));
}

#[tokio::test(start_paused = true)]
async fn equal_weights_rotate() {
    let pool = pool_with(&[1, 2, 3]).await;
    let mut picks = Vec::new();
    for _ in 0..6 {
        picks.push(pool.acquire("test").await.unwrap().id);
    }
    assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn weighted_round_robin_is_proportional() {
    let pool = CredentialPool::new(PoolConfig::default(), EventHub::new(16));
    pool.insert("test", spec(1).with_weight(3)).await.unwrap();
    pool.insert("test", spec(2).with_weight(1)).await.unwrap();

    let mut counts: HashMap<i64, usize> = HashMap::new();
    let mut longest_run = 0;
    let mut run = 0;
    let mut last = None;
    for _ in 0..40 {
        let id = pool.acquire("test").await.unwrap().id;
        *counts.entry(id).or_default() += 1;
        run = if last == Some(id) { run + 1 } else { 1 };
        longest_run = longest_run.max(run);
        last = Some(id);
    }
    assert_eq!(counts[&1], 30);
    assert_eq!(counts[&2], 10);
    // Smooth: the heavy credential never monopolizes a long stretch.
    assert!(longest_run <= 3);
}

#[tokio::test(start_paused = true)]
async fn cooling_credential_is_skipped() {
    let pool = pool_with(&[1, 2]).await;
    pool.report_rate_limited(1, Some(Duration::from_secs(5)))
        .await;
    for _ in 0..3 {
        assert_eq!(pool.acquire("test").await.unwrap().id, 2);
    }
}

#[tokio::test(start_paused = true)]
async fn empty_token_bucket_is_skipped() {
    let pool = CredentialPool::new(PoolConfig::default(), EventHub::new(16));
    pool.register_provider(
        "test",
        RateLimits {
            requests_per_minute: Some(1),
            max_concurrency: None,
        },
    )
    .await;
    pool.insert("test", spec(1)).await.unwrap();

    assert_eq!(pool.acquire("test").await.unwrap().id, 1);
    assert!(matches!(
        pool.acquire("test").await,
        Err(AcquireError::NoHealthyCredential(_))
    ));
    advance(Duration::from_secs(61)).await;
    assert_eq!(pool.acquire("test").await.unwrap().id, 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_and_empty_providers_differ() {
    let pool = CredentialPool::new(PoolConfig::default(), EventHub::new(16));
    pool.register_provider("empty", RateLimits::default()).await;

    assert_eq!(
        pool.acquire("nope").await.unwrap_err(),
        AcquireError::ProviderUnknown("nope".into())
    );
    assert_eq!(
        pool.acquire("empty").await.unwrap_err(),
        AcquireError::NoHealthyCredential("empty".into())
    );
    assert!(pool.health().knows("empty"));
    assert_eq!(pool.health().available_count("empty"), 0);
}

#[tokio::test(start_paused = true)]
async fn operator_changes_show_in_snapshot() {
    let pool = pool_with(&[1, 2]).await;
    assert_eq!(pool.insert("test", spec(2)).await, Err(PoolError::Duplicate(2)));
    assert_eq!(
        pool.insert("test", spec(9).with_weight(0)).await,
        Err(PoolError::ZeroWeight(9))
    );

    pool.disable(1).await.unwrap();
    let health = pool.health();
    assert_eq!(health.credentials("test").len(), 2);
    assert_eq!(health.available_count("test"), 1);

    pool.remove(2).await.unwrap();
    assert_eq!(pool.health().credentials("test").len(), 1);
    assert_eq!(pool.health().available_count("test"), 0);
    assert_eq!(pool.remove(2).await, Err(PoolError::UnknownCredential(2)));
}
