use std::time::Duration;

use rand::Rng;
use switchyard_provider_core::RetryPolicy;

const MAX_SHIFT: u32 = 20;

/// Delay before retry number `retry` (0-based) of the same candidate:
/// `min(base * 2^retry, max) + jitter`, with jitter in `[0, ratio * base)`.
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let base = policy.base_delay();
    let exponential = base.saturating_mul(1u32 << retry.min(MAX_SHIFT));
    let capped = exponential.min(policy.max_delay());

    let ratio = if policy.jitter_ratio.is_finite() {
        policy.jitter_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let jitter_ceiling = base.mul_f64(ratio);
    let jitter = if jitter_ceiling.is_zero() {
        Duration::ZERO
    } else {
        let nanos = u64::try_from(jitter_ceiling.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::rng().random_range(0..nanos))
    };
    capped.saturating_add(jitter)
}
