//! Helpers for scheduling collection and flush cycles.

use std::time::Duration;

use rand::Rng;

/// Returns a random duration in `[0, max]`.
///
/// Used to spread out gathers and flushes of many plugins with identical intervals.
pub fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }

    let nanos = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(0..=nanos))
}

/// Sleeps for a random duration of up to `max`.
pub async fn sleep_jitter(max: Duration) {
    let jitter = random_jitter(max);
    if !jitter.is_zero() {
        tokio::time::sleep(jitter).await;
    }
}
