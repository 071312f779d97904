//! Cancellable waits.
//!
//! Every pause in the engines goes through [`sleep_or_cancel`], so each
//! pause is also a cancellation checkpoint.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Uniform duration in `[min, max]` at millisecond granularity.
pub fn random_duration(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `true` when the full duration elapsed.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
