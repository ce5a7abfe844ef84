use crate::metrics::TRACKED_KEYS;
use crate::rate_limit::AdmissionPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

// Background sweep that drops idle rate-limiter keys so per-client state
// does not grow without bound.
pub async fn eviction_worker(limiter: Arc<dyn AdmissionPolicy>, sweep_interval: Duration) {
    // tokio panics on a zero period
    let sweep_interval = sweep_interval.max(MIN_SWEEP_INTERVAL);
    let mut ticker = interval(sweep_interval);
    info!(interval = ?sweep_interval, "idle key eviction started");

    loop {
        ticker.tick().await;
        sweep(limiter.as_ref(), Instant::now());
    }
}

// One pass; returns how many keys were dropped
pub fn sweep(limiter: &dyn AdmissionPolicy, now: Instant) -> usize {
    let evicted = limiter.evict_idle(now);
    let remaining = limiter.tracked_keys();
    TRACKED_KEYS.set(remaining as f64);

    if evicted > 0 {
        debug!(evicted, remaining, "evicted idle rate limit keys");
    }
    evicted
}
