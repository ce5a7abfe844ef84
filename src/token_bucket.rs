use crate::rate_limit::{Admission, AdmissionPolicy};
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use std::time::{Duration, Instant};
use tracing::info;

/// Continuous-refill bucket. Tokens stay within `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Spend `n` tokens if the refilled balance covers them; otherwise leave
    /// the balance untouched.
    pub fn consume(&mut self, n: u32, now: Instant) -> bool {
        self.refill(now);

        let cost = n as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn is_full(&self) -> bool {
        self.tokens >= self.capacity
    }

    // Time for the balance to reach `target` tokens, None if it never will.
    fn time_until(&self, target: f64) -> Option<Duration> {
        let deficit = target - self.tokens;
        if deficit <= 0.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 || target > self.capacity {
            return None;
        }
        // too slow to fit in a Duration counts as never
        Duration::try_from_secs_f64(deficit / self.refill_rate).ok()
    }
}

/// Per-client token buckets.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: u32,
    refill_rate: f64,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        info!(capacity, refill_rate, "token bucket limiter initialized");
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_rate,
        }
    }

    pub fn consume(&self, key: &str, n: u32, now: Instant) -> bool {
        self.bucket(key, now).consume(n, now)
    }

    /// Current balance after refilling up to `now`.
    pub fn tokens(&self, key: &str, now: Instant) -> f64 {
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                bucket.refill(now);
                bucket.tokens()
            }
            None => self.capacity as f64,
        }
    }

    fn bucket(&self, key: &str, now: Instant) -> RefMut<'_, String, TokenBucket> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_rate, now))
    }
}

impl AdmissionPolicy for TokenBucketLimiter {
    fn check(&self, key: &str, now: Instant) -> Admission {
        let mut bucket = self.bucket(key, now);
        let allowed = bucket.consume(1, now);

        Admission {
            allowed,
            limit: self.capacity,
            remaining: bucket.tokens().floor() as u32,
            reset_after: bucket.time_until(bucket.capacity()),
            retry_after: if allowed { None } else { bucket.time_until(1.0) },
        }
    }

    fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.refill(now);
            !bucket.is_full()
        });
        before.saturating_sub(self.buckets.len())
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
