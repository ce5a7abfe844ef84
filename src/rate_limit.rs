use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one admission check, with the quota metadata the HTTP layer
/// turns into `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the key's quota is fully restored.
    pub reset_after: Option<Duration>,
    /// Set on rejection: how long until a retry can succeed.
    pub retry_after: Option<Duration>,
}

/// Per-client admission control shared by every request handler.
///
/// Implementations must make each `check` atomic per key.
pub trait AdmissionPolicy: Send + Sync {
    fn check(&self, key: &str, now: Instant) -> Admission;

    /// Drop keys whose state is indistinguishable from a fresh key.
    fn evict_idle(&self, now: Instant) -> usize;

    fn tracked_keys(&self) -> usize;
}

// Rate window - admitted timestamps for one key
#[derive(Debug, Default)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self.hits.front().is_some_and(|t| *t < cutoff) {
            self.hits.pop_front();
        }
    }

    fn active_block(&mut self, now: Instant) -> Option<Instant> {
        match self.blocked_until {
            Some(until) if now < until => Some(until),
            Some(_) => {
                self.blocked_until = None;
                None
            }
            None => None,
        }
    }
}

/// Sliding-window limiter: at most `max_requests` admissions per key within
/// any trailing `window`.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, RateWindow>,
    max_requests: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        info!(max_requests, window = ?window, "sliding window limiter initialized");
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allow(&self, key: &str, now: Instant) -> bool {
        self.check(key, now).allowed
    }

    pub fn remaining(&self, key: &str, now: Instant) -> u32 {
        match self.windows.get_mut(key) {
            Some(mut entry) => {
                entry.prune(now, self.window);
                self.max_requests.saturating_sub(entry.hits.len() as u32)
            }
            None => self.max_requests,
        }
    }

    /// When the oldest retained admission leaves the window, `None` once the
    /// window is empty.
    pub fn reset_time(&self, key: &str, now: Instant) -> Option<Instant> {
        let mut entry = self.windows.get_mut(key)?;
        entry.prune(now, self.window);
        entry.hits.front().map(|oldest| *oldest + self.window)
    }

    /// Reject every request from `key` until `until`.
    pub fn block(&self, key: &str, until: Instant) {
        self.windows.entry(key.to_string()).or_default().blocked_until = Some(until);
        warn!(key, "client blocked");
    }

    pub fn unblock(&self, key: &str) -> bool {
        let unblocked = self
            .windows
            .get_mut(key)
            .and_then(|mut entry| entry.blocked_until.take())
            .is_some();
        if unblocked {
            info!(key, "client unblocked");
        }
        unblocked
    }

    fn reset_after(&self, window: &RateWindow, now: Instant) -> Option<Duration> {
        window
            .hits
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }
}

impl AdmissionPolicy for SlidingWindowLimiter {
    fn check(&self, key: &str, now: Instant) -> Admission {
        // Entry guard keeps the shard locked across prune + append.
        let mut entry = self.windows.entry(key.to_string()).or_default();

        if let Some(until) = entry.active_block(now) {
            return Admission {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_after: Some(until.saturating_duration_since(now)),
                retry_after: Some(until.saturating_duration_since(now)),
            };
        }

        entry.prune(now, self.window);

        let allowed = (entry.hits.len() as u32) < self.max_requests;
        if allowed {
            entry.hits.push_back(now);
        }

        let reset_after = self.reset_after(&entry, now);
        Admission {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.hits.len() as u32),
            reset_after,
            retry_after: if allowed {
                None
            } else {
                Some(reset_after.unwrap_or(self.window))
            },
        }
    }

    fn evict_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| {
            if entry.active_block(now).is_some() {
                return true;
            }
            entry.prune(now, self.window);
            !entry.hits.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
