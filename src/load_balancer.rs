use std::sync::atomic::{AtomicUsize, Ordering};

// Round-robin selector with a single cursor shared by every service.
//
// The cursor wraps modulo the length of whatever list is passed in, so when
// the healthy set changes between calls an endpoint may be skipped or repeated.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    current: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
        }
    }

    // Next endpoint from the current healthy list
    pub fn select<'a>(&self, endpoints: &'a [String]) -> Option<&'a str> {
        if endpoints.is_empty() {
            return None;
        }
        let idx = self.current.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[idx].as_str())
    }
}
