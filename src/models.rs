use crate::rate_limit::Admission;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

// Pre-parsed inbound request, as handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub client_key: String,
    pub method: String,
    pub path: String,
    pub now: Instant,
}

impl InboundRequest {
    pub fn new(
        client_key: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        now: Instant,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            method: method.into(),
            path: path.into(),
            now,
        }
    }
}

// Where a request should go, or why it was turned away
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    Routed { service: String, endpoint: String },
    NotFound,
    MethodNotAllowed { allowed: Vec<String> },
    ServiceUnavailable { service: String },
    RateLimited {
        #[serde(rename = "retry_after_secs", serialize_with = "serialize_secs")]
        retry_after: Option<Duration>,
    },
}

impl RoutingDecision {
    // metrics label
    pub fn outcome(&self) -> &'static str {
        match self {
            RoutingDecision::Routed { .. } => "routed",
            RoutingDecision::NotFound => "not_found",
            RoutingDecision::MethodNotAllowed { .. } => "method_not_allowed",
            RoutingDecision::ServiceUnavailable { .. } => "service_unavailable",
            RoutingDecision::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            RoutingDecision::Routed { .. } => 200,
            RoutingDecision::NotFound => 404,
            RoutingDecision::MethodNotAllowed { .. } => 405,
            RoutingDecision::ServiceUnavailable { .. } => 503,
            RoutingDecision::RateLimited { .. } => 429,
        }
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, RoutingDecision::Routed { .. })
    }
}

// Quota metadata for X-RateLimit-* headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Option<Duration>,
}

impl From<&Admission> for Quota {
    fn from(admission: &Admission) -> Self {
        Self {
            limit: admission.limit,
            remaining: admission.remaining,
            reset_after: admission.reset_after,
        }
    }
}

impl Quota {
    /// Unix time (seconds, rounded up) at which the quota is fully restored,
    /// measured from the wall clock reading `wall`.
    pub fn reset_at(&self, wall: DateTime<Utc>) -> Option<i64> {
        let reset_after = self.reset_after?;
        let secs = i64::try_from(ceil_secs(reset_after)).ok()?;
        wall.timestamp().checked_add(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: RoutingDecision,
    pub quota: Option<Quota>,
}

// Whole seconds, rounded up so clients never retry early
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

fn serialize_secs<S: serde::Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&ceil_secs(*duration)),
        None => serializer.serialize_none(),
    }
}
