//! Admission-controlled service gateway.
//!
//! Per-client rate limiting (sliding window or token bucket), a health-aware
//! service registry, round-robin endpoint selection and route resolution,
//! orchestrated by [`Gateway`]. The `handlers` module embeds it in an axum
//! server.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod routes;
pub mod state;
pub mod token_bucket;
pub mod worker;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewaySettings};
pub use health::{HealthChecker, HealthProbe, HttpProbe};
pub use models::{InboundRequest, Quota, Resolution, RoutingDecision};
pub use rate_limit::{Admission, AdmissionPolicy, SlidingWindowLimiter};
pub use registry::{HealthStatus, RegistrationMode};
pub use token_bucket::{TokenBucket, TokenBucketLimiter};
