mod admin;
mod health;
mod metrics;
mod proxy;

pub use admin::{routes_handler, services_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use proxy::{client_key, proxy_handler, rate_limit_headers};
