use crate::metrics::HEALTH_PROBES;
use crate::registry::{HealthStatus, ServiceRecord, ServiceRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes a single health URL.
///
/// Failures of any kind are reported as `false`; the checker never sees an
/// error.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// GET the health URL and treat any 2xx as healthy.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                warn!(url, error = %e, "health probe failed");
                false
            }
        }
    }
}

// Lazy health checking: a service is only probed when someone asks about it
// and its cached status is older than `interval`.
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            interval,
            probe_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cached status while fresh, otherwise probe endpoints in order until one
    /// passes. `None` if the service is not registered.
    pub async fn check_health(&self, name: &str, now: Instant) -> Option<HealthStatus> {
        let record = self.registry.get(name)?;
        let mut record = record.lock().await;
        Some(self.refresh(&mut record, now).await)
    }

    /// Endpoints of `name` if it is active and healthy, refreshing a stale
    /// status first. Inactive services are never probed.
    pub async fn available_endpoints(&self, name: &str, now: Instant) -> Vec<String> {
        let Some(record) = self.registry.get(name) else {
            return Vec::new();
        };
        // status and endpoints come from the same record even if the service
        // is re-registered concurrently
        let mut record = record.lock().await;
        if !record.active {
            return Vec::new();
        }
        match self.refresh(&mut record, now).await {
            HealthStatus::Healthy => record.endpoints.clone(),
            _ => Vec::new(),
        }
    }

    // Called with the record lock held: concurrent callers wait and then see
    // the fresh result instead of probing again.
    async fn refresh(&self, record: &mut ServiceRecord, now: Instant) -> HealthStatus {
        if let Some(last) = record.last_check {
            if now.saturating_duration_since(last) < self.interval {
                return record.status;
            }
        }

        let mut status = HealthStatus::Unhealthy;
        for endpoint in &record.endpoints {
            let url = record.health_url(endpoint);
            if self.probe_once(&url).await {
                status = HealthStatus::Healthy;
                break;
            }
        }

        if record.status != status {
            match status {
                HealthStatus::Healthy => info!(service = %record.name, "service is now healthy"),
                _ => warn!(service = %record.name, "service is now unhealthy"),
            }
        }
        record.status = status;
        record.last_check = Some(now);
        status
    }

    async fn probe_once(&self, url: &str) -> bool {
        let healthy = match timeout(self.probe_timeout, self.probe.probe(url)).await {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!(url, timeout = ?self.probe_timeout, "health probe timed out");
                false
            }
        };
        debug!(url, healthy, "health probe finished");
        let label = if healthy { "healthy" } else { "unhealthy" };
        HEALTH_PROBES.with_label_values(&[label]).inc();
        healthy
    }

    /// Every active service that passes its health check, with its endpoints.
    pub async fn healthy_services(&self, now: Instant) -> Vec<(String, Vec<String>)> {
        let mut healthy = Vec::new();
        for name in self.registry.names() {
            let endpoints = self.available_endpoints(&name, now).await;
            if !endpoints.is_empty() {
                healthy.push((name, endpoints));
            }
        }
        healthy
    }
}
