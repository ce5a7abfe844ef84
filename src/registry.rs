use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::info;

pub const DEFAULT_HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// What happens when a name is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationMode {
    /// The new record replaces the old one.
    #[default]
    Overwrite,
    /// The second registration fails with `RegistryConflict`.
    Strict,
}

#[derive(Debug)]
pub struct ServiceRecord {
    pub name: String,
    pub endpoints: Vec<String>,
    pub health_path: String,
    pub status: HealthStatus,
    pub last_check: Option<Instant>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

impl ServiceRecord {
    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name.clone(),
            endpoints: self.endpoints.clone(),
            health_path: self.health_path.clone(),
            status: self.status,
            active: self.active,
            checked: self.last_check.is_some(),
            registered_at: self.registered_at,
        }
    }

    pub fn health_url(&self, endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), self.health_path)
    }
}

/// Point-in-time copy of a service record for admin listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub endpoints: Vec<String>,
    pub health_path: String,
    pub status: HealthStatus,
    pub active: bool,
    pub checked: bool,
    pub registered_at: DateTime<Utc>,
}

pub(crate) type SharedRecord = Arc<Mutex<ServiceRecord>>;

// Service name -> record. Each record carries its own lock so a slow health
// probe only ever holds the service it is checking.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, SharedRecord>,
    mode: RegistrationMode,
}

impl ServiceRegistry {
    pub fn new(mode: RegistrationMode) -> Self {
        Self {
            services: DashMap::new(),
            mode,
        }
    }

    pub fn register(
        &self,
        name: &str,
        endpoints: &[String],
        health_path: Option<&str>,
    ) -> GatewayResult<()> {
        let endpoints: Vec<String> = endpoints
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(normalize_endpoint)
            .collect();
        if endpoints.is_empty() {
            return Err(GatewayError::NoEndpoints(name.to_string()));
        }

        let record = ServiceRecord {
            name: name.to_string(),
            endpoints,
            health_path: normalize_path(health_path.unwrap_or(DEFAULT_HEALTH_PATH)),
            status: HealthStatus::Unknown,
            last_check: None,
            active: true,
            registered_at: Utc::now(),
        };
        let count = record.endpoints.len();

        match self.services.entry(name.to_string()) {
            Entry::Occupied(_) if self.mode == RegistrationMode::Strict => {
                return Err(GatewayError::RegistryConflict(name.to_string()));
            }
            Entry::Occupied(mut slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
                info!(service = name, endpoints = count, "service re-registered");
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
                info!(service = name, endpoints = count, "service registered");
            }
        }
        Ok(())
    }

    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.services.remove(name).is_some();
        if removed {
            info!(service = name, "service deregistered");
        }
        removed
    }

    pub async fn deactivate(&self, name: &str) -> GatewayResult<()> {
        self.set_active(name, false).await
    }

    pub async fn activate(&self, name: &str) -> GatewayResult<()> {
        self.set_active(name, true).await
    }

    async fn set_active(&self, name: &str, active: bool) -> GatewayResult<()> {
        let record = self
            .get(name)
            .ok_or_else(|| GatewayError::UnknownService(name.to_string()))?;
        record.lock().await.active = active;
        info!(service = name, active, "service activation changed");
        Ok(())
    }

    // Clone the handle out so the map shard is released before locking.
    pub(crate) fn get(&self, name: &str) -> Option<SharedRecord> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Endpoints of an active service whose last check passed.
    pub async fn healthy_endpoints(&self, name: &str) -> Vec<String> {
        let Some(record) = self.get(name) else {
            return Vec::new();
        };
        let record = record.lock().await;
        if record.active && record.status == HealthStatus::Healthy {
            record.endpoints.clone()
        } else {
            Vec::new()
        }
    }

    pub async fn status(&self, name: &str) -> Option<ServiceSnapshot> {
        let record = self.get(name)?;
        let snapshot = record.lock().await.snapshot();
        Some(snapshot)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn list(&self) -> Vec<ServiceSnapshot> {
        let handles: Vec<SharedRecord> = self
            .services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for record in handles {
            snapshots.push(record.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// add http:// if not present
fn normalize_endpoint(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn register_normalizes_endpoints() {
        let registry = ServiceRegistry::default();
        registry
            .register("users", &eps(&["localhost:9000", " https://b.internal/ ", ""]), Some("status"))
            .unwrap();

        let snapshot = registry.status("users").await.unwrap();
        assert_eq!(snapshot.endpoints, eps(&["http://localhost:9000", "https://b.internal"]));
        assert_eq!(snapshot.health_path, "/status");
        assert_eq!(snapshot.status, HealthStatus::Unknown);
        assert!(snapshot.active);
        assert!(!snapshot.checked);
    }

    #[tokio::test]
    async fn rejects_empty_endpoint_list() {
        let registry = ServiceRegistry::default();
        let err = registry.register("empty", &eps(&[" "]), None).unwrap_err();
        assert!(matches!(err, GatewayError::NoEndpoints(name) if name == "empty"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reregistration_overwrites_by_default() {
        let registry = ServiceRegistry::default();
        registry.register("svc", &eps(&["a:1"]), None).unwrap();
        registry.deactivate("svc").await.unwrap();

        registry.register("svc", &eps(&["b:2"]), None).unwrap();
        let snapshot = registry.status("svc").await.unwrap();
        assert_eq!(snapshot.endpoints, eps(&["http://b:2"]));
        assert!(snapshot.active);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn strict_mode_reports_conflict() {
        let registry = ServiceRegistry::new(RegistrationMode::Strict);
        registry.register("svc", &eps(&["a:1"]), None).unwrap();

        let err = registry.register("svc", &eps(&["b:2"]), None).unwrap_err();
        assert!(matches!(err, GatewayError::RegistryConflict(_)));
        let snapshot = registry.status("svc").await.unwrap();
        assert_eq!(snapshot.endpoints, eps(&["http://a:1"]));
    }

    #[tokio::test]
    async fn healthy_endpoints_require_active_and_healthy() {
        let registry = ServiceRegistry::default();
        registry.register("svc", &eps(&["a:1", "a:2"]), None).unwrap();
        assert!(registry.healthy_endpoints("svc").await.is_empty());

        registry.get("svc").unwrap().lock().await.status = HealthStatus::Healthy;
        assert_eq!(registry.healthy_endpoints("svc").await.len(), 2);

        registry.deactivate("svc").await.unwrap();
        assert!(registry.healthy_endpoints("svc").await.is_empty());

        registry.activate("svc").await.unwrap();
        assert_eq!(registry.healthy_endpoints("svc").await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_service_operations() {
        let registry = ServiceRegistry::default();
        assert!(matches!(
            registry.deactivate("ghost").await,
            Err(GatewayError::UnknownService(_))
        ));
        assert!(!registry.deregister("ghost"));
        assert!(registry.status("ghost").await.is_none());
        assert!(registry.healthy_endpoints("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let registry = ServiceRegistry::default();
        for name in ["orders", "billing", "users"] {
            registry.register(name, &eps(&["x:1"]), None).unwrap();
        }
        let names: Vec<String> = registry.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["billing", "orders", "users"]);
        assert_eq!(registry.names(), names);
    }

    #[test]
    fn health_url_joins_path() {
        let record = ServiceRecord {
            name: "svc".into(),
            endpoints: vec![],
            health_path: "/health".into(),
            status: HealthStatus::Unknown,
            last_check: None,
            active: true,
            registered_at: Utc::now(),
        };
        assert_eq!(record.health_url("http://a:1/"), "http://a:1/health");
    }
}
