use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRecord {
    pub path: String,
    pub service: String,
    pub methods: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RouteRecord {
    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Why a lookup did not produce a target service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMiss {
    NotFound,
    MethodNotAllowed { allowed: Vec<String> },
}

// Exact-path route table: path -> target service + allowed methods
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<String, RouteRecord>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the route at `path`. No methods means GET only.
    pub fn add_route(&self, path: &str, service: &str, methods: &[String]) {
        let mut methods: Vec<String> = methods
            .iter()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        if methods.is_empty() {
            methods.push("GET".to_string());
        }
        methods.sort();
        methods.dedup();

        info!(path, service, methods = ?methods, "route added");
        self.routes.insert(
            path.to_string(),
            RouteRecord {
                path: path.to_string(),
                service: service.to_string(),
                methods,
                created_at: Utc::now(),
            },
        );
    }

    pub fn remove_route(&self, path: &str) -> Option<RouteRecord> {
        let removed = self.routes.remove(path).map(|(_, route)| route);
        if removed.is_some() {
            info!(path, "route removed");
        }
        removed
    }

    pub fn lookup(&self, path: &str) -> Option<RouteRecord> {
        self.routes.get(path).map(|route| route.clone())
    }

    /// Target service for `method` on `path`.
    pub fn resolve(&self, path: &str, method: &str) -> Result<String, RouteMiss> {
        let route = self.routes.get(path).ok_or(RouteMiss::NotFound)?;
        if route.allows(method) {
            Ok(route.service.clone())
        } else {
            Err(RouteMiss::MethodNotAllowed {
                allowed: route.methods.clone(),
            })
        }
    }

    pub fn list(&self) -> Vec<RouteRecord> {
        let mut routes: Vec<RouteRecord> = self.routes.iter().map(|r| r.value().clone()).collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
