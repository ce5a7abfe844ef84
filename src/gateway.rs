use crate::error::{GatewayError, GatewayResult};
use crate::health::{DEFAULT_CHECK_INTERVAL, DEFAULT_PROBE_TIMEOUT, HealthChecker, HealthProbe};
use crate::load_balancer::LoadBalancer;
use crate::metrics::{DECISIONS, REQUEST_TOTAL, RESOLVE_LATENCY};
use crate::models::{InboundRequest, Quota, Resolution, RoutingDecision};
use crate::rate_limit::{AdmissionPolicy, SlidingWindowLimiter};
use crate::registry::{RegistrationMode, ServiceRegistry, ServiceSnapshot};
use crate::routes::{RouteMiss, RouteRecord, RouteTable};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    pub registration_mode: RegistrationMode,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            health_interval: DEFAULT_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            registration_mode: RegistrationMode::Overwrite,
        }
    }
}

/// A route joined with the state of the service it targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    pub path: String,
    pub service: String,
    pub methods: Vec<String>,
    pub endpoints: Vec<String>,
    pub active: bool,
}

/// Resolves inbound requests to a backend endpoint or a rejection.
///
/// A request goes through the rate check, route lookup, service lookup, health
/// filter and balancer, in that order, and stops at the first stage that
/// rejects it. The gateway never retries.
pub struct Gateway {
    limiter: Arc<dyn AdmissionPolicy>,
    registry: Arc<ServiceRegistry>,
    health: HealthChecker,
    routes: RouteTable,
    balancer: LoadBalancer,
    blocklist: Option<Arc<SlidingWindowLimiter>>,
}

impl Gateway {
    pub fn new(
        limiter: Arc<dyn AdmissionPolicy>,
        probe: Arc<dyn HealthProbe>,
        settings: GatewaySettings,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new(settings.registration_mode));
        let health = HealthChecker::new(
            Arc::clone(&registry),
            probe,
            settings.health_interval,
            settings.probe_timeout,
        );
        Self {
            limiter,
            registry,
            health,
            routes: RouteTable::new(),
            balancer: LoadBalancer::new(),
            blocklist: None,
        }
    }

    /// Gateway backed by a sliding-window limiter, which also enables client
    /// blocking.
    pub fn with_sliding_window(
        limiter: Arc<SlidingWindowLimiter>,
        probe: Arc<dyn HealthProbe>,
        settings: GatewaySettings,
    ) -> Self {
        let mut gateway = Self::new(limiter.clone(), probe, settings);
        gateway.blocklist = Some(limiter);
        gateway
    }

    pub async fn resolve(&self, request: &InboundRequest) -> Resolution {
        let start = Instant::now();
        REQUEST_TOTAL.inc();

        let resolution = self.decide(request).await;

        DECISIONS
            .with_label_values(&[resolution.decision.outcome()])
            .inc();
        RESOLVE_LATENCY.observe(start.elapsed().as_secs_f64());

        if resolution.decision.is_routed() {
            debug!(
                client = %request.client_key,
                method = %request.method,
                path = %request.path,
                decision = ?resolution.decision,
                "request routed"
            );
        } else {
            info!(
                client = %request.client_key,
                method = %request.method,
                path = %request.path,
                outcome = resolution.decision.outcome(),
                "request rejected"
            );
        }
        resolution
    }

    async fn decide(&self, request: &InboundRequest) -> Resolution {
        let admission = self.limiter.check(&request.client_key, request.now);
        let quota = Some(Quota::from(&admission));
        let decided = |decision| Resolution { decision, quota };

        if !admission.allowed {
            return decided(RoutingDecision::RateLimited {
                retry_after: admission.retry_after,
            });
        }

        let service = match self.routes.resolve(&request.path, &request.method) {
            Ok(service) => service,
            Err(RouteMiss::NotFound) => return decided(RoutingDecision::NotFound),
            Err(RouteMiss::MethodNotAllowed { allowed }) => {
                return decided(RoutingDecision::MethodNotAllowed { allowed });
            }
        };

        // missing and inactive services come back empty without a probe
        let endpoints = self.health.available_endpoints(&service, request.now).await;

        match self.balancer.select(&endpoints) {
            Some(endpoint) => decided(RoutingDecision::Routed {
                endpoint: endpoint.to_string(),
                service,
            }),
            None => decided(RoutingDecision::ServiceUnavailable { service }),
        }
    }

    pub fn register_service(
        &self,
        name: &str,
        endpoints: &[String],
        health_path: Option<&str>,
    ) -> GatewayResult<()> {
        self.registry.register(name, endpoints, health_path)
    }

    pub async fn deactivate_service(&self, name: &str) -> GatewayResult<()> {
        self.registry.deactivate(name).await
    }

    pub async fn activate_service(&self, name: &str) -> GatewayResult<()> {
        self.registry.activate(name).await
    }

    pub fn deregister_service(&self, name: &str) -> GatewayResult<()> {
        if self.registry.deregister(name) {
            Ok(())
        } else {
            Err(GatewayError::UnknownService(name.to_string()))
        }
    }

    pub fn add_route(&self, path: &str, service: &str, methods: &[String]) {
        self.routes.add_route(path, service, methods);
    }

    pub fn remove_route(&self, path: &str) -> GatewayResult<RouteRecord> {
        self.routes
            .remove_route(path)
            .ok_or_else(|| GatewayError::UnknownRoute(path.to_string()))
    }

    pub async fn list_services(&self) -> Vec<ServiceSnapshot> {
        self.registry.list().await
    }

    pub fn list_routes(&self) -> Vec<RouteRecord> {
        self.routes.list()
    }

    pub async fn route_info(&self, path: &str) -> Option<RouteInfo> {
        let route = self.routes.lookup(path)?;
        let service = self.registry.status(&route.service).await;
        Some(RouteInfo {
            path: route.path,
            service: route.service,
            methods: route.methods,
            endpoints: service.as_ref().map(|s| s.endpoints.clone()).unwrap_or_default(),
            active: service.is_some_and(|s| s.active),
        })
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Reject every request from `client_key` until `until`. Only available
    /// with the sliding-window limiter; returns false otherwise.
    pub fn block_client(&self, client_key: &str, until: Instant) -> bool {
        match &self.blocklist {
            Some(limiter) => {
                limiter.block(client_key, until);
                true
            }
            None => false,
        }
    }

    pub fn unblock_client(&self, client_key: &str) -> bool {
        self.blocklist
            .as_ref()
            .is_some_and(|limiter| limiter.unblock(client_key))
    }

    pub fn evict_idle(&self, now: Instant) -> usize {
        self.limiter.evict_idle(now)
    }

    pub fn limiter(&self) -> Arc<dyn AdmissionPolicy> {
        Arc::clone(&self.limiter)
    }
}
