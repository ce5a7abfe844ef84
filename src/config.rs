use crate::error::{ConfigSource, GatewayError, GatewayResult};
use crate::gateway::{Gateway, GatewaySettings};
use crate::registry::RegistrationMode;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LimiterKind {
    SlidingWindow,
    TokenBucket,
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "service-gateway")]
#[command(about = "Rate-limited, health-aware service gateway")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // JSON file with service and route definitions
    #[arg(short, long)]
    pub definitions: Option<PathBuf>,

    // Admission policy applied per client
    #[arg(long, value_enum, default_value_t = LimiterKind::SlidingWindow)]
    pub limiter: LimiterKind,

    // Rate limit max requests per window
    #[arg(long, default_value_t = 10)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window: u64,

    // Token bucket capacity
    #[arg(long, default_value_t = 10)]
    pub bucket_capacity: u32,

    // Token bucket refill, tokens per second
    #[arg(long, default_value_t = 1.0, value_parser = positive_rate)]
    pub refill_rate: f64,

    // Health check interval in seconds
    #[arg(long, default_value_t = 30)]
    pub health_interval: u64,

    // Per-probe timeout in seconds
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout: u64,

    // Idle key sweep interval in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval: u64,

    // Reject duplicate service registrations instead of overwriting
    #[arg(long)]
    pub strict_registration: bool,
}

fn positive_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(format!("refill rate must be a positive number, got {raw}"))
    }
}

impl Args {
    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            health_interval: Duration::from_secs(self.health_interval),
            probe_timeout: Duration::from_secs(self.probe_timeout),
            registration_mode: if self.strict_registration {
                RegistrationMode::Strict
            } else {
                RegistrationMode::Overwrite
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Definitions {
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub health_path: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteDefinition {
    pub path: String,
    pub service: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl Definitions {
    pub fn from_path(path: &Path) -> GatewayResult<Self> {
        let config_err = |source: ConfigSource| GatewayError::Config {
            path: path.to_path_buf(),
            source,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| config_err(e.into()))?;
        serde_json::from_str(&raw).map_err(|e| config_err(e.into()))
    }

    /// Register every service and route. Stops at the first registry error.
    pub async fn apply(&self, gateway: &Gateway) -> GatewayResult<()> {
        for service in &self.services {
            gateway.register_service(
                &service.name,
                &service.endpoints,
                service.health_path.as_deref(),
            )?;
            if !service.active {
                gateway.deactivate_service(&service.name).await?;
            }
        }
        for route in &self.routes {
            gateway.add_route(&route.path, &route.service, &route.methods);
        }
        info!(
            services = self.services.len(),
            routes = self.routes.len(),
            "definitions applied"
        );
        Ok(())
    }
}
