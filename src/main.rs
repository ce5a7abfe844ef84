use axum::{Router, routing::get};
use clap::Parser; // for cli
use service_gateway::config::{Args, Definitions, LimiterKind};
use service_gateway::handlers::{
    health_handler, metrics_handler, proxy_handler, routes_handler, services_handler,
};
use service_gateway::state::AppState;
use service_gateway::worker::eviction_worker;
use service_gateway::{Gateway, HttpProbe, SlidingWindowLimiter, TokenBucketLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// upstream requests get a generous ceiling, health probes have their own
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse cli arguments
    let args = Args::parse();
    let settings = args.settings();
    let client = reqwest::Client::new();
    let probe = Arc::new(HttpProbe::new(client.clone(), settings.probe_timeout));

    let gateway = match args.limiter {
        LimiterKind::SlidingWindow => {
            let limiter = Arc::new(SlidingWindowLimiter::new(
                args.rate_limit,
                Duration::from_secs(args.rate_window),
            ));
            Gateway::with_sliding_window(limiter, probe, settings)
        }
        LimiterKind::TokenBucket => {
            let limiter = Arc::new(TokenBucketLimiter::new(args.bucket_capacity, args.refill_rate));
            Gateway::new(limiter, probe, settings)
        }
    };
    let gateway = Arc::new(gateway);

    if let Some(path) = &args.definitions {
        Definitions::from_path(path)?.apply(&gateway).await?;
    }

    // spawn the idle key sweeper
    tokio::spawn(eviction_worker(
        gateway.limiter(),
        Duration::from_secs(args.sweep_interval),
    ));

    let state = Arc::new(AppState {
        gateway,
        client,
        upstream_timeout: UPSTREAM_TIMEOUT,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/services", get(services_handler))
        .route("/admin/routes", get(routes_handler))
        .fallback(proxy_handler)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, "gateway listening");
    info!(limiter = ?args.limiter, "admission policy");
    info!(
        health_interval = args.health_interval,
        probe_timeout = args.probe_timeout,
        "health checks are lazy and interval bound"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
