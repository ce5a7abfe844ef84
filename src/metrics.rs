use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of resolved requests").unwrap();
    pub static ref DECISIONS: CounterVec = register_counter_vec!(
        "gateway_decisions_total",
        "Routing decisions by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref RESOLVE_LATENCY: Histogram = register_histogram!(
        "gateway_resolve_latency_seconds",
        "Time spent resolving a request to a decision"
    )
    .unwrap();
    pub static ref HEALTH_PROBES: CounterVec = register_counter_vec!(
        "gateway_health_probes_total",
        "Health probes by result",
        &["result"]
    )
    .unwrap();
    pub static ref TRACKED_KEYS: Gauge =
        register_gauge!("gateway_limiter_tracked_keys", "Client keys held by the rate limiter").unwrap();
}

// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_gateway_metrics() {
        REQUEST_TOTAL.inc();
        DECISIONS.with_label_values(&["routed"]).inc();
        let text = render();
        assert!(text.contains("gateway_requests_total"));
        assert!(text.contains("gateway_decisions_total{outcome=\"routed\"}"));
    }
}
