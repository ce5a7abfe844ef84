use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use crate::models::{InboundRequest, Quota, RoutingDecision, ceil_secs};
use crate::state::AppState;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// headers that describe this hop only and must not be copied across
const HOP_BY_HOP: [HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::HOST,
];

// Fallback handler: every request that is not an admin endpoint is resolved
// by the gateway and, when routed, forwarded to the chosen endpoint.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest::new(
        client_key(&headers, addr),
        method.as_str(),
        uri.path(),
        Instant::now(),
    );
    let resolution = state.gateway.resolve(&request).await;

    let mut response = match &resolution.decision {
        RoutingDecision::Routed { endpoint, .. } => {
            forward(&state, endpoint, method, &uri, headers, body).await
        }
        decision => rejection(decision),
    };

    if let Some(quota) = &resolution.quota {
        response
            .headers_mut()
            .extend(rate_limit_headers(quota, Utc::now()));
    }
    response
}

async fn forward(
    state: &AppState,
    endpoint: &str,
    method: Method,
    uri: &Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("{endpoint}{path}");
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }

    let result = state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .timeout(state.upstream_timeout)
        .send()
        .await;

    let res = match result {
        Ok(res) => res,
        Err(e) => {
            warn!(url, error = %e, "upstream request failed");
            return bad_gateway();
        }
    };

    let status = res.status();
    let mut upstream_headers = res.headers().clone();
    for name in &HOP_BY_HOP {
        upstream_headers.remove(name);
    }

    match res.bytes().await {
        Ok(bytes) => {
            let mut response = (status, bytes).into_response();
            response.headers_mut().extend(upstream_headers);
            response
        }
        Err(e) => {
            warn!(url, error = %e, "failed to read upstream response");
            bad_gateway()
        }
    }
}

fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({"error": "upstream request failed"})),
    )
        .into_response()
}

// Translate a rejection into its HTTP response
pub fn rejection(decision: &RoutingDecision) -> Response {
    let status =
        StatusCode::from_u16(decision.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(decision)).into_response();

    match decision {
        RoutingDecision::MethodNotAllowed { allowed } => {
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        RoutingDecision::RateLimited {
            retry_after: Some(retry_after),
        } => {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(ceil_secs(*retry_after)));
        }
        _ => {}
    }
    response
}

// X-RateLimit-Reset is a unix timestamp, 0 when there is nothing to reset
pub fn rate_limit_headers(quota: &Quota, wall: DateTime<Utc>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    let reset = quota.reset_at(wall).unwrap_or(0);
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
    headers
}

// First X-Forwarded-For hop, else the peer address
pub fn client_key(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, GatewaySettings};
    use crate::health::tests::FakeProbe;
    use crate::rate_limit::SlidingWindowLimiter;
    use axum::{Router, routing::post};
    use std::time::Duration;

    // Gateway routing POST /orders to `upstream`, which always passes health checks.
    fn state_for(upstream: SocketAddr) -> Arc<AppState> {
        let probe = Arc::new(FakeProbe::passing(&[&format!("http://{upstream}/health")]));
        let limiter = Arc::new(SlidingWindowLimiter::new(10, Duration::from_secs(60)));
        let gateway = Gateway::with_sliding_window(limiter, probe, GatewaySettings::default());
        gateway
            .register_service("orders", &[upstream.to_string()], None)
            .unwrap();
        gateway.add_route("/orders", "orders", &["POST".to_string()]);

        Arc::new(AppState {
            gateway: Arc::new(gateway),
            client: reqwest::Client::new(),
            upstream_timeout: Duration::from_secs(2),
        })
    }

    async fn post_orders(state: Arc<AppState>, body: &'static str) -> Response {
        proxy_handler(
            State(state),
            ConnectInfo(addr()),
            Method::POST,
            Uri::from_static("/orders?page=2"),
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
        )
        .await
    }

    fn addr() -> SocketAddr {
        "192.168.1.7:51000".parse().unwrap()
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, addr()), "192.168.1.7");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        assert_eq!(client_key(&headers, addr()), "203.0.113.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_key(&headers, addr()), "192.168.1.7");
    }

    #[test]
    fn rate_limited_response_carries_headers() {
        let decision = RoutingDecision::RateLimited {
            retry_after: Some(Duration::from_millis(12_500)),
        };
        let response = rejection(&decision);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
    }

    #[test]
    fn method_not_allowed_lists_allowed_methods() {
        let decision = RoutingDecision::MethodNotAllowed {
            allowed: vec!["GET".into(), "POST".into()],
        };
        let response = rejection(&decision);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(rejection(&RoutingDecision::NotFound).status(), StatusCode::NOT_FOUND);
        let unavailable = RoutingDecision::ServiceUnavailable {
            service: "svc".into(),
        };
        assert_eq!(rejection(&unavailable).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn refused_upstream_is_bad_gateway() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let response = post_orders(state_for(closed), "{}").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "10");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "9");
    }

    #[tokio::test]
    async fn routed_request_is_forwarded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/orders",
            post(|uri: Uri, body: String| async move {
                (StatusCode::CREATED, format!("{} {body}", uri.query().unwrap_or("")))
            }),
        );
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let response = post_orders(state_for(upstream), "widget").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "9");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"page=2 widget");
    }

    #[test]
    fn quota_headers() {
        let wall = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let quota = Quota {
            limit: 10,
            remaining: 3,
            reset_after: Some(Duration::from_secs(42)),
        };
        let headers = rate_limit_headers(&quota, wall);
        assert_eq!(headers[X_RATELIMIT_LIMIT], "10");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "3");
        assert_eq!(headers[X_RATELIMIT_RESET], "1700000042");

        let idle = Quota {
            reset_after: None,
            ..quota
        };
        assert_eq!(rate_limit_headers(&idle, wall)[X_RATELIMIT_RESET], "0");
    }
}
