use crate::gateway::Gateway;
use std::sync::Arc;
use std::time::Duration;
// app's shared state

pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub client: reqwest::Client,     // used to forward routed requests
    pub upstream_timeout: Duration, // per forwarded request
}
