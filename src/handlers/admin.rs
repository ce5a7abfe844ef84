use axum::{Json, extract::State};
use std::sync::Arc;
use crate::registry::ServiceSnapshot;
use crate::routes::RouteRecord;
use crate::state::AppState;

pub async fn services_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceSnapshot>> {
    Json(state.gateway.list_services().await)
}

pub async fn routes_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RouteRecord>> {
    Json(state.gateway.list_routes())
}
