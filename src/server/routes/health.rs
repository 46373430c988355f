use crate::server::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "webrana-cloud",
        "version": env!("CARGO_PKG_VERSION"),
        "payment_gateway": state.config.payment.enabled,
        "gateway_upstreams": state.config.gateway.upstreams.len(),
    }))
}
