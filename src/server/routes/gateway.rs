use crate::core::error::ApiResult;
use crate::server::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::any;
use axum::Router;

pub fn routes() -> Router<AppState> {
    Router::new().route("/{service}/{*rest}", any(proxy))
}

async fn proxy(
    State(state): State<AppState>,
    Path((service, rest)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    state
        .gateway
        .forward(&service, &rest, query.as_deref(), method, &headers, body)
        .await
}
