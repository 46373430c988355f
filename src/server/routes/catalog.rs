use crate::core::error::ApiResult;
use crate::entities::{VpsImage, VpsPlan};
use crate::server::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Listing<T> {
    data: Vec<T>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/plans/{id_or_slug}", get(get_plan))
        .route("/images", get(list_images))
}

async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Listing<VpsPlan>>> {
    let data = state.catalog.list_plans().await?;
    Ok(Json(Listing { data }))
}

async fn get_plan(State(state): State<AppState>, Path(id_or_slug): Path<String>) -> ApiResult<Json<VpsPlan>> {
    Ok(Json(state.catalog.get_plan(&id_or_slug).await?))
}

async fn list_images(State(state): State<AppState>) -> ApiResult<Json<Listing<VpsImage>>> {
    let data = state.catalog.list_images().await?;
    Ok(Json(Listing { data }))
}
