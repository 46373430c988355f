use crate::auth::AuthUser;
use crate::core::error::ApiResult;
use crate::core::extractors::{PathId, QueryParams};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::entities::Notification;
use crate::server::state::AppState;
use crate::services::notifications::{NotificationFilter, UnreadCount};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
}

async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(filter): QueryParams<NotificationFilter>,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Notification>>> {
    Ok(Json(
        state
            .notifications
            .list(user.user_id(), &filter, &params)
            .await?,
    ))
}

async fn unread_count(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UnreadCount>> {
    Ok(Json(state.notifications.unread_count(user.user_id()).await?))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<Notification>> {
    Ok(Json(state.notifications.mark_read(user.user_id(), id).await?))
}

async fn mark_all_read(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let marked = state.notifications.mark_all_read(user.user_id()).await?;
    Ok(Json(json!({ "marked": marked })))
}
