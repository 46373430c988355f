//! Service-to-service endpoints, authenticated with `X-API-Key`

use crate::auth::ServiceCaller;
use crate::core::auth::AuthContext;
use crate::core::error::ApiResult;
use crate::core::extractors::PathId;
use crate::core::validation::ValidatedJson;
use crate::entities::Notification;
use crate::server::state::AppState;
use crate::services::notifications::CreateNotificationRequest;
use crate::services::orders::OrderDetails;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/orders/{id}", get(get_order))
}

async fn create_notification(
    State(state): State<AppState>,
    ServiceCaller(service): ServiceCaller,
    ValidatedJson(request): ValidatedJson<CreateNotificationRequest>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    tracing::debug!(%service, user_id = %request.user_id, "internal notification");
    Ok((StatusCode::CREATED, Json(state.notifications.create(request).await?)))
}

async fn get_order(
    State(state): State<AppState>,
    ServiceCaller(service_name): ServiceCaller,
    PathId(id): PathId,
) -> ApiResult<Json<OrderDetails>> {
    let ctx = AuthContext::Service { service_name };
    Ok(Json(state.orders.get_order(&ctx, id).await?))
}
