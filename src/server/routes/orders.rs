use crate::auth::AuthUser;
use crate::core::error::ApiResult;
use crate::core::extractors::{PathId, QueryParams};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::validation::ValidatedJson;
use crate::entities::Order;
use crate::server::state::AppState;
use crate::services::orders::{CreateOrderRequest, OrderDetails};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/cancel", post(cancel_order))
}

async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<OrderDetails>)> {
    let details = state
        .orders
        .create_order(user.user_id(), &user.0.actor(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    Ok(Json(
        state
            .orders
            .list_orders(Some(user.user_id()), None, &params)
            .await?,
    ))
}

async fn get_order(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(state.orders.get_order(&ctx, id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(state.orders.cancel_order(&ctx, id).await?))
}
