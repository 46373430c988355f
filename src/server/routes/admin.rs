//! Administration endpoints, all behind [`AdminUser`]

use crate::auth::AdminUser;
use crate::core::error::{ApiResult, OrderError};
use crate::core::extractors::{PathId, QueryParams};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::validation::ValidatedJson;
use crate::entities::{
    Coupon, DoAccountView, Order, OrderStatus, UserStatus, UserView, VpsImage, VpsPlan,
    WalletTransaction,
};
use crate::server::state::AppState;
use crate::services::billing::{CouponInput, TopUpRequest};
use crate::services::catalog::{ImageInput, PlanInput};
use crate::services::orders::OrderDetails;
use crate::services::provisioning::{DoAccountInput, DoAccountUpdate};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/{id}", put(update_plan).delete(deactivate_plan))
        .route("/images", get(list_images).post(create_image))
        .route("/images/{id}", put(update_image).delete(deactivate_image))
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/wallet/{id}/top-up", post(top_up))
        .route("/do-accounts", get(list_accounts).post(create_account))
        .route("/do-accounts/health-check", post(health_check_all))
        .route("/do-accounts/{id}", put(update_account).delete(delete_account))
        .route("/do-accounts/{id}/health-check", post(health_check))
        .route("/orders", get(list_orders))
        .route("/orders/{id}/provision", post(provision))
        .route("/orders/{id}/refund", post(refund))
        .route("/users", get(list_users))
        .route("/users/{id}/suspend", post(suspend_user))
        .route("/users/{id}/reactivate", post(reactivate_user))
}

async fn list_plans(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<VpsPlan>>> {
    Ok(Json(state.catalog.list_all_plans().await?))
}

async fn create_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<PlanInput>,
) -> ApiResult<(StatusCode, Json<VpsPlan>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_plan(input).await?)))
}

async fn update_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
    ValidatedJson(input): ValidatedJson<PlanInput>,
) -> ApiResult<Json<VpsPlan>> {
    Ok(Json(state.catalog.update_plan(id, input).await?))
}

/// Plans are deactivated, not deleted; orders keep referring to them
async fn deactivate_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<VpsPlan>> {
    Ok(Json(state.catalog.deactivate_plan(id).await?))
}

async fn list_images(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<VpsImage>>> {
    Ok(Json(state.catalog.list_images().await?))
}

async fn create_image(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<ImageInput>,
) -> ApiResult<(StatusCode, Json<VpsImage>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_image(input).await?)))
}

async fn update_image(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
    ValidatedJson(input): ValidatedJson<ImageInput>,
) -> ApiResult<Json<VpsImage>> {
    Ok(Json(state.catalog.update_image(id, input).await?))
}

async fn deactivate_image(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<VpsImage>> {
    Ok(Json(state.catalog.deactivate_image(id).await?))
}

async fn list_coupons(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Coupon>>> {
    Ok(Json(state.billing.list_coupons(&params).await?))
}

async fn create_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<CouponInput>,
) -> ApiResult<(StatusCode, Json<Coupon>)> {
    Ok((StatusCode::CREATED, Json(state.billing.create_coupon(input).await?)))
}

async fn top_up(
    State(state): State<AppState>,
    AdminUser(ctx): AdminUser,
    PathId(user_id): PathId,
    ValidatedJson(request): ValidatedJson<TopUpRequest>,
) -> ApiResult<(StatusCode, Json<WalletTransaction>)> {
    // Unknown users get a 404 before any credit is written
    state.auth.get_user(user_id).await?;
    let description = request
        .description
        .or_else(|| Some(format!("Top-up by {}", ctx.actor())));
    let tx = state
        .billing
        .top_up(user_id, request.amount, request.reference, description)
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn list_accounts(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<DoAccountView>>> {
    Ok(Json(state.provisioning.list_accounts().await?))
}

async fn create_account(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<DoAccountInput>,
) -> ApiResult<(StatusCode, Json<DoAccountView>)> {
    Ok((StatusCode::CREATED, Json(state.provisioning.create_account(input).await?)))
}

async fn update_account(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
    ValidatedJson(update): ValidatedJson<DoAccountUpdate>,
) -> ApiResult<Json<DoAccountView>> {
    Ok(Json(state.provisioning.update_account(id, update).await?))
}

async fn delete_account(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    state.provisioning.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health_check_all(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<DoAccountView>>> {
    Ok(Json(state.provisioning.health_check_all().await?))
}

async fn health_check(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<DoAccountView>> {
    Ok(Json(state.provisioning.health_check(id).await?))
}

#[derive(Debug, Deserialize)]
struct OrderFilter {
    status: Option<OrderStatus>,
    user_id: Option<uuid::Uuid>,
}

async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(filter): QueryParams<OrderFilter>,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    Ok(Json(
        state
            .orders
            .list_orders(filter.user_id, filter.status, &params)
            .await?,
    ))
}

/// Starts provisioning in the background and answers 202
///
/// The outcome lands on the order (ACTIVE or FAILED with a reason).
async fn provision(
    State(state): State<AppState>,
    AdminUser(ctx): AdminUser,
    PathId(id): PathId,
) -> ApiResult<(StatusCode, Json<OrderDetails>)> {
    let details = state.orders.get_order(&ctx, id).await?;
    if !details.order.status.can_transition_to(OrderStatus::Provisioning) {
        return Err(OrderError::InvalidTransition {
            from: details.order.status.to_string(),
            to: OrderStatus::Provisioning.to_string(),
        }
        .into());
    }

    let provisioning = state.provisioning.clone();
    let actor = ctx.actor();
    tokio::spawn(async move {
        // Failures are recorded on the order
        let _ = provisioning.provision(id, &actor).await;
    });
    Ok((StatusCode::ACCEPTED, Json(details)))
}

async fn refund(
    State(state): State<AppState>,
    AdminUser(ctx): AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(state.orders.refund_order(id, &ctx.actor()).await?))
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<UserView>>> {
    Ok(Json(state.auth.list_users(&params).await?))
}

async fn suspend_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<UserView>> {
    Ok(Json(state.auth.set_status(id, UserStatus::Suspended).await?))
}

async fn reactivate_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    PathId(id): PathId,
) -> ApiResult<Json<UserView>> {
    Ok(Json(state.auth.set_status(id, UserStatus::Active).await?))
}
