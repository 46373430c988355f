use crate::auth::AuthUser;
use crate::core::error::{ApiResult, EntityError};
use crate::core::extractors::{PathId, QueryParams};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::validation::ValidatedJson;
use crate::entities::{Invoice, WalletTransaction};
use crate::server::state::AppState;
use crate::services::billing::{CouponQuote, ValidateCouponRequest, WalletSummary};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/coupons/validate", post(validate_coupon))
        .route("/invoices", get(list_invoices))
        .route("/invoices/{id}", get(get_invoice))
        .route("/wallet", get(wallet))
        .route("/wallet/transactions", get(transactions))
}

async fn validate_coupon(
    State(state): State<AppState>,
    _user: AuthUser,
    ValidatedJson(request): ValidatedJson<ValidateCouponRequest>,
) -> ApiResult<Json<CouponQuote>> {
    let quote = state
        .billing
        .validate_coupon(&request.code, request.amount, Utc::now())
        .await?;
    Ok(Json(quote))
}

/// Admins see every invoice
async fn list_invoices(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Invoice>>> {
    let owner = if ctx.is_admin() { None } else { ctx.user_id() };
    Ok(Json(state.billing.list_invoices(owner, &params).await?))
}

async fn get_invoice(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<Invoice>> {
    let invoice = state.billing.get_invoice(id).await?;
    if !ctx.can_access(invoice.user_id) {
        return Err(EntityError::not_found("invoice", id).into());
    }
    Ok(Json(invoice))
}

async fn wallet(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<WalletSummary>> {
    Ok(Json(state.billing.wallet_summary(user.user_id()).await?))
}

async fn transactions(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<WalletTransaction>>> {
    Ok(Json(
        state
            .billing
            .list_transactions(user.user_id(), &params)
            .await?,
    ))
}
