use crate::auth::AuthUser;
use crate::core::error::ApiResult;
use crate::core::validation::ValidatedJson;
use crate::entities::UserView;
use crate::server::state::AppState;
use crate::services::auth::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
}

async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let response = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    Ok(Json(state.auth.login(request).await?))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UserView>> {
    Ok(Json(state.auth.me(user.user_id()).await?))
}

async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state.auth.change_password(user.user_id(), request).await?;
    Ok(StatusCode::NO_CONTENT)
}
