use crate::auth::AuthUser;
use crate::core::error::ApiResult;
use crate::core::extractors::{PathId, QueryParams};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::validation::ValidatedJson;
use crate::entities::Instance;
use crate::server::state::AppState;
use crate::services::provisioning::ActionRequest;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/instances", get(list_instances))
        .route("/instances/{id}", get(get_instance).delete(terminate))
        .route("/instances/{id}/actions", post(action))
}

/// Admins see every instance
async fn list_instances(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    QueryParams(params): QueryParams<PageParams>,
) -> ApiResult<Json<PaginatedResponse<Instance>>> {
    let owner = if ctx.is_admin() { None } else { ctx.user_id() };
    Ok(Json(state.provisioning.list_instances(owner, &params).await?))
}

async fn get_instance(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.provisioning.get_instance(&ctx, id).await?))
}

async fn action(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
    ValidatedJson(request): ValidatedJson<ActionRequest>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.provisioning.action(&ctx, id, request.action).await?))
}

async fn terminate(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    PathId(id): PathId,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.provisioning.terminate(&ctx, id).await?))
}
