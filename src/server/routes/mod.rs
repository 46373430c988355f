//! HTTP routes
//!
//! Handlers stay thin: extract, call one service method, wrap the result.
//! Guards are declared through the extractors in [`crate::auth`].

pub mod admin;
pub mod auth;
pub mod billing;
pub mod catalog;
pub mod gateway;
pub mod health;
pub mod instances;
pub mod internal;
pub mod notifications;
pub mod orders;
pub mod webhooks;

use super::state::AppState;
use axum::Router;

/// Everything mounted under `/api/v1`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(auth::routes())
        .merge(catalog::routes())
        .merge(billing::routes())
        .merge(orders::routes())
        .merge(instances::routes())
        .merge(notifications::routes())
        .nest("/admin", admin::routes())
        .nest("/internal", internal::routes())
        .nest("/gateway", gateway::routes())
}
