use crate::core::error::{ApiResult, ValidationError};
use crate::payment::PaymentNotification;
use crate::server::state::AppState;
use crate::services::orders::WebhookAck;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/payment", post(payment_notification))
}

/// Authenticated by the notification signature, not by a guard
async fn payment_notification(
    State(state): State<AppState>,
    payload: Result<Json<PaymentNotification>, JsonRejection>,
) -> ApiResult<Json<WebhookAck>> {
    let Json(notification) = payload.map_err(|e| ValidationError::InvalidJson {
        message: e.body_text(),
    })?;
    tracing::info!(
        order_id = %notification.order_id,
        status = %notification.transaction_status,
        "payment notification"
    );
    Ok(Json(state.orders.apply_payment_notification(notification).await?))
}
