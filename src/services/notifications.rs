//! In-app notifications
//!
//! The notifier turns domain events into notifications for the user they
//! concern. Other services can also post one through the internal API.

use crate::core::error::{ApiResult, EntityError};
use crate::core::events::{DomainEvent, EventBus};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::repository::Repository;
use crate::entities::{Notification, NotificationKind, OrderStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

fn default_kind() -> NotificationKind {
    NotificationKind::General
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    pub user_id: Uuid,
    #[serde(default = "default_kind")]
    pub kind: NotificationKind,
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000, message = "must be 1-2000 characters"))]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCount {
    pub unread: usize,
}

/// `1500000` → `Rp 1.500.000`
pub fn format_idr(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}Rp {}", sign, grouped)
}

/// Notification content for an event, if the event warrants one
pub fn describe(event: &DomainEvent) -> Option<(NotificationKind, String, String)> {
    match event {
        DomainEvent::OrderCreated {
            order_number,
            final_price,
            ..
        } => Some((
            NotificationKind::OrderCreated,
            "Order received".to_string(),
            format!("Order {} was created. Total {}.", order_number, format_idr(*final_price)),
        )),
        DomainEvent::PaymentReceived { amount, .. } => Some((
            NotificationKind::PaymentReceived,
            "Payment received".to_string(),
            format!("We received your payment of {}.", format_idr(*amount)),
        )),
        DomainEvent::WalletToppedUp { amount, balance, .. } => Some((
            NotificationKind::WalletTopUp,
            "Wallet topped up".to_string(),
            format!(
                "{} was added to your wallet. New balance {}.",
                format_idr(*amount),
                format_idr(*balance)
            ),
        )),
        DomainEvent::OrderStatusChanged {
            order_number, to, ..
        } => {
            let (kind, title, message) = match to {
                OrderStatus::Active => (
                    NotificationKind::InstanceReady,
                    "Your VPS is ready",
                    format!("The server for order {} is up and running.", order_number),
                ),
                OrderStatus::Failed => (
                    NotificationKind::ProvisioningFailed,
                    "Provisioning failed",
                    format!(
                        "We could not set up the server for order {}. Our team has been notified.",
                        order_number
                    ),
                ),
                OrderStatus::Expired => (
                    NotificationKind::OrderExpired,
                    "Order expired",
                    format!("Order {} expired before payment was received.", order_number),
                ),
                OrderStatus::Cancelled => (
                    NotificationKind::OrderCancelled,
                    "Order cancelled",
                    format!("Order {} was cancelled.", order_number),
                ),
                OrderStatus::Terminated => (
                    NotificationKind::InstanceTerminated,
                    "Server terminated",
                    format!("The server for order {} was terminated.", order_number),
                ),
                OrderStatus::Refunded => (
                    NotificationKind::OrderRefunded,
                    "Order refunded",
                    format!("Order {} was refunded to your wallet.", order_number),
                ),
                _ => return None,
            };
            Some((kind, title.to_string(), message))
        }
    }
}

pub struct NotificationService {
    notifications: Arc<dyn Repository<Notification>>,
}

impl NotificationService {
    pub fn new(notifications: Arc<dyn Repository<Notification>>) -> Self {
        Self { notifications }
    }

    pub async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> ApiResult<Notification> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            read_at: None,
        };
        Ok(self.notifications.create(notification).await?)
    }

    pub async fn create(&self, request: CreateNotificationRequest) -> ApiResult<Notification> {
        self.notify(request.user_id, request.kind, request.title, request.message)
            .await
    }

    async fn for_user(&self, user_id: Uuid) -> ApiResult<Vec<Notification>> {
        Ok(self
            .notifications
            .find_by("user_id", &json!(user_id))
            .await?)
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &NotificationFilter,
        params: &PageParams,
    ) -> ApiResult<PaginatedResponse<Notification>> {
        let mut items = self.for_user(user_id).await?;
        if filter.unread_only {
            items.retain(|n| !n.is_read());
        }
        items.reverse();
        Ok(PaginatedResponse::from_items(items, params))
    }

    pub async fn unread_count(&self, user_id: Uuid) -> ApiResult<UnreadCount> {
        let unread = self
            .for_user(user_id)
            .await?
            .iter()
            .filter(|n| !n.is_read())
            .count();
        Ok(UnreadCount { unread })
    }

    /// Someone else's notification is reported as missing
    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> ApiResult<Notification> {
        let mut notification = self
            .notifications
            .get(&notification_id)
            .await?
            .filter(|n| n.user_id == user_id)
            .ok_or_else(|| EntityError::not_found("notification", notification_id))?;
        if notification.is_read() {
            return Ok(notification);
        }
        let now = Utc::now();
        notification.read_at = Some(now);
        notification.updated_at = now;
        Ok(self.notifications.update(notification).await?)
    }

    /// Returns how many notifications changed
    pub async fn mark_all_read(&self, user_id: Uuid) -> ApiResult<usize> {
        let now = Utc::now();
        let mut marked = 0;
        for mut notification in self.for_user(user_id).await? {
            if notification.is_read() {
                continue;
            }
            notification.read_at = Some(now);
            notification.updated_at = now;
            self.notifications.update(notification).await?;
            marked += 1;
        }
        Ok(marked)
    }

    pub async fn handle(&self, event: &DomainEvent) -> ApiResult<Option<Notification>> {
        let Some((kind, title, message)) = describe(event) else {
            return Ok(None);
        };
        let notification = self.notify(event.user_id(), kind, title, message).await?;
        Ok(Some(notification))
    }

    pub fn spawn_notifier(self: &Arc<Self>, events: &EventBus) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Err(e) = service.handle(&envelope.event).await {
                            tracing::error!(event = envelope.event.name(), error = %e, "failed to store notification");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notifier lagged behind events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
