//! In-app notifications

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    PaymentReceived,
    InstanceReady,
    ProvisioningFailed,
    OrderExpired,
    OrderCancelled,
    InstanceTerminated,
    OrderRefunded,
    WalletTopUp,
    General,
}

crate::impl_data_entity!(Notification, "notification", "notifications", {
    user_id: uuid::Uuid,
    kind: NotificationKind,
    title: String,
    message: String,
    read_at: Option<chrono::DateTime<chrono::Utc>>,
});

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}
