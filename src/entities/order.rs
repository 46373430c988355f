//! Orders and their status state machine
//!
//! ```text
//! PENDING_PAYMENT ─▶ PAID ─▶ PROVISIONING ─▶ ACTIVE ─▶ TERMINATED
//!       │                          │
//!       ├─▶ CANCELLED              └─▶ FAILED ─▶ PROVISIONING
//!       └─▶ EXPIRED                        └──▶ REFUNDED
//! ```
//!
//! All status changes go through [`Order::transition`], which keeps
//! `status_history` append-only and in sync with `status`.

use crate::core::error::OrderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Provisioning,
    Active,
    Failed,
    Cancelled,
    Expired,
    Terminated,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Provisioning => "PROVISIONING",
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Terminated => "TERMINATED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    /// Whether `self → to` is an edge of the state machine
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (PendingPayment, Expired)
                | (Paid, Provisioning)
                | (Provisioning, Active)
                | (Provisioning, Failed)
                | (Failed, Provisioning)
                | (Failed, Refunded)
                | (Active, Terminated)
        )
    }

    /// No outgoing edges
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Terminated
                | OrderStatus::Refunded
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Hosted payment page of the payment gateway
    Gateway,
    /// Prepaid wallet balance
    Wallet,
}

/// One recorded status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// `None` only for the entry written at creation
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub reason: String,
    /// `user:<id>`, `admin:<id>`, `system`, `gateway`, ...
    pub actor: String,
    pub at: DateTime<Utc>,
}

crate::impl_data_entity!(
    /// A VPS purchase
    Order,
    "order",
    "orders",
    {
        /// Human-facing reference, e.g. `WB-20261014-3F9A2C`
        order_number: String,
        user_id: Uuid,
        plan_id: Uuid,
        plan_slug: String,
        provider_size_slug: String,
        image_slug: String,
        region: String,
        hostname: String,
        duration_months: u32,
        payment_method: PaymentMethod,
        base_price: i64,
        discount: i64,
        final_price: i64,
        coupon_code: Option<String>,
        status: OrderStatus,
        status_history: Vec<StatusHistoryEntry>,
        instance_id: Option<Uuid>,
        failure_reason: Option<String>,
        payment_expires_at: DateTime<Utc>,
    }
);

impl Order {
    /// Initial history for a freshly created order
    pub fn initial_history(actor: &str, at: DateTime<Utc>) -> Vec<StatusHistoryEntry> {
        vec![StatusHistoryEntry {
            from: None,
            to: OrderStatus::PendingPayment,
            reason: "order created".to_string(),
            actor: actor.to_string(),
            at,
        }]
    }

    /// Move to `to`, appending a history entry
    ///
    /// Rejects edges that are not in the state machine and leaves the order
    /// untouched in that case.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Result<StatusHistoryEntry, OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        let entry = StatusHistoryEntry {
            from: Some(self.status),
            to,
            reason: reason.into(),
            actor: actor.into(),
            at: now,
        };
        self.status = to;
        self.status_history.push(entry.clone());
        self.updated_at = now;

        Ok(entry)
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn is_payment_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::PendingPayment && now > self.payment_expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            order_number: "WB-TEST".to_string(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            plan_slug: "basic-1gb".to_string(),
            provider_size_slug: "s-1vcpu-1gb".to_string(),
            image_slug: "ubuntu-24-04-x64".to_string(),
            region: "sgp1".to_string(),
            hostname: "web-1".to_string(),
            duration_months: 1,
            payment_method: PaymentMethod::Gateway,
            base_price: 100_000,
            discount: 0,
            final_price: 100_000,
            coupon_code: None,
            status: OrderStatus::PendingPayment,
            status_history: Order::initial_history("system", now),
            instance_id: None,
            failure_reason: None,
            payment_expires_at: now + Duration::hours(24),
        }
    }

    #[test]
    fn test_happy_path_history() {
        let mut o = order();
        o.transition(OrderStatus::Paid, "payment settled", "gateway")
            .unwrap();
        o.transition(OrderStatus::Provisioning, "worker picked up", "system")
            .unwrap();
        o.transition(OrderStatus::Active, "droplet active", "system")
            .unwrap();

        assert_eq!(o.status, OrderStatus::Active);
        let path: Vec<_> = o.status_history.iter().map(|e| e.to).collect();
        assert_eq!(
            path,
            vec![
                OrderStatus::PendingPayment,
                OrderStatus::Paid,
                OrderStatus::Provisioning,
                OrderStatus::Active
            ]
        );
        assert_eq!(o.status_history[1].from, Some(OrderStatus::PendingPayment));
        assert_eq!(o.status_history.last().map(|e| e.to), Some(o.status));
    }

    #[test]
    fn test_invalid_transition_leaves_order_untouched() {
        let mut o = order();
        let before = o.clone();

        let err = o
            .transition(OrderStatus::Active, "skip ahead", "system")
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidTransition { .. }));
        assert_eq!(o, before);
    }

    #[test]
    fn test_failed_can_retry_or_refund() {
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::Provisioning));
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Active));
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        use OrderStatus::*;
        let all = [
            PendingPayment,
            Paid,
            Provisioning,
            Active,
            Failed,
            Cancelled,
            Expired,
            Terminated,
            Refunded,
        ];
        for from in all.into_iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{from}");
        }
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(OrderStatus::PendingPayment).unwrap(),
            serde_json::json!("PENDING_PAYMENT")
        );
    }

    #[test]
    fn test_payment_overdue() {
        let mut o = order();
        let later = o.payment_expires_at + Duration::seconds(1);
        assert!(o.is_payment_overdue(later));
        assert!(!o.is_payment_overdue(o.created_at));

        o.transition(OrderStatus::Paid, "paid", "gateway").unwrap();
        assert!(!o.is_payment_overdue(later));
    }
}
