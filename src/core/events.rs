//! Internal event system
//!
//! The EventBus decouples the services that change state (orders, billing)
//! from the ones that react to it (notifier, provisioning worker). It uses
//! `tokio::sync::broadcast`.
//!
//! ```text
//! OrderService ───┐
//!                 ├──▶ EventBus::publish() ──▶ broadcast ──▶ Notifier
//! BillingService ─┘                                      ──▶ ProvisioningWorker
//! ```

use crate::entities::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Something that happened in the domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A new order was placed
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        order_number: String,
        final_price: i64,
    },
    /// An order moved along its state machine
    OrderStatusChanged {
        order_id: Uuid,
        user_id: Uuid,
        order_number: String,
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },
    /// An invoice was paid
    PaymentReceived {
        invoice_id: Uuid,
        order_id: Uuid,
        user_id: Uuid,
        amount: i64,
    },
    /// Credit was added to a wallet
    WalletToppedUp {
        user_id: Uuid,
        amount: i64,
        balance: i64,
    },
}

impl DomainEvent {
    /// Short name of the event, for logs
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "order_created",
            DomainEvent::OrderStatusChanged { .. } => "order_status_changed",
            DomainEvent::PaymentReceived { .. } => "payment_received",
            DomainEvent::WalletToppedUp { .. } => "wallet_topped_up",
        }
    }

    /// The user the event concerns
    pub fn user_id(&self) -> Uuid {
        match self {
            DomainEvent::OrderCreated { user_id, .. }
            | DomainEvent::OrderStatusChanged { user_id, .. }
            | DomainEvent::PaymentReceived { user_id, .. }
            | DomainEvent::WalletToppedUp { user_id, .. } => *user_id,
        }
    }
}

/// Envelope wrapping an event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// Cheap to clone (Arc internally) and can be shared across threads.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    ///
    /// The capacity determines how many events can be buffered before
    /// slow receivers start losing events (lagged).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Never fails. With no subscribers the event is dropped.
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        tracing::debug!(event = event.name(), "publishing domain event");
        self.sender.send(EventEnvelope::new(event)).unwrap_or(0)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topped_up() -> DomainEvent {
        DomainEvent::WalletToppedUp {
            user_id: Uuid::new_v4(),
            amount: 50_000,
            balance: 50_000,
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(topped_up()), 0);
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let event = topped_up();

        assert_eq!(bus.publish(event.clone()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, event);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(topped_up());

        assert_eq!(rx1.recv().await.unwrap().event.name(), "wallet_topped_up");
        assert_eq!(rx2.recv().await.unwrap().event.name(), "wallet_topped_up");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(topped_up()).unwrap();
        assert_eq!(json["event"], "wallet_topped_up");
        assert_eq!(json["amount"], 50_000);
    }
}
