//! Payment gateway integration
//!
//! Invoices paid through the gateway get a hosted payment page from
//! [`PaymentGateway::create_charge`]; the gateway reports the result through
//! an HTTP notification that must pass [`PaymentGateway::verify_signature`].

pub mod midtrans;

pub use midtrans::MidtransGateway;

use crate::core::error::{BillingError, WebranaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Our reference, echoed back as `order_id` in notifications
    pub reference: String,
    pub amount: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub item_name: String,
}

/// Hosted payment page for a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub token: String,
    pub redirect_url: String,
}

/// Notification body posted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

/// What a notification means for the invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Pending,
    Expired,
    Cancelled,
    /// Statuses we do not act on (refund notices, unknown values)
    Ignored,
}

impl PaymentNotification {
    pub fn outcome(&self) -> PaymentOutcome {
        match self.transaction_status.as_str() {
            "settlement" => PaymentOutcome::Paid,
            "capture" => match self.fraud_status.as_deref() {
                Some("challenge") => PaymentOutcome::Pending,
                Some("deny") => PaymentOutcome::Cancelled,
                _ => PaymentOutcome::Paid,
            },
            "pending" => PaymentOutcome::Pending,
            "expire" => PaymentOutcome::Expired,
            "cancel" | "deny" | "failure" => PaymentOutcome::Cancelled,
            _ => PaymentOutcome::Ignored,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment gateway returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("payment gateway request failed: {0}")]
    Transport(String),

    #[error("unexpected payment gateway response: {0}")]
    Decode(String),
}

impl From<PaymentError> for WebranaError {
    fn from(err: PaymentError) -> Self {
        WebranaError::Billing(BillingError::Gateway {
            message: err.to_string(),
        })
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, PaymentError>;

    /// Whether the notification was signed with our server key
    fn verify_signature(&self, notification: &PaymentNotification) -> bool;
}
