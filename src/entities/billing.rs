//! Invoices and wallet ledger

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Expired,
    Cancelled,
    Refunded,
}

crate::impl_data_entity!(
    /// Bill for exactly one order
    Invoice,
    "invoice",
    "invoices",
    {
        /// `INV-YYYYMMDD-XXXXXX`
        invoice_number: String,
        order_id: Uuid,
        user_id: Uuid,
        amount: i64,
        currency: String,
        status: InvoiceStatus,
        /// Gateway transaction token
        payment_reference: Option<String>,
        /// Hosted payment page
        payment_url: Option<String>,
        due_at: DateTime<Utc>,
        paid_at: Option<DateTime<Utc>>,
    }
);

/// `<prefix>-YYYYMMDD-XXXXXX` with six random uppercase hex digits
pub fn document_number(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}-{}-{:06X}", prefix, at.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletTxKind {
    Topup,
    Payment,
    Refund,
    Adjustment,
}

crate::impl_data_entity!(
    /// One ledger line; the newest line's `balance_after` is the balance
    WalletTransaction,
    "wallet_transaction",
    "wallet_transactions",
    {
        user_id: Uuid,
        kind: WalletTxKind,
        /// Positive for credits, negative for debits
        amount: i64,
        balance_after: i64,
        reference: Option<String>,
        description: String,
    }
);
