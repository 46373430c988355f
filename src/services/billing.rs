//! Coupons, invoices, payment notifications and the prepaid wallet

use crate::config::BillingConfig;
use crate::core::error::{
    ApiResult, BillingError, CouponRejection, EntityError, ValidationError,
};
use crate::core::events::{DomainEvent, EventBus};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::repository::Repository;
use crate::entities::{
    Coupon, DiscountType, Invoice, InvoiceStatus, Order, PaymentMethod, User, WalletTransaction,
    WalletTxKind, document_number,
};
use crate::payment::{ChargeRequest, PaymentGateway, PaymentNotification};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CouponInput {
    #[validate(length(min = 3, max = 32, message = "must be 3-32 characters"))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(range(min = 1, message = "must be greater than 0"))]
    pub value: i64,
    pub max_uses: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_amount: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub code: String,
    #[validate(range(min = 0))]
    pub amount: i64,
}

/// Price after a coupon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponQuote {
    pub code: String,
    pub discount_type: DiscountType,
    pub original_amount: i64,
    pub discount: i64,
    pub final_amount: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TopUpRequest {
    #[validate(range(min = 1i64, max = 1_000_000_000_000i64, message = "must be between 1 and 1000000000000"))]
    pub amount: i64,
    pub reference: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSummary {
    pub user_id: Uuid,
    pub balance: i64,
    pub currency: String,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub struct BillingService {
    coupons: Arc<dyn Repository<Coupon>>,
    invoices: Arc<dyn Repository<Invoice>>,
    wallet: Arc<dyn Repository<WalletTransaction>>,
    payment: Option<Arc<dyn PaymentGateway>>,
    events: EventBus,
    config: BillingConfig,
    coupon_lock: Mutex<()>,
    wallet_lock: Mutex<()>,
}

impl BillingService {
    pub fn new(
        coupons: Arc<dyn Repository<Coupon>>,
        invoices: Arc<dyn Repository<Invoice>>,
        wallet: Arc<dyn Repository<WalletTransaction>>,
        payment: Option<Arc<dyn PaymentGateway>>,
        events: EventBus,
        config: BillingConfig,
    ) -> Self {
        Self {
            coupons,
            invoices,
            wallet,
            payment,
            events,
            config,
            coupon_lock: Mutex::new(()),
            wallet_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    // ---------------------------------------------------------------- coupons

    pub async fn create_coupon(&self, input: CouponInput) -> ApiResult<Coupon> {
        let code = normalize_code(&input.code);
        if input.discount_type == DiscountType::Percent && input.value > 100 {
            return Err(ValidationError::field("value", "a percent discount cannot exceed 100").into());
        }
        if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
            if until < from {
                return Err(ValidationError::field("valid_until", "must be after valid_from").into());
            }
        }
        if self.coupons.find_one_by("code", &json!(code)).await?.is_some() {
            return Err(EntityError::already_exists("coupon", "code", &code).into());
        }

        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            code,
            description: input.description,
            discount_type: input.discount_type,
            value: input.value,
            max_uses: input.max_uses,
            used_count: 0,
            min_amount: input.min_amount,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            is_active: input.is_active,
        };
        Ok(self.coupons.create(coupon).await?)
    }

    pub async fn list_coupons(&self, params: &PageParams) -> ApiResult<PaginatedResponse<Coupon>> {
        let mut coupons = self.coupons.list().await?;
        coupons.reverse();
        Ok(PaginatedResponse::from_items(coupons, params))
    }

    async fn usable_coupon(&self, code: &str, amount: i64, now: DateTime<Utc>) -> ApiResult<Coupon> {
        let code = normalize_code(code);
        let reject = |reason| BillingError::Coupon {
            code: code.clone(),
            reason,
        };
        let coupon = self
            .coupons
            .find_one_by("code", &json!(code))
            .await?
            .ok_or_else(|| reject(CouponRejection::NotFound))?;
        coupon.check(amount, now).map_err(reject)?;
        Ok(coupon)
    }

    /// Price check without redeeming
    pub async fn validate_coupon(&self, code: &str, amount: i64, now: DateTime<Utc>) -> ApiResult<CouponQuote> {
        let coupon = self.usable_coupon(code, amount, now).await?;
        let discount = coupon.discount_for(amount);
        Ok(CouponQuote {
            code: coupon.code,
            discount_type: coupon.discount_type,
            original_amount: amount,
            discount,
            final_amount: amount - discount,
        })
    }

    /// Validate and count one use; returns the discount granted
    pub async fn redeem_coupon(&self, code: &str, amount: i64, now: DateTime<Utc>) -> ApiResult<CouponQuote> {
        let _guard = self.coupon_lock.lock().await;
        let mut coupon = self.usable_coupon(code, amount, now).await?;
        let discount = coupon.discount_for(amount);
        coupon.used_count += 1;
        coupon.updated_at = now;
        let coupon = self.coupons.update(coupon).await?;
        tracing::info!(code = %coupon.code, used = coupon.used_count, "coupon redeemed");
        Ok(CouponQuote {
            code: coupon.code,
            discount_type: coupon.discount_type,
            original_amount: amount,
            discount,
            final_amount: amount - discount,
        })
    }

    /// Give back a use taken by an order that could not be placed
    pub async fn release_coupon(&self, code: &str) -> ApiResult<()> {
        let _guard = self.coupon_lock.lock().await;
        if let Some(mut coupon) = self
            .coupons
            .find_one_by("code", &json!(normalize_code(code)))
            .await?
        {
            coupon.used_count = coupon.used_count.saturating_sub(1);
            coupon.updated_at = Utc::now();
            self.coupons.update(coupon).await?;
        }
        Ok(())
    }

    // --------------------------------------------------------------- invoices

    /// Invoice for a new order; asks the gateway for a payment page when the
    /// order is paid through it
    pub async fn create_invoice(&self, order: &Order, customer: &User) -> ApiResult<Invoice> {
        let now = Utc::now();
        let mut invoice = Invoice {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            invoice_number: document_number("INV", now),
            order_id: order.id,
            user_id: order.user_id,
            amount: order.final_price,
            currency: self.config.currency.clone(),
            status: InvoiceStatus::Unpaid,
            payment_reference: None,
            payment_url: None,
            due_at: order.payment_expires_at,
            paid_at: None,
        };

        if order.payment_method == PaymentMethod::Gateway && order.final_price > 0 {
            match &self.payment {
                Some(gateway) => {
                    let charge = gateway
                        .create_charge(&ChargeRequest {
                            reference: invoice.invoice_number.clone(),
                            amount: invoice.amount,
                            customer_name: customer.full_name.clone(),
                            customer_email: customer.email.clone(),
                            item_name: format!("{} x{} month(s)", order.plan_slug, order.duration_months),
                        })
                        .await?;
                    invoice.payment_reference = Some(charge.token);
                    invoice.payment_url = Some(charge.redirect_url);
                }
                None => {
                    tracing::warn!(order = %order.order_number, "payment gateway disabled, invoice has no payment page");
                }
            }
        }

        Ok(self.invoices.create(invoice).await?)
    }

    pub async fn invoice_for_order(&self, order_id: Uuid) -> ApiResult<Option<Invoice>> {
        Ok(self.invoices.find_one_by("order_id", &json!(order_id)).await?)
    }

    pub async fn invoice_by_number(&self, number: &str) -> ApiResult<Invoice> {
        self.invoices
            .find_one_by("invoice_number", &json!(number))
            .await?
            .ok_or_else(|| EntityError::not_found("invoice", number).into())
    }

    pub async fn get_invoice(&self, id: Uuid) -> ApiResult<Invoice> {
        self.invoices
            .get(&id)
            .await?
            .ok_or_else(|| EntityError::not_found("invoice", id).into())
    }

    /// `user_id = None` lists every invoice
    pub async fn list_invoices(
        &self,
        user_id: Option<Uuid>,
        params: &PageParams,
    ) -> ApiResult<PaginatedResponse<Invoice>> {
        let mut invoices = match user_id {
            Some(user_id) => self.invoices.find_by("user_id", &json!(user_id)).await?,
            None => self.invoices.list().await?,
        };
        invoices.reverse();
        Ok(PaginatedResponse::from_items(invoices, params))
    }

    pub async fn mark_invoice_paid(&self, mut invoice: Invoice, reference: Option<String>) -> ApiResult<Invoice> {
        let now = Utc::now();
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = Some(now);
        if reference.is_some() {
            invoice.payment_reference = reference;
        }
        invoice.updated_at = now;
        let invoice = self.invoices.update(invoice).await?;

        self.events.publish(DomainEvent::PaymentReceived {
            invoice_id: invoice.id,
            order_id: invoice.order_id,
            user_id: invoice.user_id,
            amount: invoice.amount,
        });
        Ok(invoice)
    }

    /// Move the order's unpaid invoice to `status`; paid invoices only move
    /// to `refunded`
    pub async fn close_invoice(&self, order_id: Uuid, status: InvoiceStatus) -> ApiResult<Option<Invoice>> {
        let Some(mut invoice) = self.invoice_for_order(order_id).await? else {
            return Ok(None);
        };
        let allowed = match invoice.status {
            InvoiceStatus::Unpaid => status != InvoiceStatus::Refunded,
            InvoiceStatus::Paid => status == InvoiceStatus::Refunded,
            _ => false,
        };
        if !allowed {
            return Ok(Some(invoice));
        }
        invoice.status = status;
        invoice.updated_at = Utc::now();
        Ok(Some(self.invoices.update(invoice).await?))
    }

    /// Reject notifications not signed with our server key
    pub fn verify_notification(&self, notification: &PaymentNotification) -> ApiResult<()> {
        match &self.payment {
            Some(gateway) if gateway.verify_signature(notification) => Ok(()),
            _ => Err(BillingError::InvalidSignature.into()),
        }
    }

    // ----------------------------------------------------------------- wallet

    async fn history(&self, user_id: Uuid) -> ApiResult<Vec<WalletTransaction>> {
        Ok(self.wallet.find_by("user_id", &json!(user_id)).await?)
    }

    pub async fn balance(&self, user_id: Uuid) -> ApiResult<i64> {
        Ok(self
            .history(user_id)
            .await?
            .last()
            .map(|tx| tx.balance_after)
            .unwrap_or(0))
    }

    pub async fn wallet_summary(&self, user_id: Uuid) -> ApiResult<WalletSummary> {
        Ok(WalletSummary {
            user_id,
            balance: self.balance(user_id).await?,
            currency: self.config.currency.clone(),
        })
    }

    /// Append a signed movement; the balance may not go below zero
    async fn apply(
        &self,
        user_id: Uuid,
        kind: WalletTxKind,
        amount: i64,
        reference: Option<String>,
        description: String,
    ) -> ApiResult<WalletTransaction> {
        let _guard = self.wallet_lock.lock().await;
        let history = self.history(user_id).await?;
        let last = history.last();
        let balance = last.map(|tx| tx.balance_after).unwrap_or(0);
        let balance_after = balance
            .checked_add(amount)
            .ok_or_else(|| ValidationError::field("amount", "would overflow the wallet balance"))?;
        if balance_after < 0 {
            return Err(BillingError::InsufficientBalance {
                balance,
                required: -amount,
            }
            .into());
        }

        // Newest entry must sort last
        let mut now = Utc::now();
        if let Some(last) = last {
            if now <= last.created_at {
                now = last.created_at + Duration::microseconds(1);
            }
        }
        let tx = WalletTransaction {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            user_id,
            kind,
            amount,
            balance_after,
            reference,
            description,
        };
        Ok(self.wallet.create(tx).await?)
    }

    pub async fn top_up(
        &self,
        user_id: Uuid,
        amount: i64,
        reference: Option<String>,
        description: Option<String>,
    ) -> ApiResult<WalletTransaction> {
        if amount <= 0 {
            return Err(ValidationError::field("amount", "must be greater than 0").into());
        }
        let tx = self
            .apply(
                user_id,
                WalletTxKind::Topup,
                amount,
                reference,
                description.unwrap_or_else(|| "Wallet top-up".to_string()),
            )
            .await?;
        tracing::info!(%user_id, amount, balance = tx.balance_after, "wallet topped up");
        self.events.publish(DomainEvent::WalletToppedUp {
            user_id,
            amount,
            balance: tx.balance_after,
        });
        Ok(tx)
    }

    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        reference: &str,
        description: String,
    ) -> ApiResult<WalletTransaction> {
        self.apply(
            user_id,
            WalletTxKind::Payment,
            -amount,
            Some(reference.to_string()),
            description,
        )
        .await
    }

    pub async fn refund(
        &self,
        user_id: Uuid,
        amount: i64,
        reference: &str,
        description: String,
    ) -> ApiResult<WalletTransaction> {
        self.apply(
            user_id,
            WalletTxKind::Refund,
            amount,
            Some(reference.to_string()),
            description,
        )
        .await
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        params: &PageParams,
    ) -> ApiResult<PaginatedResponse<WalletTransaction>> {
        let mut history = self.history(user_id).await?;
        history.reverse();
        Ok(PaginatedResponse::from_items(history, params))
    }
}
