//! Order placement and the order lifecycle
//!
//! Every status change goes through [`OrderService::transition_with`], which
//! persists the new state and publishes `OrderStatusChanged`.

use super::billing::BillingService;
use super::catalog::CatalogService;
use crate::core::auth::AuthContext;
use crate::core::error::{ApiResult, EntityError, OrderError, ValidationError, WebranaError};
use crate::core::events::{DomainEvent, EventBus};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::repository::Repository;
use crate::core::validation::validators::{validate_duration, validate_hostname, validate_region};
use crate::entities::{
    Invoice, InvoiceStatus, Order, OrderStatus, PaymentMethod, User, document_number,
};
use crate::payment::{PaymentNotification, PaymentOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

pub const SYSTEM_ACTOR: &str = "system";
pub const GATEWAY_ACTOR: &str = "gateway";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    /// Plan id or slug
    #[serde(alias = "plan_id", alias = "plan_slug")]
    #[validate(length(min = 1, message = "is required"))]
    pub plan: String,
    #[validate(length(min = 1, message = "is required"))]
    pub image_slug: String,
    #[validate(custom(function = "validate_region"))]
    pub region: String,
    #[validate(custom(function = "validate_hostname"))]
    pub hostname: String,
    pub duration_months: u32,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Gateway
}

/// An order together with its invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub invoice: Option<Invoice>,
}

/// Response to the payment gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: String,
    pub action: String,
}

impl WebhookAck {
    fn new(action: &str) -> Self {
        Self {
            status: "ok".to_string(),
            action: action.to_string(),
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn Repository<Order>>,
    users: Arc<dyn Repository<User>>,
    catalog: Arc<CatalogService>,
    billing: Arc<BillingService>,
    events: EventBus,
    transition_lock: Mutex<()>,
    payment_lock: Mutex<()>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn Repository<Order>>,
        users: Arc<dyn Repository<User>>,
        catalog: Arc<CatalogService>,
        billing: Arc<BillingService>,
        events: EventBus,
    ) -> Self {
        Self {
            orders,
            users,
            catalog,
            billing,
            events,
            transition_lock: Mutex::new(()),
            payment_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn load(&self, order_id: Uuid) -> ApiResult<Order> {
        self.orders
            .get(&order_id)
            .await?
            .ok_or_else(|| EntityError::not_found("order", order_id).into())
    }

    /// Apply one state-machine step, run `mutate` on the same write and
    /// publish the change
    pub async fn transition_with(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        reason: &str,
        actor: &str,
        mutate: impl FnOnce(&mut Order) + Send,
    ) -> ApiResult<Order> {
        let (from, order) = {
            let _guard = self.transition_lock.lock().await;
            let mut order = self.load(order_id).await?;
            let from = order.status;
            order.transition(to, reason, actor)?;
            mutate(&mut order);
            (from, self.orders.update(order).await?)
        };

        tracing::info!(
            order = %order.order_number,
            from = %from,
            to = %to,
            actor,
            "order status changed"
        );
        self.events.publish(DomainEvent::OrderStatusChanged {
            order_id: order.id,
            user_id: order.user_id,
            order_number: order.order_number.clone(),
            from,
            to,
            reason: reason.to_string(),
        });
        Ok(order)
    }

    pub async fn transition(&self, order_id: Uuid, to: OrderStatus, reason: &str, actor: &str) -> ApiResult<Order> {
        self.transition_with(order_id, to, reason, actor, |_| {}).await
    }

    pub async fn create_order(
        &self,
        user_id: Uuid,
        actor: &str,
        request: CreateOrderRequest,
    ) -> ApiResult<OrderDetails> {
        validate_duration(request.duration_months)
            .map_err(|_| ValidationError::field("duration_months", "must be 1, 3, 6 or 12"))?;

        let plan = self
            .catalog
            .orderable_plan(&request.plan, &request.region)
            .await?;
        let image = self.catalog.orderable_image(&request.image_slug).await?;
        let customer = self
            .users
            .get(&user_id)
            .await?
            .ok_or_else(|| EntityError::not_found("user", user_id))?;

        let base_price = plan
            .price_monthly
            .checked_mul(request.duration_months as i64)
            .ok_or_else(|| ValidationError::field("duration_months", "price out of range"))?;
        let now = Utc::now();

        let coupon_code = request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let (discount, coupon_code) = match coupon_code {
            Some(code) => {
                let quote = self.billing.redeem_coupon(code, base_price, now).await?;
                (quote.discount, Some(quote.code))
            }
            None => (0, None),
        };
        let final_price = base_price - discount;

        if request.payment_method == PaymentMethod::Wallet && final_price > 0 {
            let balance = self.billing.balance(user_id).await?;
            if balance < final_price {
                if let Some(code) = &coupon_code {
                    self.billing.release_coupon(code).await?;
                }
                return Err(crate::core::error::BillingError::InsufficientBalance {
                    balance,
                    required: final_price,
                }
                .into());
            }
        }

        let order = Order {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            order_number: document_number("WB", now),
            user_id,
            plan_id: plan.id,
            plan_slug: plan.slug.clone(),
            provider_size_slug: plan.provider_size_slug.clone(),
            image_slug: image.slug.clone(),
            region: request.region,
            hostname: request.hostname,
            duration_months: request.duration_months,
            payment_method: request.payment_method,
            base_price,
            discount,
            final_price,
            coupon_code,
            status: OrderStatus::PendingPayment,
            status_history: Order::initial_history(actor, now),
            instance_id: None,
            failure_reason: None,
            payment_expires_at: now + self.billing.config().payment_window(),
        };
        let order = self.orders.create(order).await?;
        tracing::info!(order = %order.order_number, %user_id, final_price, "order created");
        self.events.publish(DomainEvent::OrderCreated {
            order_id: order.id,
            user_id,
            order_number: order.order_number.clone(),
            final_price,
        });

        let invoice = match self.billing.create_invoice(&order, &customer).await {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::warn!(order = %order.order_number, error = %e, "invoice creation failed");
                self.abandon(&order, "invoice could not be created").await;
                return Err(e);
            }
        };

        if final_price == 0 {
            let invoice = self.billing.mark_invoice_paid(invoice, None).await?;
            let order = self
                .transition(order.id, OrderStatus::Paid, "nothing to pay", SYSTEM_ACTOR)
                .await?;
            return Ok(OrderDetails {
                order,
                invoice: Some(invoice),
            });
        }

        if order.payment_method == PaymentMethod::Wallet {
            let description = format!("Payment for order {}", order.order_number);
            let tx = match self
                .billing
                .debit(user_id, final_price, &order.order_number, description)
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    self.abandon(&order, "wallet debit failed").await;
                    return Err(e);
                }
            };
            let invoice = self
                .billing
                .mark_invoice_paid(invoice, Some(format!("wallet:{}", tx.id)))
                .await?;
            let order = self
                .transition(order.id, OrderStatus::Paid, "paid from wallet", actor)
                .await?;
            return Ok(OrderDetails {
                order,
                invoice: Some(invoice),
            });
        }

        Ok(OrderDetails {
            order,
            invoice: Some(invoice),
        })
    }

    /// Cancel an order that could not be completed and give its coupon back
    async fn abandon(&self, order: &Order, reason: &str) {
        if let Err(e) = self
            .transition(order.id, OrderStatus::Cancelled, reason, SYSTEM_ACTOR)
            .await
        {
            tracing::error!(order = %order.order_number, error = %e, "failed to cancel abandoned order");
        }
        if let Err(e) = self
            .billing
            .close_invoice(order.id, InvoiceStatus::Cancelled)
            .await
        {
            tracing::error!(order = %order.order_number, error = %e, "failed to cancel invoice");
        }
        if let Some(code) = &order.coupon_code {
            if let Err(e) = self.billing.release_coupon(code).await {
                tracing::error!(%code, error = %e, "failed to release coupon");
            }
        }
    }

    async fn details(&self, order: Order) -> ApiResult<OrderDetails> {
        let invoice = self.billing.invoice_for_order(order.id).await?;
        Ok(OrderDetails { order, invoice })
    }

    /// Owners and admins see an order; everyone else gets a 404
    pub async fn get_order(&self, ctx: &AuthContext, order_id: Uuid) -> ApiResult<OrderDetails> {
        let order = self.load(order_id).await?;
        if !ctx.can_access(order.user_id) {
            return Err(EntityError::not_found("order", order_id).into());
        }
        self.details(order).await
    }

    /// Oldest first
    pub async fn orders_with_status(&self, status: OrderStatus) -> ApiResult<Vec<Order>> {
        Ok(self.orders.find_by("status", &json!(status)).await?)
    }

    /// Newest first; `user_id = None` lists every order
    pub async fn list_orders(
        &self,
        user_id: Option<Uuid>,
        status: Option<OrderStatus>,
        params: &PageParams,
    ) -> ApiResult<PaginatedResponse<Order>> {
        let mut orders = match user_id {
            Some(user_id) => self.orders.find_by("user_id", &json!(user_id)).await?,
            None => self.orders.list().await?,
        };
        if let Some(status) = status {
            orders.retain(|o| o.status == status);
        }
        orders.reverse();
        Ok(PaginatedResponse::from_items(orders, params))
    }

    pub async fn cancel_order(&self, ctx: &AuthContext, order_id: Uuid) -> ApiResult<OrderDetails> {
        let order = self.load(order_id).await?;
        if !ctx.can_access(order.user_id) {
            return Err(EntityError::not_found("order", order_id).into());
        }

        let _guard = self.payment_lock.lock().await;
        let order = self
            .transition(order_id, OrderStatus::Cancelled, "cancelled by customer", &ctx.actor())
            .await?;
        self.billing
            .close_invoice(order_id, InvoiceStatus::Cancelled)
            .await?;
        self.details(order).await
    }

    /// Expire unpaid orders whose payment window has passed
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> ApiResult<usize> {
        let pending = self
            .orders
            .find_by("status", &json!(OrderStatus::PendingPayment))
            .await?;
        let mut expired = 0;
        for order in pending.into_iter().filter(|o| o.is_payment_overdue(now)) {
            // Serialized with settlement so a payment is never overwritten
            let _guard = self.payment_lock.lock().await;
            match self
                .transition(order.id, OrderStatus::Expired, "payment window elapsed", SYSTEM_ACTOR)
                .await
            {
                Ok(_) => {
                    self.billing
                        .close_invoice(order.id, InvoiceStatus::Expired)
                        .await?;
                    expired += 1;
                }
                // Paid or cancelled since the scan
                Err(WebranaError::Order(OrderError::InvalidTransition { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired unpaid orders");
        }
        Ok(expired)
    }

    pub fn spawn_expiry_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = service.expire_overdue(Utc::now()).await {
                    tracing::error!(error = %e, "expiry sweep failed");
                }
            }
        })
    }

    /// Handle a payment gateway notification
    ///
    /// Redelivered notifications are acknowledged without side effects.
    pub async fn apply_payment_notification(&self, notification: PaymentNotification) -> ApiResult<WebhookAck> {
        self.billing.verify_notification(&notification)?;

        let _guard = self.payment_lock.lock().await;
        let invoice = self.billing.invoice_by_number(&notification.order_id).await?;

        let gross: f64 = notification
            .gross_amount
            .trim()
            .parse()
            .map_err(|_| ValidationError::field("gross_amount", "is not a number"))?;
        if gross.round() as i64 != invoice.amount {
            tracing::warn!(
                invoice = %invoice.invoice_number,
                expected = invoice.amount,
                got = %notification.gross_amount,
                "payment amount mismatch"
            );
            return Err(ValidationError::field("gross_amount", "does not match the invoice").into());
        }

        let outcome = notification.outcome();
        if invoice.status != InvoiceStatus::Unpaid {
            let action = if invoice.status == InvoiceStatus::Paid && outcome == PaymentOutcome::Paid {
                "duplicate"
            } else {
                "ignored"
            };
            tracing::info!(invoice = %invoice.invoice_number, status = ?invoice.status, action, "payment notification for closed invoice");
            return Ok(WebhookAck::new(action));
        }

        match outcome {
            PaymentOutcome::Paid => {
                // The invoice is only marked paid once the order accepted it
                self.transition(invoice.order_id, OrderStatus::Paid, "payment settled", GATEWAY_ACTOR)
                    .await?;
                self.billing
                    .mark_invoice_paid(invoice, notification.transaction_id.clone())
                    .await?;
                Ok(WebhookAck::new("paid"))
            }
            PaymentOutcome::Expired => {
                self.close_from_gateway(invoice.order_id, OrderStatus::Expired, InvoiceStatus::Expired, "payment expired")
                    .await?;
                Ok(WebhookAck::new("expired"))
            }
            PaymentOutcome::Cancelled => {
                self.close_from_gateway(invoice.order_id, OrderStatus::Cancelled, InvoiceStatus::Cancelled, "payment cancelled")
                    .await?;
                Ok(WebhookAck::new("cancelled"))
            }
            PaymentOutcome::Pending | PaymentOutcome::Ignored => Ok(WebhookAck::new("ignored")),
        }
    }

    async fn close_from_gateway(
        &self,
        order_id: Uuid,
        order_status: OrderStatus,
        invoice_status: InvoiceStatus,
        reason: &str,
    ) -> ApiResult<()> {
        match self.transition(order_id, order_status, reason, GATEWAY_ACTOR).await {
            Ok(_) | Err(WebranaError::Order(OrderError::InvalidTransition { .. })) => {}
            Err(e) => return Err(e),
        }
        self.billing.close_invoice(order_id, invoice_status).await?;
        Ok(())
    }

    /// Refund a failed order to the customer's wallet
    ///
    /// The wallet is credited before the order moves to `REFUNDED`, so a
    /// failed credit leaves the order `FAILED` and the refund can be retried.
    pub async fn refund_order(&self, order_id: Uuid, actor: &str) -> ApiResult<OrderDetails> {
        let _guard = self.payment_lock.lock().await;
        let order = self.load(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Refunded) {
            return Err(OrderError::InvalidTransition {
                from: order.status.to_string(),
                to: OrderStatus::Refunded.to_string(),
            }
            .into());
        }

        let credit = if order.final_price > 0 {
            Some(
                self.billing
                    .refund(
                        order.user_id,
                        order.final_price,
                        &order.order_number,
                        format!("Refund for order {}", order.order_number),
                    )
                    .await?,
            )
        } else {
            None
        };

        let order = match self
            .transition(order_id, OrderStatus::Refunded, "refunded to wallet", actor)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                if let Some(tx) = credit {
                    tracing::warn!(order = %order.order_number, error = %e, "refund transition failed, reversing credit");
                    if let Err(reverse) = self
                        .billing
                        .debit(
                            order.user_id,
                            tx.amount,
                            &order.order_number,
                            format!("Refund reversal for order {}", order.order_number),
                        )
                        .await
                    {
                        tracing::error!(order = %order.order_number, error = %reverse, "failed to reverse refund credit");
                    }
                }
                return Err(e);
            }
        };
        self.billing
            .close_invoice(order_id, InvoiceStatus::Refunded)
            .await?;
        self.details(order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::entities::{Role, UserStatus, VpsImage, VpsPlan, WalletTransaction};
    use crate::payment::{Charge, ChargeRequest, PaymentError, PaymentGateway};
    use crate::storage::{InMemoryRepository, Stores};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Accepts every signature and hands out a fixed payment page
    struct AcceptingGateway;

    #[async_trait]
    impl PaymentGateway for AcceptingGateway {
        async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, PaymentError> {
            Ok(Charge {
                token: format!("snap-{}", request.reference),
                redirect_url: "https://pay.example.com/snap".into(),
            })
        }

        fn verify_signature(&self, _notification: &PaymentNotification) -> bool {
            true
        }
    }

    /// Invoice store whose lookups take a while to answer
    struct SlowInvoices(InMemoryRepository<Invoice>);

    #[async_trait]
    impl Repository<Invoice> for SlowInvoices {
        async fn create(&self, entity: Invoice) -> anyhow::Result<Invoice> {
            self.0.create(entity).await
        }
        async fn get(&self, id: &Uuid) -> anyhow::Result<Option<Invoice>> {
            self.0.get(id).await
        }
        async fn list(&self) -> anyhow::Result<Vec<Invoice>> {
            self.0.list().await
        }
        async fn update(&self, entity: Invoice) -> anyhow::Result<Invoice> {
            self.0.update(entity).await
        }
        async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
            self.0.delete(id).await
        }
        async fn find_by(&self, field: &str, value: &Value) -> anyhow::Result<Vec<Invoice>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.find_by(field, value).await
        }
    }

    /// Ledger that refuses new lines while `down` is set
    #[derive(Default)]
    struct FlakyLedger {
        inner: InMemoryRepository<WalletTransaction>,
        down: AtomicBool,
    }

    #[async_trait]
    impl Repository<WalletTransaction> for FlakyLedger {
        async fn create(&self, entity: WalletTransaction) -> anyhow::Result<WalletTransaction> {
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("db down");
            }
            self.inner.create(entity).await
        }
        async fn get(&self, id: &Uuid) -> anyhow::Result<Option<WalletTransaction>> {
            self.inner.get(id).await
        }
        async fn list(&self) -> anyhow::Result<Vec<WalletTransaction>> {
            self.inner.list().await
        }
        async fn update(&self, entity: WalletTransaction) -> anyhow::Result<WalletTransaction> {
            self.inner.update(entity).await
        }
        async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
            self.inner.delete(id).await
        }
        async fn find_by(&self, field: &str, value: &Value) -> anyhow::Result<Vec<WalletTransaction>> {
            self.inner.find_by(field, value).await
        }
    }

    struct Fixture {
        orders: OrderService,
        billing: Arc<BillingService>,
        stores: Stores,
        user: User,
    }

    async fn fixture() -> Fixture {
        fixture_with(Stores::in_memory(), None).await
    }

    async fn fixture_with(stores: Stores, payment: Option<Arc<dyn PaymentGateway>>) -> Fixture {
        let events = EventBus::new(64);
        let catalog = Arc::new(CatalogService::new(stores.plans.clone(), stores.images.clone()));
        let billing = Arc::new(BillingService::new(
            stores.coupons.clone(),
            stores.invoices.clone(),
            stores.wallet.clone(),
            payment,
            events.clone(),
            BillingConfig::default(),
        ));
        let orders = OrderService::new(
            stores.orders.clone(),
            stores.users.clone(),
            catalog,
            billing.clone(),
            events,
        );

        let now = Utc::now();
        stores
            .plans
            .create(VpsPlan {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                slug: "basic-1gb".into(),
                name: "Basic".into(),
                description: None,
                provider_size_slug: "s-1vcpu-1gb".into(),
                vcpu: 1,
                memory_mb: 1024,
                disk_gb: 25,
                transfer_tb: 1.0,
                price_monthly: 100_000,
                regions: vec!["sgp1".into()],
                is_active: true,
                sort_order: 0,
            })
            .await
            .unwrap();
        stores
            .images
            .create(VpsImage {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                slug: "ubuntu-24-04-x64".into(),
                name: "Ubuntu".into(),
                distribution: "Ubuntu".into(),
                is_active: true,
            })
            .await
            .unwrap();
        let user = stores
            .users
            .create(User {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                email: "dian@example.com".into(),
                password_hash: String::new(),
                full_name: "Dian".into(),
                role: Role::Customer,
                status: UserStatus::Active,
                last_login_at: None,
            })
            .await
            .unwrap();

        Fixture {
            orders,
            billing,
            stores,
            user,
        }
    }

    fn request(payment_method: PaymentMethod) -> CreateOrderRequest {
        CreateOrderRequest {
            plan: "basic-1gb".into(),
            image_slug: "ubuntu-24-04-x64".into(),
            region: "sgp1".into(),
            hostname: "web-1".into(),
            duration_months: 3,
            payment_method,
            coupon_code: None,
        }
    }

    fn ctx(user: &User) -> AuthContext {
        AuthContext::User {
            user_id: user.id,
            email: user.email.clone(),
        }
    }

    #[tokio::test]
    async fn test_gateway_order_waits_for_payment() {
        let f = fixture().await;
        let details = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap();

        assert_eq!(details.order.status, OrderStatus::PendingPayment);
        assert!(details.order.order_number.starts_with("WB-"));
        assert_eq!(details.order.base_price, 300_000);
        assert_eq!(details.order.status_history.len(), 1);
        assert_eq!(details.order.status_history[0].from, None);
        let invoice = details.invoice.unwrap();
        assert!(invoice.invoice_number.starts_with("INV-"));
        assert_eq!(invoice.amount, 300_000);
        assert_eq!(invoice.due_at, details.order.payment_expires_at);
    }

    #[tokio::test]
    async fn test_wallet_order_is_paid_immediately() {
        let f = fixture().await;
        f.billing
            .top_up(f.user.id, 500_000, None, None)
            .await
            .unwrap();

        let details = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Wallet))
            .await
            .unwrap();
        assert_eq!(details.order.status, OrderStatus::Paid);
        assert_eq!(details.invoice.unwrap().status, InvoiceStatus::Paid);
        assert_eq!(f.billing.balance(f.user.id).await.unwrap(), 200_000);
    }

    #[tokio::test]
    async fn test_wallet_order_with_low_balance_rejected() {
        let f = fixture().await;
        let err = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Wallet))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
        assert!(f.stores.orders.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_discount_goes_straight_to_paid() {
        let f = fixture().await;
        f.billing
            .create_coupon(crate::services::billing::CouponInput {
                code: "GRATIS".into(),
                description: None,
                discount_type: crate::entities::DiscountType::Percent,
                value: 100,
                max_uses: None,
                min_amount: 0,
                valid_from: None,
                valid_until: None,
                is_active: true,
            })
            .await
            .unwrap();

        let mut req = request(PaymentMethod::Gateway);
        req.coupon_code = Some("gratis".into());
        let details = f.orders.create_order(f.user.id, "user:test", req).await.unwrap();

        assert_eq!(details.order.final_price, 0);
        assert_eq!(details.order.discount, 300_000);
        assert_eq!(details.order.coupon_code.as_deref(), Some("GRATIS"));
        assert_eq!(details.order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_invalid_duration_and_region() {
        let f = fixture().await;
        let mut req = request(PaymentMethod::Gateway);
        req.duration_months = 2;
        let err = f
            .orders
            .create_order(f.user.id, "user:test", req)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let mut req = request(PaymentMethod::Gateway);
        req.region = "ams3".into();
        let err = f
            .orders
            .create_order(f.user.id, "user:test", req)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ORDER_ITEM_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_cancel_only_by_owner_and_only_pending() {
        let f = fixture().await;
        let order = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;

        let stranger = AuthContext::User {
            user_id: Uuid::new_v4(),
            email: "x@example.com".into(),
        };
        let err = f.orders.cancel_order(&stranger, order.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let cancelled = f.orders.cancel_order(&ctx(&f.user), order.id).await.unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.invoice.unwrap().status, InvoiceStatus::Cancelled);

        let err = f
            .orders
            .cancel_order(&ctx(&f.user), order.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATUS_TRANSITION");
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        let f = fixture().await;
        let order = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;

        assert_eq!(f.orders.expire_overdue(Utc::now()).await.unwrap(), 0);

        let later = order.payment_expires_at + chrono::Duration::seconds(1);
        assert_eq!(f.orders.expire_overdue(later).await.unwrap(), 1);

        let details = f.orders.get_order(&ctx(&f.user), order.id).await.unwrap();
        assert_eq!(details.order.status, OrderStatus::Expired);
        assert_eq!(details.invoice.unwrap().status, InvoiceStatus::Expired);
        assert_eq!(f.orders.expire_overdue(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transition_publishes_event() {
        let f = fixture().await;
        let mut rx = f.orders.events.subscribe();
        let order = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;
        // OrderCreated
        rx.recv().await.unwrap();

        f.orders
            .transition(order.id, OrderStatus::Paid, "test", SYSTEM_ACTOR)
            .await
            .unwrap();
        match rx.recv().await.unwrap().event {
            DomainEvent::OrderStatusChanged { from, to, .. } => {
                assert_eq!(from, OrderStatus::PendingPayment);
                assert_eq!(to, OrderStatus::Paid);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refund_requires_failed() {
        let f = fixture().await;
        let order = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;

        let err = f.orders.refund_order(order.id, "admin:x").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        for (to, reason) in [
            (OrderStatus::Paid, "paid"),
            (OrderStatus::Provisioning, "start"),
            (OrderStatus::Failed, "boom"),
        ] {
            f.orders.transition(order.id, to, reason, SYSTEM_ACTOR).await.unwrap();
        }
        let refunded = f.orders.refund_order(order.id, "admin:x").await.unwrap();
        assert_eq!(refunded.order.status, OrderStatus::Refunded);
        assert_eq!(f.billing.balance(f.user.id).await.unwrap(), 300_000);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let f = fixture().await;
        let first = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;
        let second = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;

        let page = f
            .orders
            .list_orders(Some(f.user.id), None, &PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.data[0].id, second.id);
        assert_eq!(page.data[1].id, first.id);

        let other = f
            .orders
            .list_orders(Some(Uuid::new_v4()), None, &PageParams::default())
            .await
            .unwrap();
        assert!(other.data.is_empty());
    }

    fn settlement(invoice: &Invoice) -> PaymentNotification {
        PaymentNotification {
            order_id: invoice.invoice_number.clone(),
            status_code: "200".into(),
            gross_amount: format!("{}.00", invoice.amount),
            signature_key: "signed".into(),
            transaction_status: "settlement".into(),
            transaction_id: Some("trx-1".into()),
            fraud_status: Some("accept".into()),
            payment_type: Some("bank_transfer".into()),
        }
    }

    async fn fail_order(f: &Fixture, order_id: Uuid) {
        for (to, reason) in [
            (OrderStatus::Paid, "paid"),
            (OrderStatus::Provisioning, "start"),
            (OrderStatus::Failed, "boom"),
        ] {
            f.orders.transition(order_id, to, reason, SYSTEM_ACTOR).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_settlement_during_expiry_sweep_keeps_payment() {
        let mut stores = Stores::in_memory();
        stores.invoices = Arc::new(SlowInvoices(InMemoryRepository::new()));
        let f = fixture_with(stores, Some(Arc::new(AcceptingGateway))).await;
        let details = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap();
        let invoice = details.invoice.unwrap();
        let overdue = details.order.payment_expires_at + chrono::Duration::seconds(1);

        let (ack, swept) = tokio::join!(
            f.orders.apply_payment_notification(settlement(&invoice)),
            f.orders.expire_overdue(overdue),
        );

        let order = f.orders.load(details.order.id).await.unwrap();
        let invoice = f.billing.invoice_for_order(order.id).await.unwrap().unwrap();
        match order.status {
            OrderStatus::Paid => {
                assert_eq!(ack.unwrap().action, "paid");
                assert_eq!(swept.unwrap(), 0);
                assert_eq!(invoice.status, InvoiceStatus::Paid);
            }
            OrderStatus::Expired => {
                assert_eq!(ack.unwrap().action, "ignored");
                assert_eq!(swept.unwrap(), 1);
                assert_eq!(invoice.status, InvoiceStatus::Expired);
            }
            other => panic!("unexpected order status {other}"),
        }
    }

    #[tokio::test]
    async fn test_settlement_after_expiry_is_not_recorded() {
        let f = fixture_with(Stores::in_memory(), Some(Arc::new(AcceptingGateway))).await;
        let details = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap();
        let invoice = details.invoice.unwrap();
        let overdue = details.order.payment_expires_at + chrono::Duration::seconds(1);
        assert_eq!(f.orders.expire_overdue(overdue).await.unwrap(), 1);

        let mut rx = f.orders.events.subscribe();
        let ack = f
            .orders
            .apply_payment_notification(settlement(&invoice))
            .await
            .unwrap();
        assert_eq!(ack.action, "ignored");
        assert!(rx.try_recv().is_err());

        let invoice = f.billing.invoice_for_order(details.order.id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Expired);
    }

    #[tokio::test]
    async fn test_refund_survives_ledger_outage() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut stores = Stores::in_memory();
        stores.wallet = ledger.clone();
        let f = fixture_with(stores, None).await;
        let order = f
            .orders
            .create_order(f.user.id, "user:test", request(PaymentMethod::Gateway))
            .await
            .unwrap()
            .order;
        fail_order(&f, order.id).await;

        ledger.down.store(true, Ordering::SeqCst);
        let err = f.orders.refund_order(order.id, "admin:x").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(f.orders.load(order.id).await.unwrap().status, OrderStatus::Failed);
        assert_eq!(f.billing.balance(f.user.id).await.unwrap(), 0);

        ledger.down.store(false, Ordering::SeqCst);
        let refunded = f.orders.refund_order(order.id, "admin:x").await.unwrap();
        assert_eq!(refunded.order.status, OrderStatus::Refunded);
        assert_eq!(f.billing.balance(f.user.id).await.unwrap(), 300_000);
    }
}
