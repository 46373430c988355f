//! VPS provisioning on DigitalOcean accounts
//!
//! ```text
//! OrderStatusChanged{to: PAID} ──▶ worker ──▶ provision()
//!     reserve account ─▶ create droplet ─▶ poll until active ─▶ ACTIVE
//!                 └───────────── any error ──────────────────▶ FAILED
//! ```

use super::orders::{OrderService, SYSTEM_ACTOR};
use crate::config::ProviderConfig;
use crate::core::auth::AuthContext;
use crate::core::error::{ApiResult, EntityError, OrderError, ProviderError, ValidationError};
use crate::core::events::{DomainEvent, EventBus};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::repository::Repository;
use crate::entities::{
    AccountHealth, DoAccount, DoAccountView, Instance, InstanceStatus, Order, OrderStatus,
};
use crate::provider::{AccountSelector, CloudProvider, CreateDroplet, DropletAction};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

fn default_droplet_limit() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DoAccountInput {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "is required"))]
    pub api_token: String,
    #[serde(default = "default_droplet_limit")]
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub droplet_limit: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DoAccountUpdate {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub api_token: Option<String>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub droplet_limit: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Validate)]
pub struct ActionRequest {
    #[serde(rename = "type", alias = "action")]
    pub action: DropletAction,
}

pub struct ProvisioningService {
    accounts: Arc<dyn Repository<DoAccount>>,
    instances: Arc<dyn Repository<Instance>>,
    orders: Arc<OrderService>,
    provider: Arc<dyn CloudProvider>,
    selector: AccountSelector,
    config: ProviderConfig,
    // Guards droplet_count against concurrent reservations and health checks
    account_lock: Mutex<()>,
}

impl ProvisioningService {
    pub fn new(
        accounts: Arc<dyn Repository<DoAccount>>,
        instances: Arc<dyn Repository<Instance>>,
        orders: Arc<OrderService>,
        provider: Arc<dyn CloudProvider>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            accounts,
            instances,
            orders,
            provider,
            selector: AccountSelector::new(),
            config,
            account_lock: Mutex::new(()),
        }
    }

    /// Provision the droplet for a PAID order, or retry a FAILED one
    pub async fn provision(&self, order_id: Uuid, actor: &str) -> ApiResult<Instance> {
        let order = self.orders.load(order_id).await?;
        let reason = match order.status {
            OrderStatus::Failed => "provisioning retried",
            _ => "provisioning started",
        };
        let order = self
            .orders
            .transition_with(order_id, OrderStatus::Provisioning, reason, actor, |o| {
                o.failure_reason = None;
            })
            .await?;

        match self.build(&order).await {
            Ok(instance) => {
                let instance_id = instance.id;
                self.orders
                    .transition_with(
                        order_id,
                        OrderStatus::Active,
                        "instance is running",
                        SYSTEM_ACTOR,
                        move |o| o.instance_id = Some(instance_id),
                    )
                    .await?;
                tracing::info!(
                    order = %order.order_number,
                    droplet_id = instance.droplet_id,
                    ipv4 = ?instance.ipv4,
                    "instance provisioned"
                );
                Ok(instance)
            }
            Err(e) => {
                tracing::error!(order = %order.order_number, error = %e, "provisioning failed");
                let failure = e.to_string();
                self.orders
                    .transition_with(
                        order_id,
                        OrderStatus::Failed,
                        "provisioning failed",
                        SYSTEM_ACTOR,
                        move |o| o.failure_reason = Some(failure),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn build(&self, order: &Order) -> ApiResult<Instance> {
        let account = self.reserve_account().await?;
        let request = CreateDroplet {
            name: order.hostname.clone(),
            region: order.region.clone(),
            size: order.provider_size_slug.clone(),
            image: order.image_slug.clone(),
            tags: vec!["webrana".to_string(), format!("order-{}", order.id)],
        };

        let droplet = match self.provider.create_droplet(&account.api_token, &request).await {
            Ok(droplet) => droplet,
            Err(e) => {
                self.release_account(account.id).await;
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let created = self
            .instances
            .create(Instance {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                order_id: order.id,
                user_id: order.user_id,
                do_account_id: account.id,
                droplet_id: droplet.id,
                name: droplet.name.clone(),
                region: order.region.clone(),
                size_slug: order.provider_size_slug.clone(),
                image_slug: order.image_slug.clone(),
                ipv4: droplet.ipv4.clone(),
                status: InstanceStatus::New,
            })
            .await;
        let instance = match created {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(droplet_id = droplet.id, error = %e, "could not record instance, deleting droplet");
                self.delete_untracked(&account, droplet.id).await;
                return Err(e.into());
            }
        };

        match self.wait_until_active(&account, instance.droplet_id).await {
            Ok(ipv4) => {
                let mut instance = instance;
                instance.ipv4 = ipv4.or(instance.ipv4.take());
                instance.status = InstanceStatus::Active;
                instance.updated_at = Utc::now();
                Ok(self.instances.update(instance).await?)
            }
            Err(e) => {
                self.discard(&account, instance).await;
                Err(e)
            }
        }
    }

    /// Poll the droplet until it reports `active`; returns its public IPv4
    async fn wait_until_active(&self, account: &DoAccount, droplet_id: i64) -> ApiResult<Option<String>> {
        for attempt in 1..=self.config.poll_attempts {
            match self.provider.get_droplet(&account.api_token, droplet_id).await {
                Ok(droplet) if droplet.is_active() => return Ok(droplet.ipv4),
                Ok(droplet) => {
                    tracing::debug!(droplet_id, attempt, status = %droplet.status, "droplet not active yet");
                }
                Err(e) => {
                    tracing::warn!(droplet_id, attempt, error = %e, "droplet status check failed");
                }
            }
            if attempt < self.config.poll_attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }
        Err(ProviderError::ProvisionTimeout { droplet_id }.into())
    }

    /// Delete a droplet we hold no instance record for and free its slot
    async fn delete_untracked(&self, account: &DoAccount, droplet_id: i64) {
        if let Err(e) = self.provider.delete_droplet(&account.api_token, droplet_id).await {
            tracing::warn!(droplet_id, error = %e, "could not delete failed droplet");
        }
        self.release_account(account.id).await;
    }

    /// Best-effort cleanup of a droplet that never became usable
    async fn discard(&self, account: &DoAccount, mut instance: Instance) {
        if let Err(e) = self
            .provider
            .delete_droplet(&account.api_token, instance.droplet_id)
            .await
        {
            tracing::warn!(droplet_id = instance.droplet_id, error = %e, "could not delete failed droplet");
        }
        instance.status = InstanceStatus::Deleted;
        instance.updated_at = Utc::now();
        if let Err(e) = self.instances.update(instance).await {
            tracing::error!(error = %e, "could not mark instance deleted");
        }
        self.release_account(account.id).await;
    }

    async fn reserve_account(&self) -> ApiResult<DoAccount> {
        let _guard = self.account_lock.lock().await;
        let accounts = self.accounts.list().await?;
        let mut account = self
            .selector
            .select(&accounts)
            .ok_or(ProviderError::NoCapacity)?;
        account.droplet_count += 1;
        account.updated_at = Utc::now();
        Ok(self.accounts.update(account).await?)
    }

    async fn release_account(&self, account_id: Uuid) {
        let _guard = self.account_lock.lock().await;
        let result = async {
            if let Some(mut account) = self.accounts.get(&account_id).await? {
                account.droplet_count = account.droplet_count.saturating_sub(1);
                account.updated_at = Utc::now();
                self.accounts.update(account).await?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(e) = result {
            tracing::error!(%account_id, error = %e, "could not release droplet slot");
        }
    }

    async fn load_instance(&self, ctx: &AuthContext, instance_id: Uuid) -> ApiResult<Instance> {
        let instance = self
            .instances
            .get(&instance_id)
            .await?
            .filter(|i| ctx.can_access(i.user_id))
            .ok_or_else(|| EntityError::not_found("instance", instance_id))?;
        Ok(instance)
    }

    async fn account_token(&self, account_id: Uuid) -> ApiResult<String> {
        self.accounts
            .get(&account_id)
            .await?
            .map(|a| a.api_token)
            .ok_or_else(|| EntityError::not_found("do_account", account_id).into())
    }

    pub async fn get_instance(&self, ctx: &AuthContext, instance_id: Uuid) -> ApiResult<Instance> {
        self.load_instance(ctx, instance_id).await
    }

    /// Newest first; `user_id = None` lists every instance
    pub async fn list_instances(
        &self,
        user_id: Option<Uuid>,
        params: &PageParams,
    ) -> ApiResult<PaginatedResponse<Instance>> {
        let mut instances = match user_id {
            Some(user_id) => self.instances.find_by("user_id", &json!(user_id)).await?,
            None => self.instances.list().await?,
        };
        instances.reverse();
        Ok(PaginatedResponse::from_items(instances, params))
    }

    pub async fn action(
        &self,
        ctx: &AuthContext,
        instance_id: Uuid,
        action: DropletAction,
    ) -> ApiResult<Instance> {
        let mut instance = self.load_instance(ctx, instance_id).await?;
        if instance.status == InstanceStatus::Deleted {
            return Err(OrderError::InvalidTransition {
                from: "deleted".to_string(),
                to: action.as_str().to_string(),
            }
            .into());
        }

        let token = self.account_token(instance.do_account_id).await?;
        self.provider
            .droplet_action(&token, instance.droplet_id, action)
            .await?;
        tracing::info!(%instance_id, action = action.as_str(), actor = %ctx.actor(), "droplet action requested");

        instance.status = match action {
            DropletAction::PowerOff => InstanceStatus::Off,
            DropletAction::PowerOn | DropletAction::Reboot => InstanceStatus::Active,
        };
        instance.updated_at = Utc::now();
        Ok(self.instances.update(instance).await?)
    }

    /// Delete the droplet and close the order
    pub async fn terminate(&self, ctx: &AuthContext, instance_id: Uuid) -> ApiResult<Instance> {
        let mut instance = self.load_instance(ctx, instance_id).await?;
        let order = self.orders.load(instance.order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Terminated) {
            return Err(OrderError::InvalidTransition {
                from: order.status.to_string(),
                to: OrderStatus::Terminated.to_string(),
            }
            .into());
        }

        let token = self.account_token(instance.do_account_id).await?;
        self.provider
            .delete_droplet(&token, instance.droplet_id)
            .await?;

        instance.status = InstanceStatus::Deleted;
        instance.updated_at = Utc::now();
        let instance = self.instances.update(instance).await?;
        self.release_account(instance.do_account_id).await;

        self.orders
            .transition(order.id, OrderStatus::Terminated, "instance terminated", &ctx.actor())
            .await?;
        tracing::info!(%instance_id, droplet_id = instance.droplet_id, "instance terminated");
        Ok(instance)
    }

    pub async fn list_accounts(&self) -> ApiResult<Vec<DoAccountView>> {
        let mut accounts = self.accounts.list().await?;
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts.iter().map(DoAccountView::from).collect())
    }

    pub async fn create_account(&self, input: DoAccountInput) -> ApiResult<DoAccountView> {
        let now = Utc::now();
        let account = self
            .accounts
            .create(DoAccount {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                name: input.name.trim().to_string(),
                api_token: input.api_token.trim().to_string(),
                droplet_limit: input.droplet_limit,
                droplet_count: 0,
                is_active: input.is_active,
                health: AccountHealth::Unknown,
                consecutive_failures: 0,
                last_checked_at: None,
                last_error: None,
            })
            .await?;
        tracing::info!(account = %account.name, "provider account added");
        Ok(DoAccountView::from(&account))
    }

    pub async fn update_account(&self, account_id: Uuid, update: DoAccountUpdate) -> ApiResult<DoAccountView> {
        let _guard = self.account_lock.lock().await;
        let mut account = self
            .accounts
            .get(&account_id)
            .await?
            .ok_or_else(|| EntityError::not_found("do_account", account_id))?;

        if let Some(name) = update.name {
            account.name = name.trim().to_string();
        }
        if let Some(token) = update.api_token {
            account.api_token = token.trim().to_string();
            // A new token has not been checked yet
            account.health = AccountHealth::Unknown;
            account.consecutive_failures = 0;
            account.last_error = None;
        }
        if let Some(limit) = update.droplet_limit {
            account.droplet_limit = limit;
        }
        if let Some(active) = update.is_active {
            account.is_active = active;
        }
        account.updated_at = Utc::now();
        let account = self.accounts.update(account).await?;
        Ok(DoAccountView::from(&account))
    }

    /// Refuses while the account still hosts live instances
    pub async fn delete_account(&self, account_id: Uuid) -> ApiResult<()> {
        let live = self
            .instances
            .find_by("do_account_id", &json!(account_id))
            .await?
            .into_iter()
            .filter(|i| i.status != InstanceStatus::Deleted)
            .count();
        if live > 0 {
            return Err(ValidationError::field(
                "do_account",
                format!("still hosts {} instance(s)", live),
            )
            .into());
        }
        if !self.accounts.delete(&account_id).await? {
            return Err(EntityError::not_found("do_account", account_id).into());
        }
        tracing::info!(%account_id, "provider account removed");
        Ok(())
    }

    pub async fn health_check(&self, account_id: Uuid) -> ApiResult<DoAccountView> {
        let account = self
            .accounts
            .get(&account_id)
            .await?
            .ok_or_else(|| EntityError::not_found("do_account", account_id))?;
        self.check_account(account).await
    }

    pub async fn health_check_all(&self) -> ApiResult<Vec<DoAccountView>> {
        let mut accounts = self.accounts.list().await?;
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut checked = Vec::with_capacity(accounts.len());
        for account in accounts {
            checked.push(self.check_account(account).await?);
        }
        Ok(checked)
    }

    async fn check_account(&self, account: DoAccount) -> ApiResult<DoAccountView> {
        let probe = async {
            let info = self.provider.account_info(&account.api_token).await?;
            let count = self.provider.count_droplets(&account.api_token).await?;
            Ok::<_, crate::provider::CloudError>((info, count))
        }
        .await;

        let _guard = self.account_lock.lock().await;
        // Reload so a reservation made during the probe is not lost
        let Some(mut current) = self.accounts.get(&account.id).await? else {
            return Err(EntityError::not_found("do_account", account.id).into());
        };
        match probe {
            Ok((info, count)) => {
                current.record_check_success(info.droplet_limit, count);
                tracing::debug!(account = %current.name, count, limit = info.droplet_limit, "account healthy");
            }
            Err(e) => {
                current.record_check_failure(e.to_string(), self.config.unhealthy_threshold);
                tracing::warn!(
                    account = %current.name,
                    failures = current.consecutive_failures,
                    error = %e,
                    "account health check failed"
                );
            }
        }
        let current = self.accounts.update(current).await?;
        Ok(DoAccountView::from(&current))
    }

    fn spawn_provision(self: &Arc<Self>, order_id: Uuid) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are recorded on the order
            let _ = service.provision(order_id, SYSTEM_ACTOR).await;
        });
    }

    /// Start provisioning for every order sitting in PAID
    ///
    /// Orders already picked up elsewhere fail the PAID → PROVISIONING step
    /// and are left alone.
    pub async fn resume_paid_orders(self: &Arc<Self>) -> ApiResult<usize> {
        let waiting = self.orders.orders_with_status(OrderStatus::Paid).await?;
        for order in &waiting {
            self.spawn_provision(order.id);
        }
        if !waiting.is_empty() {
            tracing::info!(orders = waiting.len(), "resuming provisioning for paid orders");
        }
        Ok(waiting.len())
    }

    /// Provision every order that reaches PAID
    ///
    /// Paid orders are also picked up once at startup and again whenever the
    /// worker misses events.
    pub fn spawn_worker(self: &Arc<Self>, events: &EventBus) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.resume_paid_orders().await {
                tracing::error!(error = %e, "startup scan for paid orders failed");
            }
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let DomainEvent::OrderStatusChanged {
                            order_id,
                            to: OrderStatus::Paid,
                            ..
                        } = envelope.event
                        {
                            service.spawn_provision(order_id);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "provisioning worker lagged behind events");
                        if let Err(e) = service.resume_paid_orders().await {
                            tracing::error!(error = %e, "scan for paid orders failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn spawn_health_checks(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = service.health_check_all().await {
                    tracing::error!(error = %e, "account health sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::entities::{PaymentMethod, Role, User, UserStatus, VpsImage, VpsPlan};
    use crate::provider::{AccountInfo, CloudError, Droplet};
    use crate::services::billing::BillingService;
    use crate::services::catalog::CatalogService;
    use crate::services::orders::CreateOrderRequest;
    use crate::storage::{InMemoryRepository, Stores};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// In-process provider: droplets become active after `boot_polls` polls
    #[derive(Default)]
    struct FakeCloud {
        next_id: AtomicI64,
        boot_polls: u32,
        fail_create: bool,
        fail_account: bool,
        polls: StdMutex<u32>,
        created: StdMutex<Vec<(String, CreateDroplet)>>,
        deleted: StdMutex<Vec<i64>>,
        actions: StdMutex<Vec<(i64, DropletAction)>>,
    }

    #[async_trait]
    impl CloudProvider for FakeCloud {
        async fn account_info(&self, _token: &str) -> Result<AccountInfo, CloudError> {
            if self.fail_account {
                return Err(CloudError::Http {
                    status: 401,
                    message: "Unable to authenticate you".into(),
                });
            }
            Ok(AccountInfo {
                droplet_limit: 25,
                status: "active".into(),
                email: None,
            })
        }

        async fn count_droplets(&self, _token: &str) -> Result<u32, CloudError> {
            Ok(self.created.lock().unwrap().len() as u32)
        }

        async fn create_droplet(&self, token: &str, request: &CreateDroplet) -> Result<Droplet, CloudError> {
            if self.fail_create {
                return Err(CloudError::Http {
                    status: 422,
                    message: "size unavailable".into(),
                });
            }
            self.created
                .lock()
                .unwrap()
                .push((token.to_string(), request.clone()));
            Ok(Droplet {
                id: 1000 + self.next_id.fetch_add(1, Ordering::SeqCst),
                name: request.name.clone(),
                status: "new".into(),
                ipv4: None,
            })
        }

        async fn get_droplet(&self, _token: &str, droplet_id: i64) -> Result<Droplet, CloudError> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            let active = *polls >= self.boot_polls;
            Ok(Droplet {
                id: droplet_id,
                name: "vm".into(),
                status: if active { "active" } else { "new" }.into(),
                ipv4: active.then(|| "203.0.113.10".to_string()),
            })
        }

        async fn delete_droplet(&self, _token: &str, droplet_id: i64) -> Result<(), CloudError> {
            self.deleted.lock().unwrap().push(droplet_id);
            Ok(())
        }

        async fn droplet_action(&self, _token: &str, droplet_id: i64, action: DropletAction) -> Result<(), CloudError> {
            self.actions.lock().unwrap().push((droplet_id, action));
            Ok(())
        }
    }

    /// Instance store that cannot take new records
    #[derive(Default)]
    struct RefusingInstances(InMemoryRepository<Instance>);

    #[async_trait]
    impl Repository<Instance> for RefusingInstances {
        async fn create(&self, _entity: Instance) -> anyhow::Result<Instance> {
            anyhow::bail!("instances table unavailable")
        }
        async fn get(&self, id: &Uuid) -> anyhow::Result<Option<Instance>> {
            self.0.get(id).await
        }
        async fn list(&self) -> anyhow::Result<Vec<Instance>> {
            self.0.list().await
        }
        async fn update(&self, entity: Instance) -> anyhow::Result<Instance> {
            self.0.update(entity).await
        }
        async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
            self.0.delete(id).await
        }
        async fn find_by(&self, field: &str, value: &Value) -> anyhow::Result<Vec<Instance>> {
            self.0.find_by(field, value).await
        }
    }

    struct Fixture {
        provisioning: Arc<ProvisioningService>,
        orders: Arc<OrderService>,
        stores: Stores,
        cloud: Arc<FakeCloud>,
        user: User,
    }

    async fn fixture(cloud: FakeCloud, poll_attempts: u32) -> Fixture {
        fixture_on(Stores::in_memory(), EventBus::new(64), cloud, poll_attempts).await
    }

    async fn fixture_on(stores: Stores, events: EventBus, cloud: FakeCloud, poll_attempts: u32) -> Fixture {
        let catalog = Arc::new(CatalogService::new(stores.plans.clone(), stores.images.clone()));
        let billing = Arc::new(BillingService::new(
            stores.coupons.clone(),
            stores.invoices.clone(),
            stores.wallet.clone(),
            None,
            events.clone(),
            BillingConfig::default(),
        ));
        let orders = Arc::new(OrderService::new(
            stores.orders.clone(),
            stores.users.clone(),
            catalog,
            billing,
            events,
        ));
        let cloud = Arc::new(cloud);
        let provisioning = Arc::new(ProvisioningService::new(
            stores.do_accounts.clone(),
            stores.instances.clone(),
            orders.clone(),
            cloud.clone(),
            ProviderConfig {
                poll_interval_ms: 0,
                poll_attempts,
                ..ProviderConfig::default()
            },
        ));

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
                price_monthly: 50_000,
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
                slug: "debian-12-x64".into(),
                name: "Debian 12".into(),
                distribution: "Debian".into(),
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
                email: "rina@example.com".into(),
                password_hash: String::new(),
                full_name: "Rina".into(),
                role: Role::Customer,
                status: UserStatus::Active,
                last_login_at: None,
            })
            .await
            .unwrap();

        Fixture {
            provisioning,
            orders,
            stores,
            cloud,
            user,
        }
    }

    async fn paid_order(f: &Fixture) -> Order {
        let order = f
            .orders
            .create_order(
                f.user.id,
                "user:test",
                CreateOrderRequest {
                    plan: "basic-1gb".into(),
                    image_slug: "debian-12-x64".into(),
                    region: "sgp1".into(),
                    hostname: "app-server".into(),
                    duration_months: 1,
                    payment_method: PaymentMethod::Gateway,
                    coupon_code: None,
                },
            )
            .await
            .unwrap()
            .order;
        f.orders
            .transition(order.id, OrderStatus::Paid, "test", SYSTEM_ACTOR)
            .await
            .unwrap()
    }

    async fn account(f: &Fixture, name: &str, limit: u32) -> DoAccountView {
        f.provisioning
            .create_account(DoAccountInput {
                name: name.into(),
                api_token: format!("dop_v1_{}", name),
                droplet_limit: limit,
                is_active: true,
            })
            .await
            .unwrap()
    }

    fn owner(user: &User) -> AuthContext {
        AuthContext::User {
            user_id: user.id,
            email: user.email.clone(),
        }
    }

    #[tokio::test]
    async fn test_provision_to_active() {
        let f = fixture(FakeCloud { boot_polls: 2, ..Default::default() }, 5).await;
        let acct = account(&f, "primary", 5).await;
        let order = paid_order(&f).await;

        let instance = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Active);
        assert_eq!(instance.ipv4.as_deref(), Some("203.0.113.10"));

        let order = f.orders.load(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.instance_id, Some(instance.id));

        let created = f.cloud.created.lock().unwrap().clone();
        assert_eq!(created[0].0, "dop_v1_primary");
        assert_eq!(created[0].1.name, "app-server");
        assert_eq!(created[0].1.size, "s-1vcpu-1gb");
        assert!(created[0].1.tags.contains(&format!("order-{}", order.id)));

        let stored = f.stores.do_accounts.get(&acct.id).await.unwrap().unwrap();
        assert_eq!(stored.droplet_count, 1);
    }

    #[tokio::test]
    async fn test_no_capacity_fails_order() {
        let f = fixture(FakeCloud::default(), 3).await;
        let order = paid_order(&f).await;

        let err = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let order = f.orders.load(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(order.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_create_failure_releases_slot() {
        let f = fixture(FakeCloud { fail_create: true, ..Default::default() }, 3).await;
        let acct = account(&f, "primary", 1).await;
        let order = paid_order(&f).await;

        assert!(f.provisioning.provision(order.id, SYSTEM_ACTOR).await.is_err());
        let stored = f.stores.do_accounts.get(&acct.id).await.unwrap().unwrap();
        assert_eq!(stored.droplet_count, 0);
    }

    #[tokio::test]
    async fn test_poll_timeout_cleans_up_droplet() {
        let f = fixture(FakeCloud { boot_polls: 100, ..Default::default() }, 3).await;
        let acct = account(&f, "primary", 2).await;
        let order = paid_order(&f).await;

        let err = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap_err();
        assert_eq!(err.error_code(), "PROVISION_TIMEOUT");
        assert_eq!(f.cloud.deleted.lock().unwrap().len(), 1);

        let instances = f.stores.instances.list().await.unwrap();
        assert_eq!(instances[0].status, InstanceStatus::Deleted);
        let stored = f.stores.do_accounts.get(&acct.id).await.unwrap().unwrap();
        assert_eq!(stored.droplet_count, 0);

        // Failed orders can be retried
        let err = f.provisioning.provision(order.id, "admin:ops").await.unwrap_err();
        assert_eq!(err.error_code(), "PROVISION_TIMEOUT");
        let order = f.orders.load(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.status_history.len(), 6);
    }

    #[tokio::test]
    async fn test_provision_requires_paid() {
        let f = fixture(FakeCloud::default(), 3).await;
        account(&f, "primary", 2).await;
        let order = paid_order(&f).await;
        f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap();

        let err = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_round_robin_across_accounts() {
        let f = fixture(FakeCloud::default(), 3).await;
        let a = account(&f, "alpha", 5).await;
        let b = account(&f, "beta", 5).await;

        for _ in 0..4 {
            let order = paid_order(&f).await;
            f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap();
        }
        let a = f.stores.do_accounts.get(&a.id).await.unwrap().unwrap();
        let b = f.stores.do_accounts.get(&b.id).await.unwrap().unwrap();
        assert_eq!(a.droplet_count, 2);
        assert_eq!(b.droplet_count, 2);
    }

    #[tokio::test]
    async fn test_actions_and_terminate() {
        let f = fixture(FakeCloud::default(), 3).await;
        let acct = account(&f, "primary", 2).await;
        let order = paid_order(&f).await;
        let instance = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap();

        let stranger = AuthContext::User {
            user_id: Uuid::new_v4(),
            email: "x@example.com".into(),
        };
        let err = f
            .provisioning
            .action(&stranger, instance.id, DropletAction::Reboot)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let off = f
            .provisioning
            .action(&owner(&f.user), instance.id, DropletAction::PowerOff)
            .await
            .unwrap();
        assert_eq!(off.status, InstanceStatus::Off);

        let gone = f
            .provisioning
            .terminate(&owner(&f.user), instance.id)
            .await
            .unwrap();
        assert_eq!(gone.status, InstanceStatus::Deleted);
        assert_eq!(f.cloud.deleted.lock().unwrap().as_slice(), &[instance.droplet_id]);
        assert_eq!(
            f.orders.load(order.id).await.unwrap().status,
            OrderStatus::Terminated
        );
        let stored = f.stores.do_accounts.get(&acct.id).await.unwrap().unwrap();
        assert_eq!(stored.droplet_count, 0);

        let err = f
            .provisioning
            .action(&owner(&f.user), instance.id, DropletAction::PowerOn)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health_check_records_success_and_failure() {
        let f = fixture(FakeCloud::default(), 3).await;
        let acct = account(&f, "primary", 5).await;
        let view = f.provisioning.health_check(acct.id).await.unwrap();
        assert_eq!(view.health, AccountHealth::Healthy);
        assert_eq!(view.droplet_limit, 25);

        let f = fixture(FakeCloud { fail_account: true, ..Default::default() }, 3).await;
        let acct = account(&f, "broken", 5).await;
        for _ in 0..2 {
            f.provisioning.health_check_all().await.unwrap();
        }
        let view = f.provisioning.health_check(acct.id).await.unwrap();
        assert_eq!(view.consecutive_failures, 3);
        assert_eq!(view.health, AccountHealth::Unhealthy);
        assert!(view.last_error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_delete_account_with_live_instance_refused() {
        let f = fixture(FakeCloud::default(), 3).await;
        let acct = account(&f, "primary", 2).await;
        let order = paid_order(&f).await;
        f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap();

        let err = f.provisioning.delete_account(acct.id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_worker_provisions_paid_orders() {
        let f = fixture(FakeCloud::default(), 3).await;
        account(&f, "primary", 2).await;
        let worker = f.provisioning.spawn_worker(f.orders.events());

        let order = f
            .orders
            .create_order(
                f.user.id,
                "user:test",
                CreateOrderRequest {
                    plan: "basic-1gb".into(),
                    image_slug: "debian-12-x64".into(),
                    region: "sgp1".into(),
                    hostname: "worker-test".into(),
                    duration_months: 1,
                    payment_method: PaymentMethod::Gateway,
                    coupon_code: None,
                },
            )
            .await
            .unwrap()
            .order;
        f.orders
            .transition(order.id, OrderStatus::Paid, "test", SYSTEM_ACTOR)
            .await
            .unwrap();

        let mut status = OrderStatus::Paid;
        for _ in 0..50 {
            status = f.orders.load(order.id).await.unwrap().status;
            if status == OrderStatus::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, OrderStatus::Active);
        worker.abort();
    }

    async fn wait_for(orders: &OrderService, order_id: Uuid, want: OrderStatus) -> OrderStatus {
        let mut status = orders.load(order_id).await.unwrap().status;
        for _ in 0..100 {
            if status == want {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = orders.load(order_id).await.unwrap().status;
        }
        status
    }

    #[tokio::test]
    async fn test_worker_resumes_orders_paid_before_start() {
        let f = fixture(FakeCloud::default(), 3).await;
        account(&f, "primary", 5).await;
        let order = paid_order(&f).await;

        let worker = f.provisioning.spawn_worker(f.orders.events());
        assert_eq!(wait_for(&f.orders, order.id, OrderStatus::Active).await, OrderStatus::Active);
        assert_eq!(f.cloud.created.lock().unwrap().len(), 1);
        worker.abort();
    }

    #[tokio::test]
    async fn test_worker_catches_up_after_missing_events() {
        let f = fixture_on(Stores::in_memory(), EventBus::new(1), FakeCloud::default(), 3).await;
        account(&f, "primary", 10).await;
        let worker = f.provisioning.spawn_worker(f.orders.events());
        tokio::task::yield_now().await;

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(paid_order(&f).await.id);
        }
        for id in ids {
            assert_eq!(wait_for(&f.orders, id, OrderStatus::Active).await, OrderStatus::Active);
        }
        assert_eq!(f.cloud.created.lock().unwrap().len(), 4);
        worker.abort();
    }

    #[tokio::test]
    async fn test_unrecorded_droplet_is_deleted() {
        let mut stores = Stores::in_memory();
        stores.instances = Arc::new(RefusingInstances::default());
        let f = fixture_on(stores, EventBus::new(64), FakeCloud::default(), 3).await;
        let acct = account(&f, "primary", 2).await;
        let order = paid_order(&f).await;

        let err = f.provisioning.provision(order.id, SYSTEM_ACTOR).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(f.cloud.deleted.lock().unwrap().as_slice(), &[1000]);

        let stored = f.stores.do_accounts.get(&acct.id).await.unwrap().unwrap();
        assert_eq!(stored.droplet_count, 0);
        assert_eq!(f.orders.load(order.id).await.unwrap().status, OrderStatus::Failed);
    }
}
