//! Shared application state
//!
//! One [`AppState`] is built per process and cloned into every handler. It
//! holds the services (each behind an `Arc`) and the request authenticator.

use super::gateway::GatewayProxy;
use crate::auth::{ApiKeyAuthProvider, Authenticator, JwtAuthProvider, JwtKeys};
use crate::config::AppConfig;
use crate::core::events::EventBus;
use crate::payment::PaymentGateway;
use crate::provider::CloudProvider;
use crate::services::{
    AuthService, BillingService, CatalogService, NotificationService, OrderService,
    ProvisioningService,
};
use crate::storage::Stores;
use anyhow::{Context, Result};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub events: EventBus,
    pub authenticator: Arc<Authenticator>,
    pub auth: Arc<AuthService>,
    pub catalog: Arc<CatalogService>,
    pub billing: Arc<BillingService>,
    pub orders: Arc<OrderService>,
    pub provisioning: Arc<ProvisioningService>,
    pub notifications: Arc<NotificationService>,
    pub gateway: Arc<GatewayProxy>,
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.authenticator)
    }
}

impl AppState {
    /// Wire every service on top of `stores` and the given outbound clients
    pub fn build(
        config: AppConfig,
        stores: Stores,
        provider: Arc<dyn CloudProvider>,
        payment: Option<Arc<dyn PaymentGateway>>,
    ) -> Result<Self> {
        let events = EventBus::new(config.notifications.event_bus_capacity);
        let keys = JwtKeys::from_config(&config.auth).context("invalid JWT key material")?;

        let authenticator = Arc::new(Authenticator::new(
            JwtAuthProvider::new(keys.clone()),
            ApiKeyAuthProvider::new(&config.auth.internal_api_keys),
            stores.users.clone(),
        ));
        let auth = Arc::new(AuthService::new(stores.users.clone(), keys));
        let catalog = Arc::new(CatalogService::new(stores.plans.clone(), stores.images.clone()));
        let billing = Arc::new(BillingService::new(
            stores.coupons.clone(),
            stores.invoices.clone(),
            stores.wallet.clone(),
            payment,
            events.clone(),
            config.billing.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            stores.orders.clone(),
            stores.users.clone(),
            catalog.clone(),
            billing.clone(),
            events.clone(),
        ));
        let provisioning = Arc::new(ProvisioningService::new(
            stores.do_accounts.clone(),
            stores.instances.clone(),
            orders.clone(),
            provider,
            config.provider.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(stores.notifications.clone()));
        let gateway = Arc::new(
            GatewayProxy::new(&config.gateway).context("failed to build gateway HTTP client")?,
        );

        Ok(Self {
            config: Arc::new(config),
            events,
            authenticator,
            auth,
            catalog,
            billing,
            orders,
            provisioning,
            notifications,
            gateway,
        })
    }

    /// Create the configured admin account when it does not exist yet
    pub async fn bootstrap(&self) -> Result<()> {
        if let Some(admin) = &self.config.auth.bootstrap_admin {
            self.auth
                .ensure_admin(&admin.email, &admin.password, &admin.full_name)
                .await
                .context("failed to create bootstrap admin")?;
        }
        Ok(())
    }
}
