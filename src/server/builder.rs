//! ServerBuilder for assembling and running the HTTP server

use super::routes::{self, api_routes};
use super::state::AppState;
use crate::config::AppConfig;
use crate::core::error::{ApiResult, EntityError};
use crate::payment::{MidtransGateway, PaymentGateway};
use crate::provider::{CloudProvider, DigitalOceanClient};
use crate::storage::Stores;
use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Uri};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builder for the application server
///
/// # Example
///
/// ```ignore
/// ServerBuilder::new(AppConfig::load()?)
///     .with_stores(Stores::in_memory())
///     .serve()
///     .await?;
/// ```
pub struct ServerBuilder {
    config: AppConfig,
    stores: Option<Stores>,
    provider: Option<Arc<dyn CloudProvider>>,
    payment: Option<Arc<dyn PaymentGateway>>,
    custom_routes: Vec<Router<AppState>>,
    background_tasks: bool,
}

impl ServerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            stores: None,
            provider: None,
            payment: None,
            custom_routes: Vec::new(),
            background_tasks: true,
        }
    }

    /// Repositories to use; in-memory when not set
    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Cloud provider client; built from `provider` config when not set
    pub fn with_provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Payment gateway client; built from `payment` config when not set and
    /// payments are enabled
    pub fn with_payment_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payment = Some(gateway);
        self
    }

    /// Extra routes merged at the root
    pub fn with_custom_routes(mut self, routes: Router<AppState>) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Do not start the notifier, provisioning worker and sweepers in `serve`
    pub fn without_background_tasks(mut self) -> Self {
        self.background_tasks = false;
        self
    }

    pub fn build_state(&mut self) -> Result<AppState> {
        self.config.validate().context("invalid configuration")?;
        let stores = self.stores.take().unwrap_or_else(Stores::in_memory);
        let provider = match self.provider.take() {
            Some(provider) => provider,
            None => Arc::new(
                DigitalOceanClient::new(&self.config.provider)
                    .context("failed to build DigitalOcean client")?,
            ),
        };
        let payment = match self.payment.take() {
            Some(payment) => Some(payment),
            None if self.config.payment.enabled => Some(Arc::new(
                MidtransGateway::new(&self.config.payment)
                    .context("failed to build payment client")?,
            ) as Arc<dyn PaymentGateway>),
            None => None,
        };
        AppState::build(self.config.clone(), stores, provider, payment)
    }

    /// Router and the state behind it
    pub fn build_with_state(mut self) -> Result<(Router, AppState)> {
        let state = self.build_state()?;
        let custom_routes = std::mem::take(&mut self.custom_routes);
        Ok((router(state.clone(), custom_routes), state))
    }

    pub fn build(self) -> Result<Router> {
        Ok(self.build_with_state()?.0)
    }

    /// Serve with graceful shutdown on SIGTERM and Ctrl+C
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.server.bind_addr();
        let background_tasks = self.background_tasks;
        let (app, state) = self.build_with_state()?;

        state.bootstrap().await?;
        let tasks = if background_tasks {
            spawn_background_tasks(&state)
        } else {
            Vec::new()
        };

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for task in tasks {
            task.abort();
        }
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Full application router with tracing, request ids and CORS
pub fn router(state: AppState, custom_routes: Vec<Router<AppState>>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    let mut app = Router::new()
        .merge(routes::health::routes())
        .merge(routes::webhooks::routes())
        .nest("/api/v1", api_routes());
    for custom in custom_routes {
        app = app.merge(custom);
    }

    app.fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn not_found(uri: Uri) -> ApiResult<()> {
    Err(EntityError::not_found("route", uri.path()).into())
}

/// Start the notifier, the provisioning worker and the periodic sweeps
pub fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![
        state.notifications.spawn_notifier(&state.events),
        state.provisioning.spawn_worker(&state.events),
    ];

    let sweep = state.config.billing.expiry_sweep_interval_secs;
    if sweep > 0 {
        tasks.push(state.orders.spawn_expiry_sweeper(Duration::from_secs(sweep)));
    }
    let health = state.config.provider.health_check_interval_secs;
    if health > 0 {
        tasks.push(state.provisioning.spawn_health_checks(Duration::from_secs(health)));
    }
    tracing::info!(tasks = tasks.len(), "background tasks started");
    tasks
}

/// Resolves on SIGTERM or Ctrl+C
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
