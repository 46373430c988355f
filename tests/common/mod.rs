//! Shared harness: a full router with DigitalOcean and the payment gateway
//! replaced by wiremock servers

#![allow(dead_code)]

use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use webrana::config::{AppConfig, AuthConfig, BootstrapAdmin, PaymentConfig, ProviderConfig};
use webrana::payment::MidtransGateway;
use webrana::payment::midtrans::notification_signature;
use webrana::provider::DigitalOceanClient;
use webrana::server::{AppState, ServerBuilder};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SERVER_KEY: &str = "SB-Mid-server-test";
pub const ADMIN_EMAIL: &str = "admin@webrana.test";
pub const ADMIN_PASSWORD: &str = "admin-password-1";
pub const SERVICE_KEY: &str = "instance-service-key";

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub cloud: MockServer,
    pub payments: MockServer,
}

pub fn config(cloud: &MockServer, payments: &MockServer) -> AppConfig {
    let mut config = AppConfig {
        auth: AuthConfig {
            jwt_secret: Some("integration-test-secret".to_string()),
            bootstrap_admin: Some(BootstrapAdmin {
                email: ADMIN_EMAIL.to_string(),
                password: ADMIN_PASSWORD.to_string(),
                full_name: "Test Admin".to_string(),
            }),
            ..AuthConfig::default()
        },
        payment: PaymentConfig {
            enabled: true,
            base_url: payments.uri(),
            server_key: Some(SERVER_KEY.to_string()),
            ..PaymentConfig::default()
        },
        provider: ProviderConfig {
            base_url: cloud.uri(),
            max_retries: 1,
            retry_base_delay_ms: 1,
            poll_interval_ms: 10,
            poll_attempts: 5,
            health_check_interval_secs: 0,
            ..ProviderConfig::default()
        },
        ..AppConfig::default()
    };
    config
        .auth
        .internal_api_keys
        .insert("instance-service".to_string(), SERVICE_KEY.to_string());
    config
}

impl TestApp {
    pub async fn spawn() -> Self {
        let cloud = MockServer::start().await;
        let payments = MockServer::start().await;
        let config = config(&cloud, &payments);

        let provider = DigitalOceanClient::new(&config.provider).unwrap();
        let gateway = MidtransGateway::new(&config.payment).unwrap();
        let (router, state) = ServerBuilder::new(config)
            .with_provider(Arc::new(provider))
            .with_payment_gateway(Arc::new(gateway))
            .build_with_state()
            .unwrap();
        state.bootstrap().await.unwrap();

        Mock::given(method("POST"))
            .and(path("/snap/v1/transactions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": "snap-token",
                "redirect_url": "https://app.sandbox.midtrans.com/snap/v4/redirection/snap-token"
            })))
            .mount(&payments)
            .await;

        Self {
            server: TestServer::try_new(router).unwrap(),
            state,
            cloud,
            payments,
        }
    }

    pub async fn register(&self, email: &str) -> String {
        let response = self
            .server
            .post("/api/v1/auth/register")
            .json(&json!({
                "email": email,
                "password": "customer-password",
                "full_name": "Budi Santoso"
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json::<Value>()["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn admin_token(&self) -> String {
        let response = self
            .server
            .post("/api/v1/auth/login")
            .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Plan `basic-1` (Rp 150.000/month in sgp1) and image `ubuntu-24-04`
    pub async fn seed_catalog(&self, admin: &str) -> Value {
        let plan = self
            .server
            .post("/api/v1/admin/plans")
            .authorization_bearer(admin)
            .json(&json!({
                "slug": "basic-1",
                "name": "Basic 1",
                "provider_size_slug": "s-1vcpu-1gb",
                "vcpu": 1,
                "memory_mb": 1024,
                "disk_gb": 25,
                "transfer_tb": 1.0,
                "price_monthly": 150000,
                "regions": ["sgp1"]
            }))
            .await;
        plan.assert_status(axum::http::StatusCode::CREATED);

        self.server
            .post("/api/v1/admin/images")
            .authorization_bearer(admin)
            .json(&json!({
                "slug": "ubuntu-24-04",
                "name": "Ubuntu 24.04 LTS",
                "distribution": "Ubuntu"
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        plan.json()
    }

    pub async fn seed_account(&self, admin: &str) -> Value {
        let response = self
            .server
            .post("/api/v1/admin/do-accounts")
            .authorization_bearer(admin)
            .json(&json!({ "name": "primary", "api_token": "do-token", "droplet_limit": 5 }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    pub async fn create_order(&self, token: &str, body: Value) -> axum_test::TestResponse {
        self.server
            .post("/api/v1/orders")
            .authorization_bearer(token)
            .json(&body)
            .await
    }
}

pub fn order_body(payment_method: &str) -> Value {
    json!({
        "plan": "basic-1",
        "image_slug": "ubuntu-24-04",
        "region": "sgp1",
        "hostname": "web-1",
        "duration_months": 1,
        "payment_method": payment_method
    })
}

/// Gateway notification signed with [`SERVER_KEY`]
pub fn notification(invoice_number: &str, gross_amount: &str, transaction_status: &str) -> Value {
    let status_code = "200";
    json!({
        "order_id": invoice_number,
        "status_code": status_code,
        "gross_amount": gross_amount,
        "signature_key": notification_signature(invoice_number, status_code, gross_amount, SERVER_KEY),
        "transaction_status": transaction_status,
        "transaction_id": "tx-123",
        "payment_type": "bank_transfer"
    })
}

pub fn droplet_json(status: &str) -> Value {
    json!({
        "droplet": {
            "id": 4242,
            "name": "web-1",
            "status": status,
            "networks": {
                "v4": [{ "ip_address": "203.0.113.10", "type": "public" }]
            }
        }
    })
}
