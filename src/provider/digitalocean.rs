//! DigitalOcean API v2 client

use super::{AccountInfo, CloudError, CloudProvider, CreateDroplet, Droplet, DropletAction};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential: base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

pub struct DigitalOceanClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DigitalOceanClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("webrana-cloud/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
        })
    }

    async fn send_once(
        &self,
        method: &Method,
        token: &str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<String, CloudError> {
        let mut request = self.client.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(CloudError::from_reqwest)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(CloudError::Http {
                status: status.as_u16(),
                message: error_message(status, &text),
            })
        }
    }

    /// Send with retries on transient failures; returns the response body
    ///
    /// POST (create and actions) is only retried when the request did not
    /// reach the provider or was rate limited.
    async fn execute(
        &self,
        method: Method,
        token: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, CloudError> {
        let url = format!("{}{}", self.base_url, path);
        let idempotent = method != Method::POST;
        let mut attempt = 0;
        loop {
            match self.send_once(&method, token, &url, body.as_ref()).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient(idempotent) && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        %method,
                        path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying DigitalOcean request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        token: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, CloudError> {
        let text = self.execute(method, token, path, body).await?;
        serde_json::from_str(&text).map_err(|e| CloudError::Decode(e.to_string()))
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

#[derive(Deserialize)]
struct AccountEnvelope {
    account: AccountInfo,
}

#[derive(Deserialize)]
struct Meta {
    total: u32,
}

#[derive(Deserialize)]
struct DropletList {
    meta: Meta,
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: ApiDroplet,
}

#[derive(Deserialize)]
struct ApiDroplet {
    id: i64,
    name: String,
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Deserialize, Default)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

impl From<ApiDroplet> for Droplet {
    fn from(d: ApiDroplet) -> Self {
        let ipv4 = d
            .networks
            .v4
            .into_iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address);
        Droplet {
            id: d.id,
            name: d.name,
            status: d.status,
            ipv4,
        }
    }
}

#[async_trait]
impl CloudProvider for DigitalOceanClient {
    async fn account_info(&self, token: &str) -> Result<AccountInfo, CloudError> {
        let envelope: AccountEnvelope = self
            .execute_json(Method::GET, token, "/account", None)
            .await?;
        Ok(envelope.account)
    }

    async fn count_droplets(&self, token: &str) -> Result<u32, CloudError> {
        let list: DropletList = self
            .execute_json(Method::GET, token, "/droplets?per_page=1", None)
            .await?;
        Ok(list.meta.total)
    }

    async fn create_droplet(
        &self,
        token: &str,
        request: &CreateDroplet,
    ) -> Result<Droplet, CloudError> {
        let body = json!({
            "name": request.name,
            "region": request.region,
            "size": request.size,
            "image": request.image,
            "tags": request.tags,
            "monitoring": true,
        });
        let envelope: DropletEnvelope = self
            .execute_json(Method::POST, token, "/droplets", Some(body))
            .await?;
        tracing::info!(droplet_id = envelope.droplet.id, name = %request.name, "droplet created");
        Ok(envelope.droplet.into())
    }

    async fn get_droplet(&self, token: &str, droplet_id: i64) -> Result<Droplet, CloudError> {
        let envelope: DropletEnvelope = self
            .execute_json(
                Method::GET,
                token,
                &format!("/droplets/{}", droplet_id),
                None,
            )
            .await?;
        Ok(envelope.droplet.into())
    }

    async fn delete_droplet(&self, token: &str, droplet_id: i64) -> Result<(), CloudError> {
        match self
            .execute(
                Method::DELETE,
                token,
                &format!("/droplets/{}", droplet_id),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(CloudError::Http { status: 404, .. }) => {
                tracing::info!(droplet_id, "droplet already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn droplet_action(
        &self,
        token: &str,
        droplet_id: i64,
        action: DropletAction,
    ) -> Result<(), CloudError> {
        self.execute(
            Method::POST,
            token,
            &format!("/droplets/{}/actions", droplet_id),
            Some(json!({ "type": action.as_str() })),
        )
        .await
        .map(|_| ())
    }
}
