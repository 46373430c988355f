//! Cloud provider integration
//!
//! [`CloudProvider`] is the seam between provisioning and the DigitalOcean
//! API. Every call takes the API token of the account it acts on, so one
//! client serves all configured accounts.

pub mod digitalocean;
pub mod selector;

pub use digitalocean::DigitalOceanClient;
pub use selector::AccountSelector;

use crate::core::error::{ProviderError, WebranaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Provider-side account details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub droplet_limit: u32,
    pub status: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDroplet {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub tags: Vec<String>,
}

/// Provider view of a droplet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Droplet {
    pub id: i64,
    pub name: String,
    /// `new`, `active`, `off` or `archive`
    pub status: String,
    pub ipv4: Option<String>,
}

impl Droplet {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropletAction {
    PowerOn,
    PowerOff,
    Reboot,
}

impl DropletAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropletAction::PowerOn => "power_on",
            DropletAction::PowerOff => "power_off",
            DropletAction::Reboot => "reboot",
        }
    }
}

/// Errors from a provider API call
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never reached the provider
    #[error("could not connect to provider: {0}")]
    Connect(String),

    /// Timeouts and failures after the request was sent
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl CloudError {
    /// Worth retrying: connect errors and 429 always, 5xx only for
    /// idempotent requests
    ///
    /// A timeout or a 5xx on a create may mean the provider already acted,
    /// so those are never retried for non-idempotent calls.
    pub fn is_transient(&self, idempotent: bool) -> bool {
        match self {
            CloudError::Connect(_) => true,
            CloudError::Http { status, .. } => *status == 429 || (idempotent && *status >= 500),
            CloudError::Transport(_) | CloudError::Decode(_) => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            CloudError::Connect(err.to_string())
        } else {
            CloudError::Transport(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<CloudError> for WebranaError {
    fn from(err: CloudError) -> Self {
        WebranaError::Provider(ProviderError::Api {
            status: err.status(),
            message: err.to_string(),
        })
    }
}

/// Operations provisioning needs from a cloud provider
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn account_info(&self, token: &str) -> Result<AccountInfo, CloudError>;

    /// Number of droplets currently on the account
    async fn count_droplets(&self, token: &str) -> Result<u32, CloudError>;

    async fn create_droplet(&self, token: &str, request: &CreateDroplet)
    -> Result<Droplet, CloudError>;

    async fn get_droplet(&self, token: &str, droplet_id: i64) -> Result<Droplet, CloudError>;

    /// Succeeds when the droplet is already gone
    async fn delete_droplet(&self, token: &str, droplet_id: i64) -> Result<(), CloudError>;

    async fn droplet_action(
        &self,
        token: &str,
        droplet_id: i64,
        action: DropletAction,
    ) -> Result<(), CloudError>;
}
