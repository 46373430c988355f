//! DigitalOcean accounts and the instances running on them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of the most recent health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountHealth {
    /// Never checked
    Unknown,
    Healthy,
    /// Reached the consecutive-failure threshold
    Unhealthy,
}

crate::impl_data_entity!(
    /// A DigitalOcean team/account the platform provisions into
    DoAccount,
    "do_account",
    "do_accounts",
    {
        name: String,
        /// Personal access token; write-only through the API
        api_token: String,
        droplet_limit: u32,
        droplet_count: u32,
        is_active: bool,
        health: AccountHealth,
        consecutive_failures: u32,
        last_checked_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    }
);

impl DoAccount {
    pub fn has_capacity(&self) -> bool {
        self.droplet_count < self.droplet_limit
    }

    /// Eligible for new droplets
    pub fn is_selectable(&self) -> bool {
        self.is_active && self.health != AccountHealth::Unhealthy && self.has_capacity()
    }

    pub fn record_check_success(&mut self, droplet_limit: u32, droplet_count: u32) {
        let now = Utc::now();
        self.droplet_limit = droplet_limit;
        self.droplet_count = droplet_count;
        self.health = AccountHealth::Healthy;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_checked_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_check_failure(&mut self, error: impl Into<String>, unhealthy_threshold: u32) {
        let now = Utc::now();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
        self.last_checked_at = Some(now);
        if self.consecutive_failures >= unhealthy_threshold.max(1) {
            self.health = AccountHealth::Unhealthy;
        }
        self.updated_at = now;
    }
}

/// API projection of a [`DoAccount`] without the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoAccountView {
    pub id: Uuid,
    pub name: String,
    /// Last four characters of the token
    pub token_hint: String,
    pub droplet_limit: u32,
    pub droplet_count: u32,
    pub is_active: bool,
    pub health: AccountHealth,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&DoAccount> for DoAccountView {
    fn from(account: &DoAccount) -> Self {
        let chars: Vec<char> = account.api_token.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Self {
            id: account.id,
            name: account.name.clone(),
            token_hint: format!("…{}", tail),
            droplet_limit: account.droplet_limit,
            droplet_count: account.droplet_count,
            is_active: account.is_active,
            health: account.health,
            consecutive_failures: account.consecutive_failures,
            last_checked_at: account.last_checked_at,
            last_error: account.last_error.clone(),
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    New,
    Active,
    Off,
    Archived,
    Deleted,
}

impl InstanceStatus {
    /// Map a DigitalOcean droplet status string
    pub fn from_droplet_status(status: &str) -> Self {
        match status {
            "active" => InstanceStatus::Active,
            "off" => InstanceStatus::Off,
            "archive" => InstanceStatus::Archived,
            _ => InstanceStatus::New,
        }
    }
}

crate::impl_data_entity!(
    /// A droplet created for an order
    Instance,
    "instance",
    "instances",
    {
        order_id: Uuid,
        user_id: Uuid,
        do_account_id: Uuid,
        droplet_id: i64,
        name: String,
        region: String,
        size_slug: String,
        image_slug: String,
        ipv4: Option<String>,
        status: InstanceStatus,
    }
);
