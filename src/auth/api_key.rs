//! Service-to-service authentication with `X-API-Key`

use crate::core::auth::{AuthContext, AuthProvider};
use crate::core::error::{ApiResult, WebranaError};
use async_trait::async_trait;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Compare two byte strings without short-circuiting
///
/// Length differences still leak; callers compare fixed-size digests.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Checks `X-API-Key` against the configured internal keys
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuthProvider {
    /// (service name, sha256 of its key)
    keys: Vec<(String, [u8; 32])>,
}

impl ApiKeyAuthProvider {
    pub fn new(keys: &HashMap<String, String>) -> Self {
        let mut keys: Vec<_> = keys
            .iter()
            .filter(|(_, key)| !key.is_empty())
            .map(|(service, key)| (service.clone(), digest(key)))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Self { keys }
    }

    /// Service name owning `candidate`, if any
    ///
    /// Every configured key is compared so timing does not depend on which
    /// one matched.
    pub fn identify(&self, candidate: &str) -> Option<&str> {
        let candidate = digest(candidate);
        let mut found = None;
        for (service, key) in &self.keys {
            if constant_time_eq(key, &candidate) && found.is_none() {
                found = Some(service.as_str());
            }
        }
        found
    }

    pub fn is_configured(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuthProvider {
    async fn extract_context(&self, headers: &HeaderMap) -> ApiResult<AuthContext> {
        let Some(value) = headers.get(API_KEY_HEADER) else {
            return Ok(AuthContext::Anonymous);
        };
        let candidate = value
            .to_str()
            .map_err(|_| WebranaError::unauthorized("malformed X-API-Key header"))?;

        match self.identify(candidate) {
            Some(service) => Ok(AuthContext::Service {
                service_name: service.to_string(),
            }),
            None => {
                tracing::warn!("rejected request with unknown API key");
                Err(WebranaError::unauthorized("invalid API key"))
            }
        }
    }
}
