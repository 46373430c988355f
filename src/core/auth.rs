//! Authorization model
//!
//! Provides context-based authorization with these caller types:
//! - Customers (JWT bearer token)
//! - Administrators (JWT bearer token with the admin role)
//! - Internal services (`X-API-Key`)

use crate::core::error::ApiResult;
use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

/// Authorization context extracted from a request
#[derive(Debug, Clone, PartialEq)]
pub enum AuthContext {
    /// Authenticated customer
    User { user_id: Uuid, email: String },

    /// Platform administrator
    Admin { user_id: Uuid, email: String },

    /// Service-to-service communication
    Service { service_name: String },

    /// No authentication (public access)
    Anonymous,
}

impl AuthContext {
    /// Check if context represents an admin
    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin { .. })
    }

    /// Check if context represents a service
    pub fn is_service(&self) -> bool {
        matches!(self, AuthContext::Service { .. })
    }

    /// Get user_id if available
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AuthContext::User { user_id, .. } | AuthContext::Admin { user_id, .. } => {
                Some(*user_id)
            }
            _ => None,
        }
    }

    /// Whether the caller may see a resource owned by `owner_id`
    ///
    /// Admins and services see everything, users see their own resources.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        match self {
            AuthContext::Admin { .. } | AuthContext::Service { .. } => true,
            AuthContext::User { user_id, .. } => *user_id == owner_id,
            AuthContext::Anonymous => false,
        }
    }

    /// Actor label stored in audit trails such as order status history
    pub fn actor(&self) -> String {
        match self {
            AuthContext::User { user_id, .. } => format!("user:{}", user_id),
            AuthContext::Admin { user_id, .. } => format!("admin:{}", user_id),
            AuthContext::Service { service_name } => format!("service:{}", service_name),
            AuthContext::Anonymous => "anonymous".to_string(),
        }
    }
}

/// Authorization policy for an operation
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Public access (no auth required)
    Public,

    /// Any authenticated user or admin
    Authenticated,

    /// Service-to-service only
    ServiceOnly,

    /// Admin only
    AdminOnly,

    /// Combination of policies (AND)
    And(Vec<AuthPolicy>),

    /// Combination of policies (OR)
    Or(Vec<AuthPolicy>),
}

impl AuthPolicy {
    /// Check if auth context satisfies this policy
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,

            AuthPolicy::Authenticated => context.user_id().is_some(),

            AuthPolicy::ServiceOnly => context.is_service(),

            AuthPolicy::AdminOnly => context.is_admin(),

            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),

            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),
        }
    }
}

/// Trait for auth providers
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Extract auth context from request headers
    ///
    /// Returns `Anonymous` when the provider's credentials are absent and an
    /// error when they are present but invalid.
    async fn extract_context(&self, headers: &HeaderMap) -> ApiResult<AuthContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthContext {
        AuthContext::User {
            user_id: Uuid::new_v4(),
            email: "dewi@example.com".to_string(),
        }
    }

    fn admin() -> AuthContext {
        AuthContext::Admin {
            user_id: Uuid::new_v4(),
            email: "ops@example.com".to_string(),
        }
    }

    fn service() -> AuthContext {
        AuthContext::Service {
            service_name: "billing".to_string(),
        }
    }

    #[test]
    fn test_policy_check() {
        assert!(AuthPolicy::Authenticated.check(&user()));
        assert!(AuthPolicy::Authenticated.check(&admin()));
        assert!(!AuthPolicy::Authenticated.check(&service()));
        assert!(!AuthPolicy::Authenticated.check(&AuthContext::Anonymous));
        assert!(AuthPolicy::Public.check(&AuthContext::Anonymous));
    }

    #[test]
    fn test_policy_check_admin_only() {
        assert!(AuthPolicy::AdminOnly.check(&admin()));
        assert!(!AuthPolicy::AdminOnly.check(&user()));
    }

    #[test]
    fn test_policy_check_service_only() {
        assert!(AuthPolicy::ServiceOnly.check(&service()));
        assert!(!AuthPolicy::ServiceOnly.check(&admin()));
    }

    #[test]
    fn test_policy_check_or_and() {
        let either = AuthPolicy::Or(vec![AuthPolicy::ServiceOnly, AuthPolicy::AdminOnly]);
        assert!(either.check(&service()));
        assert!(either.check(&admin()));
        assert!(!either.check(&user()));

        let both = AuthPolicy::And(vec![AuthPolicy::Authenticated, AuthPolicy::AdminOnly]);
        assert!(both.check(&admin()));
        assert!(!both.check(&user()));
    }

    #[test]
    fn test_can_access() {
        let owner = Uuid::new_v4();
        let me = AuthContext::User {
            user_id: owner,
            email: "me@example.com".to_string(),
        };
        assert!(me.can_access(owner));
        assert!(!user().can_access(owner));
        assert!(admin().can_access(owner));
        assert!(service().can_access(owner));
        assert!(!AuthContext::Anonymous.can_access(owner));
    }

    #[test]
    fn test_actor_labels() {
        let id = Uuid::nil();
        let ctx = AuthContext::Admin {
            user_id: id,
            email: "ops@example.com".to_string(),
        };
        assert_eq!(ctx.actor(), format!("admin:{}", id));
        assert_eq!(service().actor(), "service:billing");
    }
}
