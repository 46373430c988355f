//! Request guards
//!
//! Handlers declare the caller they need through an extractor:
//!
//! ```rust,ignore
//! async fn list_users(AdminUser(ctx): AdminUser, State(state): State<AppState>) { ... }
//! ```

use super::api_key::{API_KEY_HEADER, ApiKeyAuthProvider};
use super::jwt::JwtAuthProvider;
use crate::core::auth::{AuthContext, AuthPolicy, AuthProvider};
use crate::core::error::{ApiResult, WebranaError};
use crate::core::repository::Repository;
use crate::entities::User;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use std::sync::Arc;

/// Resolves the caller of a request and enforces policies
pub struct Authenticator {
    jwt: JwtAuthProvider,
    api_keys: ApiKeyAuthProvider,
    users: Arc<dyn Repository<User>>,
}

impl Authenticator {
    pub fn new(
        jwt: JwtAuthProvider,
        api_keys: ApiKeyAuthProvider,
        users: Arc<dyn Repository<User>>,
    ) -> Self {
        Self {
            jwt,
            api_keys,
            users,
        }
    }

    pub fn jwt(&self) -> &JwtAuthProvider {
        &self.jwt
    }

    /// Caller identity from the headers
    ///
    /// `X-API-Key` takes precedence over a bearer token. Token holders must
    /// still exist and must not be suspended.
    pub async fn context(&self, headers: &HeaderMap) -> ApiResult<AuthContext> {
        let context = if headers.contains_key(API_KEY_HEADER) {
            self.api_keys.extract_context(headers).await?
        } else {
            self.jwt.extract_context(headers).await?
        };

        if let Some(user_id) = context.user_id() {
            let user = self
                .users
                .get(&user_id)
                .await?
                .ok_or_else(|| WebranaError::unauthorized("account no longer exists"))?;
            if user.is_suspended() {
                return Err(WebranaError::forbidden("account is suspended"));
            }
        }
        Ok(context)
    }

    /// Resolve the caller and check it against `policy`
    pub async fn authorize(&self, headers: &HeaderMap, policy: &AuthPolicy) -> ApiResult<AuthContext> {
        let context = self.context(headers).await?;
        if policy.check(&context) {
            Ok(context)
        } else if context == AuthContext::Anonymous {
            Err(WebranaError::unauthorized("authentication required"))
        } else {
            Err(WebranaError::forbidden("insufficient permissions"))
        }
    }
}

/// Any signed-in customer or admin
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthContext);

/// Signed-in admin
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthContext);

/// Internal service identified by `X-API-Key`; holds the service name
#[derive(Debug, Clone)]
pub struct ServiceCaller(pub String);

impl AuthUser {
    /// Always present for this guard
    pub fn user_id(&self) -> uuid::Uuid {
        self.0.user_id().unwrap_or_default()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = WebranaError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<Authenticator>::from_ref(state);
        let context = auth.authorize(&parts.headers, &AuthPolicy::Authenticated).await?;
        Ok(AuthUser(context))
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = WebranaError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<Authenticator>::from_ref(state);
        let context = auth.authorize(&parts.headers, &AuthPolicy::AdminOnly).await?;
        Ok(AdminUser(context))
    }
}

impl<S> FromRequestParts<S> for ServiceCaller
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = WebranaError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<Authenticator>::from_ref(state);
        match auth.authorize(&parts.headers, &AuthPolicy::ServiceOnly).await? {
            AuthContext::Service { service_name } => Ok(ServiceCaller(service_name)),
            _ => Err(WebranaError::forbidden("service credentials required")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtKeys;
    use crate::config::AuthConfig;
    use crate::entities::{Role, UserStatus};
    use crate::storage::InMemoryRepository;
    use axum::http::{HeaderValue, StatusCode, header};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct Fixture {
        auth: Authenticator,
        keys: JwtKeys,
        users: Arc<InMemoryRepository<User>>,
    }

    fn fixture() -> Fixture {
        let keys = JwtKeys::from_config(&AuthConfig {
            jwt_secret: Some("guard-secret".to_string()),
            ..AuthConfig::default()
        })
        .unwrap();
        let mut api_keys = HashMap::new();
        api_keys.insert("order".to_string(), "order-key".to_string());
        let users = Arc::new(InMemoryRepository::<User>::new());
        let auth = Authenticator::new(
            JwtAuthProvider::new(keys.clone()),
            ApiKeyAuthProvider::new(&api_keys),
            users.clone(),
        );
        Fixture { auth, keys, users }
    }

    async fn insert_user(users: &InMemoryRepository<User>, role: Role, status: UserStatus) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            email: format!("{}@example.com", Uuid::new_v4()),
            password_hash: String::new(),
            full_name: "Test".to_string(),
            role,
            status,
            last_login_at: None,
        };
        users.create(user.clone()).await.unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_anonymous_gets_401() {
        let f = fixture();
        let err = f
            .auth
            .authorize(&HeaderMap::new(), &AuthPolicy::Authenticated)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_customer_on_admin_route_gets_403() {
        let f = fixture();
        let user = insert_user(&f.users, Role::Customer, UserStatus::Active).await;
        let token = f.keys.issue(&user).unwrap().access_token;

        let err = f
            .auth
            .authorize(&bearer(&token), &AuthPolicy::AdminOnly)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_suspended_user_rejected() {
        let f = fixture();
        let user = insert_user(&f.users, Role::Customer, UserStatus::Suspended).await;
        let token = f.keys.issue(&user).unwrap().access_token;

        let err = f.auth.context(&bearer(&token)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_api_key_yields_service() {
        let f = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("order-key"));

        let ctx = f
            .auth
            .authorize(&headers, &AuthPolicy::ServiceOnly)
            .await
            .unwrap();
        assert!(ctx.is_service());
    }
}
