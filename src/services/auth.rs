//! Accounts: registration, login, profile and admin user management

use crate::auth::{IssuedToken, JwtKeys, hash_password, verify_password};
use crate::core::error::{ApiResult, EntityError, ValidationError, WebranaError};
use crate::core::query::{PageParams, PaginatedResponse};
use crate::core::repository::Repository;
use crate::entities::{Role, User, UserStatus, UserView};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "must be 8-128 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128, message = "must be 8-128 characters"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserView,
    #[serde(flatten)]
    pub token: IssuedToken,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct AuthService {
    users: Arc<dyn Repository<User>>,
    keys: JwtKeys,
    // Serializes the email uniqueness check with the insert
    register_lock: Mutex<()>,
}

impl AuthService {
    pub fn new(users: Arc<dyn Repository<User>>, keys: JwtKeys) -> Self {
        Self {
            users,
            keys,
            register_lock: Mutex::new(()),
        }
    }

    async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        Ok(self.users.find_one_by("email", &json!(email)).await?)
    }

    async fn load(&self, user_id: Uuid) -> ApiResult<User> {
        self.users
            .get(&user_id)
            .await?
            .ok_or_else(|| EntityError::not_found("user", user_id).into())
    }

    async fn insert(&self, email: &str, password: &str, full_name: &str, role: Role) -> ApiResult<User> {
        let email = normalize_email(email);
        let password_hash = hash_password(password).map_err(WebranaError::Internal)?;

        let _guard = self.register_lock.lock().await;
        if self.find_by_email(&email).await?.is_some() {
            return Err(EntityError::already_exists("user", "email", &email).into());
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            email,
            password_hash,
            full_name: full_name.trim().to_string(),
            role,
            status: UserStatus::Active,
            last_login_at: None,
        };
        Ok(self.users.create(user).await?)
    }

    pub async fn register(&self, request: RegisterRequest) -> ApiResult<AuthResponse> {
        let user = self
            .insert(&request.email, &request.password, &request.full_name, Role::Customer)
            .await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok(AuthResponse {
            token: self.keys.issue(&user)?,
            user: UserView::from(&user),
        })
    }

    /// Create the admin account if no user holds `email` yet
    pub async fn ensure_admin(&self, email: &str, password: &str, full_name: &str) -> ApiResult<User> {
        if let Some(existing) = self.find_by_email(&normalize_email(email)).await? {
            return Ok(existing);
        }
        let admin = self.insert(email, password, full_name, Role::Admin).await?;
        tracing::info!(user_id = %admin.id, "bootstrap admin created");
        Ok(admin)
    }

    pub async fn login(&self, request: LoginRequest) -> ApiResult<AuthResponse> {
        const BAD_CREDENTIALS: &str = "invalid email or password";

        let Some(mut user) = self.find_by_email(&normalize_email(&request.email)).await? else {
            return Err(WebranaError::unauthorized(BAD_CREDENTIALS));
        };
        if !verify_password(&user.password_hash, &request.password).map_err(WebranaError::Internal)? {
            return Err(WebranaError::unauthorized(BAD_CREDENTIALS));
        }
        if user.is_suspended() {
            return Err(WebranaError::forbidden("account is suspended"));
        }

        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        let user = self.users.update(user).await?;

        Ok(AuthResponse {
            token: self.keys.issue(&user)?,
            user: UserView::from(&user),
        })
    }

    pub async fn me(&self, user_id: Uuid) -> ApiResult<UserView> {
        Ok(UserView::from(&self.load(user_id).await?))
    }

    pub async fn change_password(&self, user_id: Uuid, request: ChangePasswordRequest) -> ApiResult<()> {
        let mut user = self.load(user_id).await?;
        if !verify_password(&user.password_hash, &request.current_password)
            .map_err(WebranaError::Internal)?
        {
            return Err(ValidationError::field("current_password", "is incorrect").into());
        }
        user.password_hash = hash_password(&request.new_password).map_err(WebranaError::Internal)?;
        user.updated_at = Utc::now();
        self.users.update(user).await?;
        tracing::info!(%user_id, "password changed");
        Ok(())
    }

    pub async fn list_users(&self, params: &PageParams) -> ApiResult<PaginatedResponse<UserView>> {
        let mut users = self.users.list().await?;
        users.reverse();
        Ok(PaginatedResponse::from_items(users, params).map(|u| UserView::from(&u)))
    }

    pub async fn set_status(&self, user_id: Uuid, status: UserStatus) -> ApiResult<UserView> {
        let mut user = self.load(user_id).await?;
        if user.status != status {
            user.status = status;
            user.updated_at = Utc::now();
            user = self.users.update(user).await?;
            tracing::info!(%user_id, ?status, "user status changed");
        }
        Ok(UserView::from(&user))
    }

    pub async fn get_user(&self, user_id: Uuid) -> ApiResult<User> {
        self.load(user_id).await
    }
}
