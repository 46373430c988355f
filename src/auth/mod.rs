//! Authentication: password hashing, access tokens, API keys and the axum
//! guards that combine them

pub mod api_key;
pub mod guard;
pub mod jwt;
pub mod password;

pub use api_key::{API_KEY_HEADER, ApiKeyAuthProvider};
pub use guard::{AdminUser, AuthUser, Authenticator, ServiceCaller};
pub use jwt::{Claims, IssuedToken, JwtAuthProvider, JwtKeys};
pub use password::{hash_password, verify_password};
