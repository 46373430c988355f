//! Access tokens, RS256/HS256 dual mode
//!
//! The verifier is chosen from the token header's `alg`, so one deployment
//! can accept RS256 tokens, HS256 tokens, or both. Tokens are signed with
//! RS256 when a private key is configured and with HS256 otherwise.

use crate::config::AuthConfig;
use crate::core::auth::{AuthContext, AuthProvider};
use crate::core::error::{ApiResult, ConfigError, RequestError, WebranaError};
use crate::entities::{Role, User};
use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn context(&self) -> AuthContext {
        match self.role {
            Role::Admin => AuthContext::Admin {
                user_id: self.sub,
                email: self.email.clone(),
            },
            Role::Customer => AuthContext::User {
                user_id: self.sub,
                email: self.email.clone(),
            },
        }
    }
}

/// Token as returned by login and register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Signing and verification keys
#[derive(Clone)]
pub struct JwtKeys {
    issuer: String,
    ttl_secs: u64,
    hs_encoding: Option<EncodingKey>,
    hs_decoding: Option<DecodingKey>,
    rs_encoding: Option<EncodingKey>,
    rs_decoding: Option<DecodingKey>,
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys")
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl_secs)
            .field("hs256", &self.hs_decoding.is_some())
            .field("rs256_sign", &self.rs_encoding.is_some())
            .field("rs256_verify", &self.rs_decoding.is_some())
            .finish()
    }
}

impl JwtKeys {
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let (hs_encoding, hs_decoding) = match config.secret() {
            Some(secret) => (
                Some(EncodingKey::from_secret(secret.as_bytes())),
                Some(DecodingKey::from_secret(secret.as_bytes())),
            ),
            None => (None, None),
        };

        let rs_encoding = config
            .private_key_pem()?
            .map(|pem| EncodingKey::from_rsa_pem(pem.as_bytes()))
            .transpose()
            .map_err(|e| key_error("auth.jwt_private_key", e))?;
        let rs_decoding = config
            .public_key_pem()?
            .map(|pem| DecodingKey::from_rsa_pem(pem.as_bytes()))
            .transpose()
            .map_err(|e| key_error("auth.jwt_public_key", e))?;

        Ok(Self {
            issuer: config.issuer.clone(),
            ttl_secs: config.token_ttl_secs,
            hs_encoding,
            hs_decoding,
            rs_encoding,
            rs_decoding,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Algorithm new tokens are signed with
    pub fn signing_algorithm(&self) -> Option<Algorithm> {
        if self.rs_encoding.is_some() {
            Some(Algorithm::RS256)
        } else if self.hs_encoding.is_some() {
            Some(Algorithm::HS256)
        } else {
            None
        }
    }

    /// Issue an access token for `user`
    pub fn issue(&self, user: &User) -> ApiResult<IssuedToken> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl_secs as i64,
            iss: self.issuer.clone(),
        };
        let access_token = self.sign(&claims)?;
        Ok(IssuedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.ttl_secs,
        })
    }

    /// Sign arbitrary claims with the configured signing key
    pub fn sign(&self, claims: &Claims) -> ApiResult<String> {
        let (algorithm, key) = match (&self.rs_encoding, &self.hs_encoding) {
            (Some(key), _) => (Algorithm::RS256, key),
            (None, Some(key)) => (Algorithm::HS256, key),
            (None, None) => {
                return Err(WebranaError::Internal(
                    "no JWT signing key configured".to_string(),
                ));
            }
        };
        jsonwebtoken::encode(&Header::new(algorithm), claims, key)
            .map_err(|e| WebranaError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify signature, expiry and issuer
    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| WebranaError::unauthorized("malformed token"))?;

        let key = match header.alg {
            Algorithm::RS256 => self.rs_decoding.as_ref(),
            Algorithm::HS256 => self.hs_decoding.as_ref(),
            _ => None,
        }
        .ok_or_else(|| {
            WebranaError::unauthorized(format!("token algorithm {:?} not accepted", header.alg))
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => WebranaError::unauthorized("token expired"),
                ErrorKind::InvalidIssuer => WebranaError::unauthorized("token issuer mismatch"),
                _ => WebranaError::unauthorized("invalid token"),
            })
    }
}

fn key_error(field: &str, err: jsonwebtoken::errors::Error) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: err.to_string(),
    }
}

/// Extract the token from `Authorization: Bearer <token>`
///
/// `Ok(None)` when the header is absent.
pub fn bearer_token(headers: &HeaderMap) -> ApiResult<Option<&str>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| WebranaError::unauthorized("malformed Authorization header"))?;
    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(Some(token)),
        _ => Err(RequestError::Unauthorized {
            message: "expected 'Bearer <token>'".to_string(),
        }
        .into()),
    }
}

/// Bearer-token auth provider
#[derive(Debug, Clone)]
pub struct JwtAuthProvider {
    keys: JwtKeys,
}

impl JwtAuthProvider {
    pub fn new(keys: JwtKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn extract_context(&self, headers: &HeaderMap) -> ApiResult<AuthContext> {
        match bearer_token(headers)? {
            Some(token) => Ok(self.keys.verify(token)?.context()),
            None => Ok(AuthContext::Anonymous),
        }
    }
}
