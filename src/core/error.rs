//! Typed error handling for WeBrana Cloud
//!
//! Every service returns [`WebranaError`], which maps to an HTTP status code
//! and a stable machine-readable `code`. Clients (the portals) switch on the
//! code, never on the message.
//!
//! # Error Categories
//!
//! - [`EntityError`]: missing or duplicate records
//! - [`ValidationError`]: malformed input
//! - [`RequestError`]: authentication and authorization failures
//! - [`OrderError`]: order lifecycle violations
//! - [`BillingError`]: coupons, wallet and payment problems
//! - [`ProviderError`]: cloud provider capacity and API failures
//! - [`StorageError`]: storage backend failures
//! - [`ConfigError`]: configuration parsing and validation
//!
//! # Example
//!
//! ```rust,ignore
//! use webrana::prelude::*;
//!
//! async fn load(id: Uuid) -> ApiResult<Order> {
//!     orders.get(&id).await?.ok_or_else(|| EntityError::not_found("order", id).into())
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Result alias used by services and handlers
pub type ApiResult<T> = std::result::Result<T, WebranaError>;

/// The main error type for WeBrana Cloud
#[derive(Debug)]
pub enum WebranaError {
    /// Record lookups and uniqueness
    Entity(EntityError),

    /// Input validation
    Validation(ValidationError),

    /// Authentication / authorization
    Request(RequestError),

    /// Order lifecycle
    Order(OrderError),

    /// Coupons, wallet, invoices, payment gateway
    Billing(BillingError),

    /// Cloud provider (DigitalOcean)
    Provider(ProviderError),

    /// Storage backend errors
    Storage(StorageError),

    /// Configuration errors
    Config(ConfigError),

    /// Internal errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for WebranaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebranaError::Entity(e) => write!(f, "{}", e),
            WebranaError::Validation(e) => write!(f, "{}", e),
            WebranaError::Request(e) => write!(f, "{}", e),
            WebranaError::Order(e) => write!(f, "{}", e),
            WebranaError::Billing(e) => write!(f, "{}", e),
            WebranaError::Provider(e) => write!(f, "{}", e),
            WebranaError::Storage(e) => write!(f, "{}", e),
            WebranaError::Config(e) => write!(f, "{}", e),
            WebranaError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for WebranaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebranaError::Entity(e) => Some(e),
            WebranaError::Validation(e) => Some(e),
            WebranaError::Request(e) => Some(e),
            WebranaError::Order(e) => Some(e),
            WebranaError::Billing(e) => Some(e),
            WebranaError::Provider(e) => Some(e),
            WebranaError::Storage(e) => Some(e),
            WebranaError::Config(e) => Some(e),
            WebranaError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl WebranaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebranaError::Entity(e) => e.status_code(),
            WebranaError::Validation(e) => e.status_code(),
            WebranaError::Request(e) => e.status_code(),
            WebranaError::Order(e) => e.status_code(),
            WebranaError::Billing(e) => e.status_code(),
            WebranaError::Provider(e) => e.status_code(),
            WebranaError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebranaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebranaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            WebranaError::Entity(e) => e.error_code(),
            WebranaError::Validation(e) => e.error_code(),
            WebranaError::Request(e) => e.error_code(),
            WebranaError::Order(e) => e.error_code(),
            WebranaError::Billing(e) => e.error_code(),
            WebranaError::Provider(e) => e.error_code(),
            WebranaError::Storage(_) => "STORAGE_ERROR",
            WebranaError::Config(_) => "CONFIG_ERROR",
            WebranaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        // Internal details never leave the process
        let message = match self {
            WebranaError::Storage(_) | WebranaError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            WebranaError::Entity(EntityError::NotFound { entity_type, id }) => {
                Some(serde_json::json!({
                    "entity_type": entity_type,
                    "id": id
                }))
            }
            WebranaError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "fields": errors }))
            }
            WebranaError::Order(OrderError::InvalidTransition { from, to }) => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            WebranaError::Billing(BillingError::InsufficientBalance {
                balance,
                required,
            }) => Some(serde_json::json!({
                "balance": balance,
                "required": required
            })),
            _ => None,
        }
    }

    /// Shorthand for an unauthorized request
    pub fn unauthorized(message: impl Into<String>) -> Self {
        WebranaError::Request(RequestError::Unauthorized {
            message: message.into(),
        })
    }

    /// Shorthand for a forbidden request
    pub fn forbidden(message: impl Into<String>) -> Self {
        WebranaError::Request(RequestError::Forbidden {
            message: message.into(),
        })
    }
}

impl IntoResponse for WebranaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Entity Errors
// =============================================================================

/// Errors related to record lookups
#[derive(Debug)]
pub enum EntityError {
    /// Record was not found
    NotFound { entity_type: String, id: String },

    /// A unique field is already taken
    AlreadyExists {
        entity_type: String,
        field: String,
        value: String,
    },
}

impl EntityError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        EntityError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity_type: &str, field: &str, value: impl ToString) -> Self {
        EntityError::AlreadyExists {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EntityError::NotFound { .. } => StatusCode::NOT_FOUND,
            EntityError::AlreadyExists { .. } => StatusCode::CONFLICT,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::NotFound { .. } => "ENTITY_NOT_FOUND",
            EntityError::AlreadyExists { .. } => "ENTITY_ALREADY_EXISTS",
        }
    }
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::NotFound { entity_type, id } => {
                write!(f, "{} with id '{}' not found", entity_type, id)
            }
            EntityError::AlreadyExists {
                entity_type,
                field,
                value,
            } => {
                write!(f, "{} with {} '{}' already exists", entity_type, field, value)
            }
        }
    }
}

impl std::error::Error for EntityError {}

impl From<EntityError> for WebranaError {
    fn from(err: EntityError) -> Self {
        WebranaError::Entity(err)
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to input validation
#[derive(Debug)]
pub enum ValidationError {
    /// Single field validation error
    FieldError { field: String, message: String },

    /// Multiple field validation errors
    FieldErrors(Vec<FieldValidationError>),

    /// Invalid JSON format
    InvalidJson { message: String },

    /// Invalid UUID format
    InvalidUuid { value: String },

    /// Query string that does not parse
    InvalidQuery { message: String },
}

/// A single field validation error
#[derive(Debug, Clone, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        ValidationError::FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ValidationError::FieldError { .. } | ValidationError::FieldErrors(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ValidationError::InvalidJson { .. }
            | ValidationError::InvalidUuid { .. }
            | ValidationError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::FieldError { .. } | ValidationError::FieldErrors(_) => {
                "VALIDATION_ERROR"
            }
            ValidationError::InvalidJson { .. } => "INVALID_JSON",
            ValidationError::InvalidUuid { .. } => "INVALID_UUID",
            ValidationError::InvalidQuery { .. } => "INVALID_QUERY",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldError { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            ValidationError::FieldErrors(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                write!(f, "Validation errors: {}", msgs.join(", "))
            }
            ValidationError::InvalidJson { message } => {
                write!(f, "Invalid JSON: {}", message)
            }
            ValidationError::InvalidUuid { value } => {
                write!(f, "Invalid UUID format: {}", value)
            }
            ValidationError::InvalidQuery { message } => {
                write!(f, "Invalid query string: {}", message)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for WebranaError {
    fn from(err: ValidationError) -> Self {
        WebranaError::Validation(err)
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldValidationError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldValidationError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ValidationError::FieldErrors(fields)
    }
}

impl From<validator::ValidationErrors> for WebranaError {
    fn from(errors: validator::ValidationErrors) -> Self {
        WebranaError::Validation(errors.into())
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors related to authentication and authorization
#[derive(Debug)]
pub enum RequestError {
    /// Missing required header
    MissingHeader { header: String },

    /// Unauthorized request
    Unauthorized { message: String },

    /// Forbidden operation
    Forbidden { message: String },

    /// Proxied upstream could not be reached
    BadGateway { service: String, message: String },
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::MissingHeader { .. } => StatusCode::UNAUTHORIZED,
            RequestError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RequestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RequestError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::MissingHeader { .. } => "MISSING_HEADER",
            RequestError::Unauthorized { .. } => "UNAUTHORIZED",
            RequestError::Forbidden { .. } => "FORBIDDEN",
            RequestError::BadGateway { .. } => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::MissingHeader { header } => {
                write!(f, "Missing required header: {}", header)
            }
            RequestError::Unauthorized { message } => write!(f, "Unauthorized: {}", message),
            RequestError::Forbidden { message } => write!(f, "Forbidden: {}", message),
            RequestError::BadGateway { service, message } => {
                write!(f, "Upstream '{}' unavailable: {}", service, message)
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RequestError> for WebranaError {
    fn from(err: RequestError) -> Self {
        WebranaError::Request(err)
    }
}

// =============================================================================
// Order Errors
// =============================================================================

/// Errors related to the order lifecycle
#[derive(Debug)]
pub enum OrderError {
    /// Edge not present in the status transition table
    InvalidTransition { from: String, to: String },

    /// Plan, image or region cannot be ordered
    Unavailable { message: String },
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrderError::Unavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OrderError::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            OrderError::Unavailable { .. } => "ORDER_ITEM_UNAVAILABLE",
        }
    }
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::InvalidTransition { from, to } => {
                write!(f, "Order cannot move from {} to {}", from, to)
            }
            OrderError::Unavailable { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for OrderError {}

impl From<OrderError> for WebranaError {
    fn from(err: OrderError) -> Self {
        WebranaError::Order(err)
    }
}

// =============================================================================
// Billing Errors
// =============================================================================

/// Reason a coupon was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    NotStarted,
    Expired,
    Exhausted,
    MinAmount,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "COUPON_NOT_FOUND",
            CouponRejection::Inactive => "COUPON_INACTIVE",
            CouponRejection::NotStarted => "COUPON_NOT_STARTED",
            CouponRejection::Expired => "COUPON_EXPIRED",
            CouponRejection::Exhausted => "COUPON_EXHAUSTED",
            CouponRejection::MinAmount => "COUPON_MIN_AMOUNT",
        }
    }
}

/// Errors related to billing
#[derive(Debug)]
pub enum BillingError {
    /// Coupon cannot be applied
    Coupon { code: String, reason: CouponRejection },

    /// Wallet debit would go negative
    InsufficientBalance { balance: i64, required: i64 },

    /// Webhook signature mismatch
    InvalidSignature,

    /// The payment gateway refused or failed
    Gateway { message: String },
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Coupon { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::InvalidSignature => StatusCode::UNAUTHORIZED,
            BillingError::Gateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            BillingError::Coupon { reason, .. } => reason.code(),
            BillingError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BillingError::InvalidSignature => "INVALID_SIGNATURE",
            BillingError::Gateway { .. } => "PAYMENT_GATEWAY_ERROR",
        }
    }
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingError::Coupon { code, reason } => {
                write!(f, "Coupon '{}' cannot be applied ({})", code, reason.code())
            }
            BillingError::InsufficientBalance { balance, required } => {
                write!(
                    f,
                    "Insufficient wallet balance: {} available, {} required",
                    balance, required
                )
            }
            BillingError::InvalidSignature => write!(f, "Invalid payment notification signature"),
            BillingError::Gateway { message } => write!(f, "Payment gateway error: {}", message),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<BillingError> for WebranaError {
    fn from(err: BillingError) -> Self {
        WebranaError::Billing(err)
    }
}

// =============================================================================
// Provider Errors
// =============================================================================

/// Errors related to the cloud provider
#[derive(Debug)]
pub enum ProviderError {
    /// No active, healthy account with spare droplet capacity
    NoCapacity,

    /// Provider API call failed
    Api { status: Option<u16>, message: String },

    /// Droplet did not reach `active` in time
    ProvisionTimeout { droplet_id: i64 },
}

impl ProviderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProviderError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
            ProviderError::Api { .. } => StatusCode::BAD_GATEWAY,
            ProviderError::ProvisionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ProviderError::NoCapacity => "NO_PROVIDER_CAPACITY",
            ProviderError::Api { .. } => "PROVIDER_API_ERROR",
            ProviderError::ProvisionTimeout { .. } => "PROVISION_TIMEOUT",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NoCapacity => {
                write!(f, "No provider account has capacity for a new instance")
            }
            ProviderError::Api {
                status: Some(status),
                message,
            } => write!(f, "Provider API error ({}): {}", status, message),
            ProviderError::Api {
                status: None,
                message,
            } => write!(f, "Provider API error: {}", message),
            ProviderError::ProvisionTimeout { droplet_id } => {
                write!(f, "Droplet {} did not become active in time", droplet_id)
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for WebranaError {
    fn from(err: ProviderError) -> Self {
        WebranaError::Provider(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors related to storage backends
#[derive(Debug)]
pub enum StorageError {
    /// Query or lock failure
    QueryError { backend: String, message: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::QueryError { backend, message } => {
                write!(f, "{} query error: {}", backend, message)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for WebranaError {
    fn from(err: StorageError) -> Self {
        WebranaError::Storage(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse configuration
    ParseError { file: Option<String>, message: String },

    /// Invalid value for a field
    InvalidValue { field: String, message: String },

    /// IO error while reading configuration
    IoError { message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError { file, message } => {
                if let Some(file) = file {
                    write!(f, "Failed to parse config file '{}': {}", file, message)
                } else {
                    write!(f, "Failed to parse config: {}", message)
                }
            }
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid value for '{}': {}", field, message)
            }
            ConfigError::IoError { message } => write!(f, "IO error: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for WebranaError {
    fn from(err: ConfigError) -> Self {
        WebranaError::Config(err)
    }
}

// =============================================================================
// Conversions from external errors
// =============================================================================

/// Repository calls return `anyhow::Result`; surface them as storage errors.
impl From<anyhow::Error> for WebranaError {
    fn from(err: anyhow::Error) -> Self {
        WebranaError::Storage(StorageError::QueryError {
            backend: "repository".to_string(),
            message: format!("{:#}", err),
        })
    }
}

impl From<serde_json::Error> for WebranaError {
    fn from(err: serde_json::Error) -> Self {
        WebranaError::Validation(ValidationError::InvalidJson {
            message: err.to_string(),
        })
    }
}
