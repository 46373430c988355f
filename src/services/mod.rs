//! Domain services
//!
//! Each service owns the repositories of its records and exposes the
//! operations the HTTP layer calls. Services take an [`AuthContext`] or a
//! user id and never see request types.
//!
//! [`AuthContext`]: crate::core::auth::AuthContext

pub mod auth;
pub mod billing;
pub mod catalog;
pub mod notifications;
pub mod orders;
pub mod provisioning;

pub use auth::AuthService;
pub use billing::BillingService;
pub use catalog::CatalogService;
pub use notifications::NotificationService;
pub use orders::OrderService;
pub use provisioning::ProvisioningService;
