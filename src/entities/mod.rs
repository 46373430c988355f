//! Domain records
//!
//! Each record is declared with [`impl_data_entity!`](crate::impl_data_entity)
//! and can therefore live in any [`Repository`](crate::core::repository::Repository).

#[macro_use]
pub mod macros;

pub mod billing;
pub mod catalog;
pub mod coupon;
pub mod notification;
pub mod order;
pub mod provider;
pub mod user;

pub use billing::{Invoice, InvoiceStatus, WalletTransaction, WalletTxKind, document_number};
pub use catalog::{VpsImage, VpsPlan};
pub use coupon::{Coupon, DiscountType};
pub use notification::{Notification, NotificationKind};
pub use order::{Order, OrderStatus, PaymentMethod, StatusHistoryEntry};
pub use provider::{AccountHealth, DoAccount, DoAccountView, Instance, InstanceStatus};
pub use user::{Role, User, UserStatus, UserView};
