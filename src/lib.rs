//! # WeBrana Cloud
//!
//! Backend for a VPS hosting storefront: customers register, pick a plan
//! and an image, pay an invoice (payment gateway or wallet) and receive a
//! DigitalOcean droplet.
//!
//! ## Layout
//!
//! - [`core`]: errors, the record trait, repositories, events, auth context
//! - [`entities`]: users, catalog, coupons, orders, invoices, droplets
//! - [`storage`]: in-memory and PostgreSQL repositories
//! - [`auth`], [`provider`], [`payment`]: token issuing, DigitalOcean and
//!   Midtrans clients
//! - [`services`]: the business operations
//! - [`server`]: axum routes, state and the [`ServerBuilder`](server::ServerBuilder)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use webrana::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     ServerBuilder::new(config)
//!         .with_stores(Stores::in_memory())
//!         .serve()
//!         .await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod core;
pub mod entities;
pub mod payment;
pub mod provider;
pub mod server;
pub mod services;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::core::{
        ApiResult, AuthContext, DomainEvent, Entity, EventBus, PageParams, PaginatedResponse,
        PathId, Repository, ValidatedJson, WebranaError,
    };
    pub use crate::entities::{
        Coupon, DiscountType, DoAccount, Instance, InstanceStatus, Invoice, InvoiceStatus,
        Notification, NotificationKind, Order, OrderStatus, PaymentMethod, Role, User, VpsImage,
        VpsPlan, WalletTransaction, WalletTxKind,
    };
    pub use crate::provider::CloudProvider;
    pub use crate::payment::PaymentGateway;
    pub use crate::server::{AppState, ServerBuilder};
    pub use crate::storage::{InMemoryRepository, Stores};

    pub use crate::impl_data_entity;

    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
