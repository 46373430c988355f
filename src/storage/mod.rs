//! Storage implementations for different backends

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRepository;

use crate::core::repository::Repository;
use crate::entities::{
    Coupon, DoAccount, Instance, Invoice, Notification, Order, User, VpsImage, VpsPlan,
    WalletTransaction,
};
use std::sync::Arc;

/// One repository per record type, shared by all services
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn Repository<User>>,
    pub plans: Arc<dyn Repository<VpsPlan>>,
    pub images: Arc<dyn Repository<VpsImage>>,
    pub coupons: Arc<dyn Repository<Coupon>>,
    pub orders: Arc<dyn Repository<Order>>,
    pub invoices: Arc<dyn Repository<Invoice>>,
    pub wallet: Arc<dyn Repository<WalletTransaction>>,
    pub do_accounts: Arc<dyn Repository<DoAccount>>,
    pub instances: Arc<dyn Repository<Instance>>,
    pub notifications: Arc<dyn Repository<Notification>>,
}

impl Stores {
    /// All repositories in memory
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryRepository::new()),
            plans: Arc::new(InMemoryRepository::new()),
            images: Arc::new(InMemoryRepository::new()),
            coupons: Arc::new(InMemoryRepository::new()),
            orders: Arc::new(InMemoryRepository::new()),
            invoices: Arc::new(InMemoryRepository::new()),
            wallet: Arc::new(InMemoryRepository::new()),
            do_accounts: Arc::new(InMemoryRepository::new()),
            instances: Arc::new(InMemoryRepository::new()),
            notifications: Arc::new(InMemoryRepository::new()),
        }
    }

    /// All repositories on one PostgreSQL pool
    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            users: Arc::new(PostgresRepository::new(pool.clone())),
            plans: Arc::new(PostgresRepository::new(pool.clone())),
            images: Arc::new(PostgresRepository::new(pool.clone())),
            coupons: Arc::new(PostgresRepository::new(pool.clone())),
            orders: Arc::new(PostgresRepository::new(pool.clone())),
            invoices: Arc::new(PostgresRepository::new(pool.clone())),
            wallet: Arc::new(PostgresRepository::new(pool.clone())),
            do_accounts: Arc::new(PostgresRepository::new(pool.clone())),
            instances: Arc::new(PostgresRepository::new(pool.clone())),
            notifications: Arc::new(PostgresRepository::new(pool)),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory()
    }
}
