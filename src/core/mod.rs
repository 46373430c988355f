//! Core module containing fundamental traits and types shared by every service

pub mod auth;
pub mod entity;
pub mod error;
pub mod events;
pub mod extractors;
pub mod query;
pub mod repository;
pub mod validation;

pub use auth::{AuthContext, AuthPolicy, AuthProvider};
pub use entity::Entity;
pub use error::{ApiResult, WebranaError};
pub use events::{DomainEvent, EventBus, EventEnvelope};
pub use extractors::{PathId, QueryParams};
pub use query::{PageParams, PaginatedResponse, PaginationMeta};
pub use repository::Repository;
pub use validation::ValidatedJson;
