//! Repository trait for record storage

use crate::core::entity::Entity;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Storage trait for a single record type
///
/// Implementations provide CRUD operations for a specific record type.
/// Services are agnostic to the underlying storage mechanism.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Insert a new record
    async fn create(&self, entity: T) -> Result<T>;

    /// Get a record by ID
    async fn get(&self, id: &Uuid) -> Result<Option<T>>;

    /// List all records, oldest first
    async fn list(&self) -> Result<Vec<T>>;

    /// Replace an existing record; fails if it does not exist
    async fn update(&self, entity: T) -> Result<T>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, id: &Uuid) -> Result<bool>;

    /// Find records whose serialized `field` equals `value`, oldest first
    ///
    /// Comparison happens on the JSON form, so enums match their serde
    /// representation (e.g. `json!("PAID")`).
    async fn find_by(&self, field: &str, value: &Value) -> Result<Vec<T>>;

    /// First record whose `field` equals `value`
    async fn find_one_by(&self, field: &str, value: &Value) -> Result<Option<T>> {
        Ok(self.find_by(field, value).await?.into_iter().next())
    }
}
