//! Entity trait defining the core abstraction for stored records

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Base trait for all records in the system.
///
/// All records have:
/// - id: Unique identifier
/// - created_at: Creation timestamp
/// - updated_at: Last modification timestamp
///
/// Records are serde-serializable so every storage backend can persist them
/// without a hand-written mapping.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Plural resource name, also the storage table/collection name
    fn resource_name() -> &'static str;

    /// Singular resource name used in error messages
    fn resource_name_singular() -> &'static str;

    /// Get the unique identifier for this record
    fn id(&self) -> Uuid;

    /// Get the creation timestamp
    fn created_at(&self) -> DateTime<Utc>;

    /// Get the last update timestamp
    fn updated_at(&self) -> DateTime<Utc>;

    /// Bump `updated_at` to now
    fn touch(&mut self);
}
