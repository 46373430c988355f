//! In-memory implementation of Repository for testing and development

use crate::core::entity::Entity;
use crate::core::repository::Repository;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// In-memory repository implementation
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
#[derive(Clone)]
pub struct InMemoryRepository<T: Entity> {
    records: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Entity> InMemoryRepository<T> {
    /// Create a new, empty repository
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_first<T: Entity>(mut records: Vec<T>) -> Vec<T> {
    records.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
    records
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn create(&self, entity: T) -> Result<T> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        if records.contains_key(&entity.id()) {
            return Err(anyhow!(
                "{} {} already exists",
                T::resource_name_singular(),
                entity.id()
            ));
        }
        records.insert(entity.id(), entity.clone());

        Ok(entity)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<T>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(records.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(oldest_first(records.values().cloned().collect()))
    }

    async fn update(&self, entity: T) -> Result<T> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let slot = records.get_mut(&entity.id()).ok_or_else(|| {
            anyhow!(
                "{} {} not found",
                T::resource_name_singular(),
                entity.id()
            )
        })?;
        *slot = entity.clone();

        Ok(entity)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        Ok(records.remove(id).is_some())
    }

    async fn find_by(&self, field: &str, value: &Value) -> Result<Vec<T>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        let mut matches = Vec::new();
        for record in records.values() {
            let json = serde_json::to_value(record)?;
            if json.get(field) == Some(value) {
                matches.push(record.clone());
            }
        }

        Ok(oldest_first(matches))
    }
}
