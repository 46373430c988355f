//! PostgreSQL storage backend using sqlx.
//!
//! Each record type lives in its own table named after
//! [`Entity::resource_name`], with a JSONB `data` column holding the
//! serialized record. The schema is created by the migrations in
//! `migrations/`.
//!
//! # Feature flag
//!
//! This module is gated behind the `postgres` feature flag.

use crate::core::entity::Entity;
use crate::core::repository::Repository;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use uuid::Uuid;

/// Connect to PostgreSQL and run pending migrations
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    tracing::info!("PostgreSQL connected, migrations applied");
    Ok(pool)
}

/// Generic repository backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct PostgresRepository<T> {
    pool: PgPool,
    _marker: std::marker::PhantomData<T>,
}

impl<T> PostgresRepository<T> {
    /// Create a new `PostgresRepository` with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _marker: std::marker::PhantomData,
        }
    }
}

fn decode<T: Entity>(rows: Vec<(Json<Value>,)>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|(Json(data),)| serde_json::from_value(data).map_err(Into::into))
        .collect()
}

#[async_trait]
impl<T: Entity> Repository<T> for PostgresRepository<T> {
    async fn create(&self, entity: T) -> Result<T> {
        let sql = format!(
            "INSERT INTO {} (id, data, created_at, updated_at) VALUES ($1, $2, $3, $4)",
            T::resource_name()
        );
        sqlx::query(&sql)
            .bind(entity.id())
            .bind(Json(serde_json::to_value(&entity)?))
            .bind(entity.created_at())
            .bind(entity.updated_at())
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert into {}", T::resource_name()))?;

        Ok(entity)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<T>> {
        let sql = format!("SELECT data FROM {} WHERE id = $1", T::resource_name());
        let row: Option<(Json<Value>,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(Json(data),)| serde_json::from_value(data).map_err(Into::into))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT data FROM {} ORDER BY created_at ASC, id ASC",
            T::resource_name()
        );
        let rows: Vec<(Json<Value>,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        decode(rows)
    }

    async fn update(&self, entity: T) -> Result<T> {
        let sql = format!(
            "UPDATE {} SET data = $2, updated_at = $3 WHERE id = $1",
            T::resource_name()
        );
        let result = sqlx::query(&sql)
            .bind(entity.id())
            .bind(Json(serde_json::to_value(&entity)?))
            .bind(entity.updated_at())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "{} {} not found",
                T::resource_name_singular(),
                entity.id()
            ));
        }
        Ok(entity)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", T::resource_name());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by(&self, field: &str, value: &Value) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT data FROM {} WHERE data -> $1 = $2 ORDER BY created_at ASC, id ASC",
            T::resource_name()
        );
        let rows: Vec<(Json<Value>,)> = sqlx::query_as(&sql)
            .bind(field)
            .bind(Json(value.clone()))
            .fetch_all(&self.pool)
            .await?;
        decode(rows)
    }
}
