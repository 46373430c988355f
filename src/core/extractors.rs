//! Path and query extractors that reject with the API error format

use crate::core::error::{ValidationError, WebranaError};
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Single `{id}` path segment parsed as a UUID
///
/// A malformed id answers 400 `INVALID_UUID` instead of axum's plain-text
/// rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathId(pub Uuid);

impl<S> FromRequestParts<S> for PathId
where
    S: Send + Sync,
{
    type Rejection = WebranaError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|e| ValidationError::field("id", e.body_text()))?;
        Uuid::parse_str(&raw)
            .map(PathId)
            .map_err(|_| ValidationError::InvalidUuid { value: raw }.into())
    }
}

/// Query string deserialized into `T`
///
/// Bad values answer 400 `INVALID_QUERY` in the JSON error shape.
#[derive(Debug, Clone, Default)]
pub struct QueryParams<T>(pub T);

impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = WebranaError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ValidationError::InvalidQuery {
                message: e.body_text(),
            })?;
        Ok(QueryParams(value))
    }
}
