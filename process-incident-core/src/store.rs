use async_trait::async_trait;

use crate::types::{DeleteField, IncidentRecord};

/// Error type for incident persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Durable incident persistence.
///
/// Each call must be atomic per record: concurrent upserts and deletes that
/// touch the same `id` may race, but never leave a half-written record.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert or fully replace the record keyed by `record.id`.
    async fn upsert(&self, record: &IncidentRecord) -> Result<(), StoreError>;

    /// Delete every record whose `field` equals `value`. Returns the number
    /// removed; zero is not an error.
    async fn delete_where(&self, field: DeleteField, value: &str) -> Result<u64, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError>;
}
