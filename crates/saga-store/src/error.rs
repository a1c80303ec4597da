use thiserror::Error;

use crate::{SagaId, Version};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The stored version did not match the version the writer expected.
    #[error(
        "Concurrency conflict for saga {instance_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        instance_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The record handed to `save` is inconsistent with the save options.
    #[error("Invalid saga record: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaStoreError {
    /// Returns true if this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaStoreError::ConcurrencyConflict { .. })
    }

    /// Returns true if the same operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SagaStoreError::ConcurrencyConflict { .. } | SagaStoreError::Database(_)
        )
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
