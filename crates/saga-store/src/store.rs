use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, SagaId, SagaQuery, SagaRecord, SagaStoreError, Version};

/// Options for saving a saga record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Version the writer read before producing the new record.
    /// `Version::initial()` means the instance must not exist yet.
    pub expected_version: Version,
}

impl SaveOptions {
    /// Expects the instance to be stored at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: version,
        }
    }

    /// Expects the instance to not exist (first transition).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Version::initial(),
        }
    }

    /// Returns true if this save creates the instance.
    pub fn is_insert(&self) -> bool {
        self.expected_version == Version::initial()
    }
}

/// Core trait for saga state persistence.
///
/// Implementations keep exactly one record per instance and must reject a
/// save whose expected version does not match the stored one. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads the record of an instance.
    ///
    /// Returns None if the instance was never saved.
    async fn load(&self, instance_id: &SagaId) -> Result<Option<SagaRecord>>;

    /// Saves a record with compare-and-swap semantics on its version.
    ///
    /// The record's version must be `options.expected_version.next()`.
    /// Fails with `ConcurrencyConflict` if the stored version differs from
    /// the expected one. Returns the committed version.
    async fn save(&self, record: SagaRecord, options: SaveOptions) -> Result<Version>;

    /// Acknowledges delivery of the outbox stored with `version`.
    ///
    /// Clears the outbox without changing the version. Returns false if the
    /// stored version moved on (the newer record carries its own outbox) or
    /// nothing was pending.
    async fn clear_outbox(&self, instance_id: &SagaId, version: Version) -> Result<bool>;

    /// Retrieves records matching a query, ordered by last update (oldest first).
    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>>;

    /// Counts records matching a query, ignoring limit and offset.
    async fn count(&self, query: SagaQuery) -> Result<usize>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks if an instance has been saved.
    async fn exists(&self, instance_id: &SagaId) -> Result<bool> {
        Ok(self.load(instance_id).await?.is_some())
    }

    /// Gets the current version of an instance.
    ///
    /// Returns None if the instance doesn't exist.
    async fn current_version(&self, instance_id: &SagaId) -> Result<Option<Version>> {
        Ok(self.load(instance_id).await?.map(|record| record.version))
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

/// Lets a store picked at runtime (`Arc<dyn SagaStore>`) stand in wherever a
/// concrete store is expected.
#[async_trait]
impl<T: SagaStore + ?Sized> SagaStore for Arc<T> {
    async fn load(&self, instance_id: &SagaId) -> Result<Option<SagaRecord>> {
        (**self).load(instance_id).await
    }

    async fn save(&self, record: SagaRecord, options: SaveOptions) -> Result<Version> {
        (**self).save(record, options).await
    }

    async fn clear_outbox(&self, instance_id: &SagaId, version: Version) -> Result<bool> {
        (**self).clear_outbox(instance_id, version).await
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        (**self).query(query).await
    }

    async fn count(&self, query: SagaQuery) -> Result<usize> {
        (**self).count(query).await
    }
}

/// Validates a record before saving.
pub fn validate_record_for_save(record: &SagaRecord, options: &SaveOptions) -> Result<()> {
    if record.version != options.expected_version.next() {
        return Err(SagaStoreError::InvalidRecord(format!(
            "record version must follow the expected version. Expected {}, got {}",
            options.expected_version.next(),
            record.version
        )));
    }
    if record.instance_id.as_str().is_empty() {
        return Err(SagaStoreError::InvalidRecord(
            "instance id must not be empty".to_string(),
        ));
    }
    if record.saga_type.is_empty() {
        return Err(SagaStoreError::InvalidRecord(
            "saga type must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: i64) -> SagaRecord {
        SagaRecord::from_state(
            SagaId::from("saga-1"),
            "TestSaga",
            Version::new(version),
            "Processing",
            false,
            &serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn save_options_insert() {
        assert!(SaveOptions::expect_new().is_insert());
        assert!(!SaveOptions::expect_version(Version::first()).is_insert());
    }

    #[test]
    fn validate_accepts_next_version() {
        assert!(validate_record_for_save(&record(1), &SaveOptions::expect_new()).is_ok());
        assert!(
            validate_record_for_save(&record(3), &SaveOptions::expect_version(Version::new(2)))
                .is_ok()
        );
    }

    #[test]
    fn validate_rejects_version_gap() {
        let result = validate_record_for_save(&record(3), &SaveOptions::expect_new());
        assert!(matches!(result, Err(SagaStoreError::InvalidRecord(_))));
    }

    #[test]
    fn validate_rejects_empty_saga_type() {
        let mut record = record(1);
        record.saga_type.clear();
        let result = validate_record_for_save(&record, &SaveOptions::expect_new());
        assert!(matches!(result, Err(SagaStoreError::InvalidRecord(_))));
    }
}
