use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result, SagaId, SagaQuery, SagaRecord, SagaStoreError, Version,
    store::{SagaStore, SaveOptions, validate_record_for_save},
};

/// In-memory saga store implementation for testing and single-process use.
///
/// This implementation keeps all records in memory and provides the same
/// compare-and-swap semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    records: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of instances stored.
    pub async fn instance_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

fn matches_query(record: &SagaRecord, query: &SagaQuery) -> bool {
    if let Some(ref saga_type) = query.saga_type
        && &record.saga_type != saga_type
    {
        return false;
    }
    if let Some(ref statuses) = query.statuses
        && !statuses.contains(&record.status)
    {
        return false;
    }
    if let Some(terminal) = query.terminal
        && record.terminal != terminal
    {
        return false;
    }
    if let Some(pending) = query.pending_outbox
        && record.has_pending_outbox() != pending
    {
        return false;
    }
    if let Some(from) = query.updated_from
        && record.updated_at < from
    {
        return false;
    }
    if let Some(to) = query.updated_to
        && record.updated_at > to
    {
        return false;
    }
    true
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, instance_id: &SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.records.read().await.get(instance_id).cloned())
    }

    async fn save(&self, mut record: SagaRecord, options: SaveOptions) -> Result<Version> {
        validate_record_for_save(&record, &options)?;

        let mut records = self.records.write().await;
        let current = records.get(&record.instance_id);
        let actual = current.map(|r| r.version).unwrap_or(Version::initial());

        if actual != options.expected_version {
            return Err(SagaStoreError::ConcurrencyConflict {
                instance_id: record.instance_id.clone(),
                expected: options.expected_version,
                actual,
            });
        }

        if let Some(existing) = current {
            record.created_at = existing.created_at;
        }

        let version = record.version;
        tracing::trace!(instance_id = %record.instance_id, %version, "saga record saved");
        records.insert(record.instance_id.clone(), record);

        Ok(version)
    }

    async fn clear_outbox(&self, instance_id: &SagaId, version: Version) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(instance_id) {
            Some(record) if record.version == version && record.outbox.is_some() => {
                record.outbox = None;
                tracing::trace!(%instance_id, %version, "saga outbox cleared");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| matches_query(r, &query))
            .cloned()
            .collect();

        // Sort by last update then id for a stable order
        matching.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });

        let offset = query.offset.unwrap_or(0);
        let matching = matching.into_iter().skip(offset);

        let matching = if let Some(limit) = query.limit {
            matching.take(limit).collect()
        } else {
            matching.collect()
        };

        Ok(matching)
    }

    async fn count(&self, query: SagaQuery) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| matches_query(r, &query)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SagaStoreExt;

    fn make_record(id: &str, version: i64, status: &str, terminal: bool) -> SagaRecord {
        SagaRecord::from_state(
            SagaId::from(id),
            "TestSaga",
            Version::new(version),
            status,
            terminal,
            &serde_json::json!({ "version": version }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_new_instance() {
        let store = InMemorySagaStore::new();

        let version = store
            .save(
                make_record("a", 1, "Processing", false),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(version, Version::first());
        assert_eq!(store.instance_count().await, 1);
        assert!(store.exists(&SagaId::from("a")).await.unwrap());
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let store = InMemorySagaStore::new();
        store
            .save(
                make_record("a", 1, "Processing", false),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .save(
                make_record("a", 1, "Processing", false),
                SaveOptions::expect_new(),
            )
            .await;

        match result {
            Err(SagaStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_with_matching_version() {
        let store = InMemorySagaStore::new();
        store
            .save(
                make_record("a", 1, "Processing", false),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        let version = store
            .save(
                make_record("a", 2, "Completed", true),
                SaveOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        let loaded = store.load(&SagaId::from("a")).await.unwrap().unwrap();
        assert_eq!(loaded.status, "Completed");
        assert!(loaded.terminal);
        assert_eq!(
            store.current_version(&SagaId::from("a")).await.unwrap(),
            Some(Version::new(2))
        );
    }

    #[tokio::test]
    async fn stale_writer_conflicts_and_leaves_record_untouched() {
        let store = InMemorySagaStore::new();
        store
            .save(
                make_record("a", 1, "Processing", false),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();
        store
            .save(
                make_record("a", 2, "Processing", false),
                SaveOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        // A second writer that also read version 1
        let result = store
            .save(
                make_record("a", 2, "Failed", true),
                SaveOptions::expect_version(Version::first()),
            )
            .await;

        assert!(result.unwrap_err().is_conflict());
        let loaded = store.load(&SagaId::from("a")).await.unwrap().unwrap();
        assert_eq!(loaded.status, "Processing");
        assert_eq!(loaded.version, Version::new(2));
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let store = InMemorySagaStore::new();
        let first = make_record("a", 1, "Processing", false);
        let created_at = first.created_at;
        store.save(first, SaveOptions::expect_new()).await.unwrap();

        store
            .save(
                make_record("a", 2, "Processing", false),
                SaveOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        let loaded = store.load(&SagaId::from("a")).await.unwrap().unwrap();
        assert_eq!(loaded.created_at, created_at);
    }

    #[tokio::test]
    async fn load_missing_instance() {
        let store = InMemorySagaStore::new();
        assert!(store.load(&SagaId::from("missing")).await.unwrap().is_none());
        assert_eq!(
            store.current_version(&SagaId::from("missing")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn query_with_filters() {
        let store = InMemorySagaStore::new();
        for (id, status, terminal) in [
            ("a", "Processing", false),
            ("b", "Completed", true),
            ("c", "Rejected", true),
            ("d", "Processing", false),
        ] {
            store
                .save(make_record(id, 1, status, terminal), SaveOptions::expect_new())
                .await
                .unwrap();
        }

        let in_flight = store
            .query(SagaQuery::for_saga_type("TestSaga").terminal(false))
            .await
            .unwrap();
        assert_eq!(in_flight.len(), 2);

        let rejected = store
            .query(SagaQuery::new().status("Rejected"))
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].instance_id.as_str(), "c");

        let other_type = store
            .query(SagaQuery::for_saga_type("OtherSaga"))
            .await
            .unwrap();
        assert!(other_type.is_empty());

        let page = store.query(SagaQuery::new().limit(3)).await.unwrap();
        assert_eq!(page.len(), 3);

        let count = store.count(SagaQuery::new().terminal(true).limit(1)).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn clear_outbox_only_at_matching_version() {
        let store = InMemorySagaStore::new();
        let pending = serde_json::json!({ "commands": [1] });
        store
            .save(
                make_record("a", 1, "Processing", false)
                    .with_outbox(Some(&pending))
                    .unwrap(),
                SaveOptions::expect_new(),
            )
            .await
            .unwrap();

        let awaiting = store
            .query(SagaQuery::new().pending_outbox(true))
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 1);

        assert!(!store.clear_outbox(&SagaId::from("a"), Version::new(2)).await.unwrap());
        assert!(store.clear_outbox(&SagaId::from("a"), Version::first()).await.unwrap());
        assert!(!store.clear_outbox(&SagaId::from("a"), Version::first()).await.unwrap());

        let loaded = store.load(&SagaId::from("a")).await.unwrap().unwrap();
        assert!(!loaded.has_pending_outbox());
        assert_eq!(loaded.version, Version::first());
        assert_eq!(store.count(SagaQuery::new().pending_outbox(true)).await.unwrap(), 0);
    }
}
