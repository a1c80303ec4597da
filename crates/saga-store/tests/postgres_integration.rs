//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use saga_store::{
    PostgresSagaStore, SagaId, SagaQuery, SagaRecord, SagaStore, SagaStoreError, SagaStoreExt,
    SaveOptions, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_instances_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and a cleared table
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_instances")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn make_record(id: &str, version: i64, status: &str, terminal: bool) -> SagaRecord {
    SagaRecord::from_state(
        SagaId::from(id),
        "IdentityRegistration",
        Version::new(version),
        status,
        terminal,
        &serde_json::json!({ "version": version, "status": status }),
    )
    .unwrap()
}

#[tokio::test]
async fn test_insert_and_load() {
    let store = get_test_store().await;

    let version = store
        .save(
            make_record("saga-1", 1, "Processing", false),
            SaveOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let loaded = store.load(&SagaId::from("saga-1")).await.unwrap().unwrap();
    assert_eq!(loaded.saga_type, "IdentityRegistration");
    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.status, "Processing");
    assert_eq!(loaded.state["status"], "Processing");
}

#[tokio::test]
async fn test_duplicate_insert_conflicts() {
    let store = get_test_store().await;
    store
        .save(
            make_record("saga-1", 1, "Processing", false),
            SaveOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .save(
            make_record("saga-1", 1, "Processing", false),
            SaveOptions::expect_new(),
        )
        .await;

    match result {
        Err(SagaStoreError::ConcurrencyConflict { actual, .. }) => {
            assert_eq!(actual, Version::first());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_compare_and_swap_update() {
    let store = get_test_store().await;
    store
        .save(
            make_record("saga-1", 1, "Processing", false),
            SaveOptions::expect_new(),
        )
        .await
        .unwrap();

    store
        .save(
            make_record("saga-1", 2, "Completed", true),
            SaveOptions::expect_version(Version::first()),
        )
        .await
        .unwrap();

    // Stale writer read version 1 as well
    let stale = store
        .save(
            make_record("saga-1", 2, "Failed", true),
            SaveOptions::expect_version(Version::first()),
        )
        .await;
    assert!(stale.unwrap_err().is_conflict());

    let loaded = store.load(&SagaId::from("saga-1")).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(2));
    assert_eq!(loaded.status, "Completed");
    assert!(loaded.terminal);
}

#[tokio::test]
async fn test_update_of_missing_instance_conflicts() {
    let store = get_test_store().await;

    let result = store
        .save(
            make_record("ghost", 2, "Processing", false),
            SaveOptions::expect_version(Version::first()),
        )
        .await;

    match result {
        Err(SagaStoreError::ConcurrencyConflict { actual, .. }) => {
            assert_eq!(actual, Version::initial());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_and_count() {
    let store = get_test_store().await;
    for (id, status, terminal) in [
        ("a", "Processing", false),
        ("b", "Completed", true),
        ("c", "Rejected", true),
    ] {
        store
            .save(make_record(id, 1, status, terminal), SaveOptions::expect_new())
            .await
            .unwrap();
    }

    let in_flight = store
        .query(SagaQuery::for_saga_type("IdentityRegistration").terminal(false))
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].instance_id.as_str(), "a");

    let terminal = store
        .query(SagaQuery::new().statuses(vec!["Completed".into(), "Rejected".into()]))
        .await
        .unwrap();
    assert_eq!(terminal.len(), 2);

    let page = store.query(SagaQuery::new().limit(1).offset(1)).await.unwrap();
    assert_eq!(page.len(), 1);

    assert_eq!(store.count(SagaQuery::new().terminal(true)).await.unwrap(), 2);
    assert!(store.exists(&SagaId::from("b")).await.unwrap());
    assert!(!store.exists(&SagaId::from("z")).await.unwrap());
}

#[tokio::test]
async fn test_outbox_is_saved_and_cleared_without_version_change() {
    let store = get_test_store().await;
    let outbox = serde_json::json!({ "commands": [{ "type": "CreateIdentity" }] });
    store
        .save(
            make_record("saga-1", 1, "Processing", false)
                .with_outbox(Some(&outbox))
                .unwrap(),
            SaveOptions::expect_new(),
        )
        .await
        .unwrap();
    store
        .save(make_record("saga-2", 1, "Processing", false), SaveOptions::expect_new())
        .await
        .unwrap();

    let pending = store
        .query(SagaQuery::new().pending_outbox(true))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].outbox.as_ref().unwrap(), &outbox);

    // A stale acknowledgement leaves the outbox in place
    assert!(!store.clear_outbox(&SagaId::from("saga-1"), Version::new(2)).await.unwrap());
    assert!(store.clear_outbox(&SagaId::from("saga-1"), Version::first()).await.unwrap());

    let loaded = store.load(&SagaId::from("saga-1")).await.unwrap().unwrap();
    assert!(loaded.outbox.is_none());
    assert_eq!(loaded.version, Version::first());
    assert_eq!(store.count(SagaQuery::new().pending_outbox(false)).await.unwrap(), 2);
}
