use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result, SagaId, SagaQuery, SagaRecord, SagaStoreError, Version,
    store::{SagaStore, SaveOptions, validate_record_for_save},
};

const SELECT_COLUMNS: &str =
    "SELECT instance_id, saga_type, version, status, terminal, state, outbox, created_at, updated_at FROM saga_instances";

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("saga store migrations applied");
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            instance_id: SagaId::from_string(row.try_get::<String, _>("instance_id")?),
            saga_type: row.try_get("saga_type")?,
            version: Version::new(row.try_get("version")?),
            status: row.try_get("status")?,
            terminal: row.try_get("terminal")?,
            state: row.try_get("state")?,
            outbox: row.try_get("outbox")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn stored_version(&self, instance_id: &SagaId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM saga_instances WHERE instance_id = $1")
                .bind(instance_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(Version::new(version.unwrap_or(0)))
    }

    /// Appends the WHERE clause for a query, returning the next parameter index.
    fn push_filters(sql: &mut String, query: &SagaQuery) -> usize {
        let mut param_count = 0;

        if query.saga_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_type = ${param_count}"));
        }
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.terminal.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND terminal = ${param_count}"));
        }
        match query.pending_outbox {
            Some(true) => sql.push_str(" AND outbox IS NOT NULL"),
            Some(false) => sql.push_str(" AND outbox IS NULL"),
            None => {}
        }
        if query.updated_from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at >= ${param_count}"));
        }
        if query.updated_to.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at <= ${param_count}"));
        }

        param_count
    }
}

macro_rules! bind_filters {
    ($sqlx_query:expr, $query:expr) => {{
        let mut q = $sqlx_query;
        if let Some(ref saga_type) = $query.saga_type {
            q = q.bind(saga_type.clone());
        }
        if let Some(ref statuses) = $query.statuses {
            q = q.bind(statuses.clone());
        }
        if let Some(terminal) = $query.terminal {
            q = q.bind(terminal);
        }
        if let Some(from) = $query.updated_from {
            q = q.bind(from);
        }
        if let Some(to) = $query.updated_to {
            q = q.bind(to);
        }
        q
    }};
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn load(&self, instance_id: &SagaId) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_COLUMNS} WHERE instance_id = $1"))
            .bind(instance_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn save(&self, record: SagaRecord, options: SaveOptions) -> Result<Version> {
        validate_record_for_save(&record, &options)?;

        let rows_affected = if options.is_insert() {
            sqlx::query(
                r#"
                INSERT INTO saga_instances (instance_id, saga_type, version, status, terminal, state, outbox, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (instance_id) DO NOTHING
                "#,
            )
            .bind(record.instance_id.as_str())
            .bind(&record.saga_type)
            .bind(record.version.as_i64())
            .bind(&record.status)
            .bind(record.terminal)
            .bind(&record.state)
            .bind(&record.outbox)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances
                SET version = $2, status = $3, terminal = $4, state = $5, outbox = $6, updated_at = $7
                WHERE instance_id = $1 AND version = $8
                "#,
            )
            .bind(record.instance_id.as_str())
            .bind(record.version.as_i64())
            .bind(&record.status)
            .bind(record.terminal)
            .bind(&record.state)
            .bind(&record.outbox)
            .bind(record.updated_at)
            .bind(options.expected_version.as_i64())
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            let actual = self.stored_version(&record.instance_id).await?;
            return Err(SagaStoreError::ConcurrencyConflict {
                instance_id: record.instance_id,
                expected: options.expected_version,
                actual,
            });
        }

        Ok(record.version)
    }

    async fn clear_outbox(&self, instance_id: &SagaId, version: Version) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE saga_instances SET outbox = NULL WHERE instance_id = $1 AND version = $2 AND outbox IS NOT NULL",
        )
        .bind(instance_id.as_str())
        .bind(version.as_i64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = Self::push_filters(&mut sql, &query);

        sql.push_str(" ORDER BY updated_at ASC, instance_id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = bind_filters!(sqlx::query(&sql), query);
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn count(&self, query: SagaQuery) -> Result<usize> {
        let mut sql = String::from("SELECT COUNT(*) FROM saga_instances WHERE 1=1");
        Self::push_filters(&mut sql, &query);

        let count: i64 = bind_filters!(sqlx::query_scalar(&sql), query)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}
