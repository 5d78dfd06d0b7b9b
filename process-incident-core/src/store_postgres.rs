//! Postgres-backed [`IncidentStore`].
//!
//! NOTE: queries use runtime-checked `sqlx::query()` rather than the
//! `query!` macros because the table is created by [`PgIncidentStore::ensure_schema`]
//! and may not exist at compile time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::store::{IncidentStore, StoreError};
use crate::types::{DeleteField, IncidentRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS process_incidents (
    id                    TEXT PRIMARY KEY,
    msg_version           BIGINT,
    external_task_id      TEXT NOT NULL,
    process_instance_id   TEXT NOT NULL,
    process_definition_id TEXT NOT NULL,
    worker_id             TEXT NOT NULL,
    error_message         TEXT NOT NULL,
    occurred_at           TIMESTAMPTZ NOT NULL,
    tenant_id             TEXT NOT NULL,
    deployment_name       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS process_incidents_instance_idx
    ON process_incidents (process_instance_id);
CREATE INDEX IF NOT EXISTS process_incidents_definition_idx
    ON process_incidents (process_definition_id);
"#;

#[derive(Debug, FromRow)]
struct IncidentRow {
    id: String,
    msg_version: Option<i64>,
    external_task_id: String,
    process_instance_id: String,
    process_definition_id: String,
    worker_id: String,
    error_message: String,
    occurred_at: DateTime<Utc>,
    tenant_id: String,
    deployment_name: String,
}

impl From<IncidentRow> for IncidentRecord {
    fn from(row: IncidentRow) -> Self {
        Self {
            id: row.id,
            schema_version: row.msg_version,
            external_task_id: row.external_task_id,
            process_instance_id: row.process_instance_id,
            process_definition_id: row.process_definition_id,
            worker_id: row.worker_id,
            error_message: row.error_message,
            occurred_at: row.occurred_at,
            tenant_id: row.tenant_id,
            deployment_name: row.deployment_name,
        }
    }
}

pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the incidents table and its delete-filter indexes.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn upsert(&self, record: &IncidentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_incidents
                (id, msg_version, external_task_id, process_instance_id,
                 process_definition_id, worker_id, error_message, occurred_at,
                 tenant_id, deployment_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                msg_version = EXCLUDED.msg_version,
                external_task_id = EXCLUDED.external_task_id,
                process_instance_id = EXCLUDED.process_instance_id,
                process_definition_id = EXCLUDED.process_definition_id,
                worker_id = EXCLUDED.worker_id,
                error_message = EXCLUDED.error_message,
                occurred_at = EXCLUDED.occurred_at,
                tenant_id = EXCLUDED.tenant_id,
                deployment_name = EXCLUDED.deployment_name
            "#,
        )
        .bind(&record.id)
        .bind(record.schema_version)
        .bind(&record.external_task_id)
        .bind(&record.process_instance_id)
        .bind(&record.process_definition_id)
        .bind(&record.worker_id)
        .bind(&record.error_message)
        .bind(record.occurred_at)
        .bind(&record.tenant_id)
        .bind(&record.deployment_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_where(&self, field: DeleteField, value: &str) -> Result<u64, StoreError> {
        // Column names come from a closed enum, never from input.
        let sql = format!(
            "DELETE FROM process_incidents WHERE {} = $1",
            field.as_str()
        );
        let result = sqlx::query(&sql).bind(value).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError> {
        let row: Option<IncidentRow> = sqlx::query_as(
            r#"
            SELECT id, msg_version, external_task_id, process_instance_id,
                   process_definition_id, worker_id, error_message, occurred_at,
                   tenant_id, deployment_name
            FROM process_incidents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(IncidentRecord::from))
    }
}
