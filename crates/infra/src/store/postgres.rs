//! Postgres-backed metadata store.
//!
//! Job and batch records are stored as JSONB documents next to the columns that
//! queries filter on (`tenant_id`, `content_hash`, `status`, `created_at`). Quota
//! state is one row per tenant.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed | N/A | `Storage` |
//! | Other | N/A | `Storage` |
//!
//! ## Tenant Isolation
//!
//! Listing and lookup queries include `tenant_id` in the WHERE clause; point reads by
//! id compare the stored tenant and report `TenantIsolation` on mismatch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use docintel_core::{BatchId, ContentHash, JobId, TenantId};
use docintel_documents::{BatchRecord, JobRecord, QuotaState};

use super::{JobPage, JobQuery, MetadataStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS document_jobs (
        id UUID PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL,
        doc JSONB NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS document_jobs_dedup_idx
        ON document_jobs (tenant_id, content_hash, created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS document_jobs_list_idx
        ON document_jobs (tenant_id, status, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_quotas (
        tenant_id TEXT PRIMARY KEY,
        inflight INTEGER NOT NULL CHECK (inflight >= 0),
        quota_limit INTEGER NOT NULL CHECK (quota_limit >= 0),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_batches (
        id UUID PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )
    "#,
];

const TERMINAL_STATUSES: [&str; 3] = ["succeeded", "failed", "timed_out"];

#[derive(Debug, Clone)]
pub struct PostgresMetadataStore {
    pool: Arc<PgPool>,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if they are missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self, job), fields(tenant_id = %job.tenant_id, job_id = %job.id), err)]
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO document_jobs (id, tenant_id, content_hash, status, created_at, version, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.tenant_id.as_str())
        .bind(job.content_hash.as_str())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(to_db_version(job.version)?)
        .bind(to_doc(job)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query("SELECT tenant_id, version, doc FROM document_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error("get_job", e))?;
        if owner != tenant_id.as_str() {
            return Err(StoreError::TenantIsolation);
        }
        job_from_row(&row).map(Some)
    }

    #[instrument(
        skip(self, job),
        fields(tenant_id = %job.tenant_id, job_id = %job.id, version = job.version),
        err
    )]
    async fn update_job(&self, job: &mut JobRecord) -> Result<(), StoreError> {
        let expected = job.version;
        let mut next = job.clone();
        next.version = expected + 1;

        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = $3, version = $4, doc = $5
            WHERE id = $1 AND tenant_id = $2 AND version = $6
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(next.tenant_id.as_str())
        .bind(next.status.as_str())
        .bind(to_db_version(next.version)?)
        .bind(to_doc(&next)?)
        .bind(to_db_version(expected)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        if result.rows_affected() == 1 {
            job.version = next.version;
            return Ok(());
        }

        // Nothing matched: tell apart a missing row, a foreign tenant and a stale version.
        let row = sqlx::query("SELECT tenant_id, version FROM document_jobs WHERE id = $1")
            .bind(job.id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_job", e))?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(job.id.to_string()));
        };
        let owner: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error("update_job", e))?;
        if owner != job.tenant_id.as_str() {
            return Err(StoreError::TenantIsolation);
        }
        let actual: i64 = row.try_get("version").map_err(|e| map_sqlx_error("update_job", e))?;
        Err(StoreError::Conflict {
            id: job.id,
            expected,
            actual: actual.max(0) as u64,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, content_hash = %content_hash), err)]
    async fn find_recent_by_hash(
        &self,
        tenant_id: &TenantId,
        content_hash: &ContentHash,
        since: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT version, doc FROM document_jobs
            WHERE tenant_id = $1 AND content_hash = $2 AND created_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(content_hash.as_str())
        .bind(since)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_recent_by_hash", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_jobs(&self, tenant_id: &TenantId, query: &JobQuery) -> Result<JobPage, StoreError> {
        let status = query.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM document_jobs
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let rows = sqlx::query(
            r#"
            SELECT version, doc FROM document_jobs
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(status)
        .bind(i64::from(query.page_size))
        .bind(query.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage {
            jobs,
            total: total.max(0) as u64,
            page: query.page,
            page_size: query.page_size,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn delete_job(&self, tenant_id: &TenantId, job_id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM document_jobs WHERE id = $1 AND tenant_id = $2")
            .bind(job_id.as_uuid())
            .bind(tenant_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list_unfinished(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version, doc FROM document_jobs
            WHERE status <> ALL($1)
               OR COALESCE((doc->'progress'->>'quota_held')::boolean, FALSE)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&TERMINAL_STATUSES[..])
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_unfinished", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn load_quota(&self, tenant_id: &TenantId) -> Result<Option<QuotaState>, StoreError> {
        let row = sqlx::query("SELECT inflight, quota_limit FROM tenant_quotas WHERE tenant_id = $1")
            .bind(tenant_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_quota", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let inflight: i32 = row.try_get("inflight").map_err(|e| map_sqlx_error("load_quota", e))?;
        let limit: i32 = row.try_get("quota_limit").map_err(|e| map_sqlx_error("load_quota", e))?;
        Ok(Some(QuotaState::restore(
            inflight.max(0) as u32,
            limit.max(0) as u32,
        )))
    }

    #[instrument(skip(self, state), fields(tenant_id = %tenant_id), err)]
    async fn save_quota(&self, tenant_id: &TenantId, state: &QuotaState) -> Result<(), StoreError> {
        let inflight = i32::try_from(state.inflight())
            .map_err(|_| StoreError::Serialization("inflight out of range".to_string()))?;
        let limit = i32::try_from(state.limit())
            .map_err(|_| StoreError::Serialization("limit out of range".to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO tenant_quotas (tenant_id, inflight, quota_limit, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (tenant_id)
            DO UPDATE SET inflight = EXCLUDED.inflight,
                          quota_limit = EXCLUDED.quota_limit,
                          updated_at = now()
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(inflight)
        .bind(limit)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_quota", e))?;
        Ok(())
    }

    #[instrument(skip(self, batch), fields(tenant_id = %batch.tenant_id, batch_id = %batch.id), err)]
    async fn save_batch(&self, batch: &BatchRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_value(batch).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO document_batches (id, tenant_id, created_at, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id)
            DO UPDATE SET doc = EXCLUDED.doc
            WHERE document_batches.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(batch.tenant_id.as_str())
        .bind(batch.created_at)
        .bind(doc)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_batch", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TenantIsolation);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, batch_id = %batch_id), err)]
    async fn get_batch(
        &self,
        tenant_id: &TenantId,
        batch_id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError> {
        let row = sqlx::query("SELECT tenant_id, doc FROM document_batches WHERE id = $1")
            .bind(batch_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_batch", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error("get_batch", e))?;
        if owner != tenant_id.as_str() {
            return Err(StoreError::TenantIsolation);
        }
        let doc: serde_json::Value = row.try_get("doc").map_err(|e| map_sqlx_error("get_batch", e))?;
        serde_json::from_value(doc)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn to_doc(job: &JobRecord) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(job).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Serialization("version out of range".to_string()))
}

/// Decode a row carrying `version` and `doc`; the column version is authoritative.
fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<JobRecord, StoreError> {
    let doc: serde_json::Value = row.try_get("doc").map_err(|e| map_sqlx_error("decode_job", e))?;
    let version: i64 = row.try_get("version").map_err(|e| map_sqlx_error("decode_job", e))?;
    let mut job: JobRecord =
        serde_json::from_value(doc).map_err(|e| StoreError::Serialization(e.to_string()))?;
    job.version = version.max(0) as u64;
    Ok(job)
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
