//! Metadata store: job records, per-tenant quota documents, batch records.
//!
//! All reads are tenant-scoped. Job updates use optimistic concurrency on
//! `JobRecord::version`; the store bumps the version on every successful write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docintel_core::{BatchId, ContentHash, JobId, TenantId};
use docintel_documents::{BatchRecord, JobRecord, JobStatus, QuotaState};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryMetadataStore;
pub use postgres::PostgresMetadataStore;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("version conflict on job {id}: expected {expected}, found {actual}")]
    Conflict { id: JobId, expected: u64, actual: u64 },
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Filter and page for listing a tenant's jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl JobQuery {
    /// Build a query, clamping page to `>= 1` and page size to `1..=MAX_PAGE_SIZE`.
    pub fn new(status: Option<JobStatus>, page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            status,
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// One page of a tenant's jobs, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl JobPage {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size.max(1)))
    }
}

/// Durable metadata storage.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new job record.
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Load a job. A job owned by another tenant is a `TenantIsolation` error.
    async fn get_job(&self, tenant_id: &TenantId, job_id: JobId)
    -> Result<Option<JobRecord>, StoreError>;

    /// Persist `job` if the stored version equals `job.version`, then bump it.
    async fn update_job(&self, job: &mut JobRecord) -> Result<(), StoreError>;

    /// Remove a job. Returns `false` if the tenant has no such job.
    async fn delete_job(&self, tenant_id: &TenantId, job_id: JobId) -> Result<bool, StoreError>;

    /// Most recent job with this content hash created strictly after `since`.
    async fn find_recent_by_hash(
        &self,
        tenant_id: &TenantId,
        content_hash: &ContentHash,
        since: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError>;

    async fn list_jobs(&self, tenant_id: &TenantId, query: &JobQuery) -> Result<JobPage, StoreError>;

    /// Every non-terminal job across tenants, plus terminal jobs that still hold
    /// a quota slot (startup recovery).
    async fn list_unfinished(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn load_quota(&self, tenant_id: &TenantId) -> Result<Option<QuotaState>, StoreError>;

    async fn save_quota(&self, tenant_id: &TenantId, state: &QuotaState) -> Result<(), StoreError>;

    /// Insert or replace a batch record.
    async fn save_batch(&self, batch: &BatchRecord) -> Result<(), StoreError>;

    async fn get_batch(
        &self,
        tenant_id: &TenantId,
        batch_id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}
