//! In-memory metadata store for tests/dev.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use docintel_core::{BatchId, ContentHash, JobId, TenantId};
use docintel_documents::{BatchRecord, JobRecord, QuotaState};

use super::{JobPage, JobQuery, MetadataStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// Secondary index for deduplication lookups
    by_hash: HashMap<(TenantId, ContentHash), Vec<JobId>>,
    quotas: HashMap<TenantId, QuotaState>,
    batches: HashMap<BatchId, BatchRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Storage("metadata store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("metadata store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        inner
            .by_hash
            .entry((job.tenant_id.clone(), job.content_hash.clone()))
            .or_default()
            .push(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.read()?;
        match inner.jobs.get(&job_id) {
            Some(job) if &job.tenant_id == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn update_job(&self, job: &mut JobRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::NotFound(job.id.to_string()))?;
        if stored.tenant_id != job.tenant_id {
            return Err(StoreError::TenantIsolation);
        }
        if stored.version != job.version {
            return Err(StoreError::Conflict {
                id: job.id,
                expected: job.version,
                actual: stored.version,
            });
        }
        job.version += 1;
        *stored = job.clone();
        Ok(())
    }

    async fn delete_job(&self, tenant_id: &TenantId, job_id: JobId) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        match inner.jobs.get(&job_id) {
            Some(job) if &job.tenant_id == tenant_id => {}
            _ => return Ok(false),
        }
        let Some(job) = inner.jobs.remove(&job_id) else {
            return Ok(false);
        };
        let key = (job.tenant_id, job.content_hash);
        let emptied = match inner.by_hash.get_mut(&key) {
            Some(ids) => {
                ids.retain(|id| *id != job_id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.by_hash.remove(&key);
        }
        Ok(true)
    }

    async fn find_recent_by_hash(
        &self,
        tenant_id: &TenantId,
        content_hash: &ContentHash,
        since: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.read()?;
        let Some(ids) = inner
            .by_hash
            .get(&(tenant_id.clone(), content_hash.clone()))
        else {
            return Ok(None);
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.created_at > since)
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn list_jobs(&self, tenant_id: &TenantId, query: &JobQuery) -> Result<JobPage, StoreError> {
        let inner = self.read()?;
        let mut matching: Vec<&JobRecord> = inner
            .jobs
            .values()
            .filter(|j| &j.tenant_id == tenant_id && query.status.is_none_or(|s| j.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let jobs = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(JobPage {
            jobs,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn list_unfinished(&self) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.read()?;
        let mut jobs: Vec<JobRecord> = inner
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal() || j.progress.quota_held)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn load_quota(&self, tenant_id: &TenantId) -> Result<Option<QuotaState>, StoreError> {
        Ok(self.read()?.quotas.get(tenant_id).copied())
    }

    async fn save_quota(&self, tenant_id: &TenantId, state: &QuotaState) -> Result<(), StoreError> {
        self.write()?.quotas.insert(tenant_id.clone(), *state);
        Ok(())
    }

    async fn save_batch(&self, batch: &BatchRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.batches.get(&batch.id) {
            if existing.tenant_id != batch.tenant_id {
                return Err(StoreError::TenantIsolation);
            }
        }
        inner.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn get_batch(
        &self,
        tenant_id: &TenantId,
        batch_id: BatchId,
    ) -> Result<Option<BatchRecord>, StoreError> {
        let inner = self.read()?;
        match inner.batches.get(&batch_id) {
            Some(b) if &b.tenant_id == tenant_id => Ok(Some(b.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}
