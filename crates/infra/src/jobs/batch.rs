//! Batch fan-out: creates one job record per file in bounded waves.
//!
//! Files in a wave are stored and recorded concurrently; the next wave starts
//! only once every file of the current one has an outcome. A failing file never
//! affects its siblings.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use docintel_core::{BatchId, ContentHash, TenantId, UserId};
use docintel_documents::{BatchFile, FileOutcome, JobRecord, NewJob};

use crate::object_store::ObjectStore;
use crate::store::MetadataStore;

/// Per-file outcomes in input order, plus the records that were created.
#[derive(Debug, Clone, Default)]
pub struct BatchDispatch {
    pub outcomes: Vec<FileOutcome>,
    pub jobs: Vec<JobRecord>,
}

#[derive(Clone)]
pub struct BatchDispatcher {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    analyzer_id: String,
    wave_size: usize,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        analyzer_id: impl Into<String>,
        wave_size: usize,
    ) -> Self {
        Self {
            store,
            objects,
            analyzer_id: analyzer_id.into(),
            wave_size: wave_size.max(1),
        }
    }

    pub fn wave_size(&self) -> usize {
        self.wave_size
    }

    pub async fn dispatch(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        batch_id: BatchId,
        files: Vec<BatchFile>,
    ) -> BatchDispatch {
        let mut dispatch = BatchDispatch::default();
        let total = files.len();
        let mut files = files.into_iter().peekable();
        let mut wave = 0usize;

        while files.peek().is_some() {
            wave += 1;
            let chunk: Vec<BatchFile> = files.by_ref().take(self.wave_size).collect();
            debug!(%batch_id, wave, files = chunk.len(), "dispatching wave");
            let results = join_all(
                chunk
                    .into_iter()
                    .map(|file| self.create_one(tenant_id, user_id, batch_id, file)),
            )
            .await;

            for result in results {
                match result {
                    Ok(job) => {
                        dispatch.outcomes.push(FileOutcome::Submitted {
                            job_id: job.id,
                            file_name: job.file_name.clone(),
                        });
                        dispatch.jobs.push(job);
                    }
                    Err(outcome) => dispatch.outcomes.push(outcome),
                }
            }
        }

        info!(
            %batch_id,
            tenant_id = %tenant_id,
            total,
            created = dispatch.jobs.len(),
            "batch dispatched"
        );
        dispatch
    }

    async fn create_one(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        batch_id: BatchId,
        file: BatchFile,
    ) -> Result<JobRecord, FileOutcome> {
        let failed = |error: String| FileOutcome::Failed {
            file_name: file.file_name.clone(),
            error,
        };

        if file.bytes.is_empty() {
            return Err(failed("file is empty".to_string()));
        }
        if file.file_name.trim().is_empty() {
            return Err(failed("file name is empty".to_string()));
        }

        let job = JobRecord::new(NewJob {
            tenant_id: tenant_id.clone(),
            user_id: user_id.clone(),
            file_name: file.file_name.clone(),
            content_hash: ContentHash::of(&file.bytes),
            analyzer_id: self.analyzer_id.clone(),
            batch_id: Some(batch_id),
        });

        if let Err(e) = self.objects.put(&job.object_key, file.bytes.clone()).await {
            warn!(%batch_id, file_name = %file.file_name, error = %e, "batch file upload failed");
            return Err(failed(e.to_string()));
        }

        if let Err(e) = self.store.create_job(&job).await {
            warn!(%batch_id, file_name = %file.file_name, error = %e, "batch job record failed");
            if let Err(cleanup) = self.objects.delete(&job.object_key).await {
                warn!(object_key = %job.object_key, error = %cleanup, "orphaned object left behind");
            }
            return Err(failed(e.to_string()));
        }

        Ok(job)
    }
}
