//! Intake facade used by the HTTP layer.
//!
//! `DocumentService` wires the quota controller, deduplication index, batch
//! dispatcher and orchestrator together over the injected stores and clients.
//! Single intake is synchronous up to the submission step so that quota denials
//! and submission failures reach the caller; batch intake returns as soon as the
//! batch record exists and dispatches in the background.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use docintel_core::{BatchId, ContentHash, JobId, TenantId, UserId};
use docintel_documents::{
    BackoffPolicy, BatchFile, BatchRecord, BatchStatus, JobRecord, JobStatus, NewJob, QuotaState,
    TransitionError, DEFAULT_QUOTA_LIMIT,
};

use super::batch::BatchDispatcher;
use super::dedup::DeduplicationIndex;
use super::orchestrator::{
    FieldExtractor, JobOrchestrator, OrchestratorConfig, OrchestratorError, SlotGuard,
};
use super::quota::{QuotaController, QuotaError};
use crate::analysis::AnalysisService;
use crate::config::{
    AppConfig, DEFAULT_ANALYZER_ID, DEFAULT_ANALYZER_KEY_SECRET, DEFAULT_BATCH_WAVE_SIZE,
    DEFAULT_DEDUP_WINDOW_SECS, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_QUOTA_WAIT_INTERVAL_MS,
};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::secrets::SecretStore;
use crate::store::{JobPage, JobQuery, MetadataStore, StoreError};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const CANCEL_RETRIES: usize = 3;
const FALLBACK_FILE_NAME: &str = "document";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("quota exceeded: {inflight} of {limit} slots in use, {requested} requested")]
    QuotaExceeded {
        inflight: u32,
        limit: u32,
        requested: u32,
    },
    #[error("document {0} not found")]
    JobNotFound(JobId),
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),
    #[error("document {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },
    #[error("document {id} cannot be deleted yet: {reason}")]
    InUse { id: JobId, reason: String },
    #[error("document {job_id} could not be submitted: {reason}")]
    SubmissionFailed { job_id: JobId, reason: String },
    #[error("download failed: {0}")]
    Download(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub job: JobRecord,
    /// The job already existed and was returned instead of a new one
    pub deduplicated: bool,
}

/// Addressable reference to a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub job_id: JobId,
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub batch_id: BatchId,
    pub file_count: usize,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DependencyHealth {
    fn from_result<E: core::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                detail: None,
            },
            Err(e) => Self {
                healthy: false,
                detail: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

/// Injected collaborators.
pub struct ServiceComponents {
    pub store: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub analysis: Arc<dyn AnalysisService>,
    /// Checked by `health` when present
    pub secrets: Option<Arc<dyn SecretStore>>,
    pub extractor: Option<Arc<dyn FieldExtractor>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub analyzer_id: String,
    pub key_secret_name: String,
    pub quota_default_limit: u32,
    pub dedup_window: Option<Duration>,
    pub backoff: BackoffPolicy,
    pub quota_wait_interval: Duration,
    pub batch_wave_size: usize,
    pub max_upload_bytes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            analyzer_id: DEFAULT_ANALYZER_ID.to_string(),
            key_secret_name: DEFAULT_ANALYZER_KEY_SECRET.to_string(),
            quota_default_limit: DEFAULT_QUOTA_LIMIT,
            dedup_window: Some(Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS)),
            backoff: BackoffPolicy::default(),
            quota_wait_interval: Duration::from_millis(DEFAULT_QUOTA_WAIT_INTERVAL_MS),
            batch_wave_size: DEFAULT_BATCH_WAVE_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            analyzer_id: config.analyzer.analyzer_id.clone(),
            key_secret_name: config.analyzer.key_secret_name.clone(),
            quota_default_limit: config.quota_default_limit,
            dedup_window: config.dedup_window,
            backoff: config.backoff.clone(),
            quota_wait_interval: config.quota_wait_interval,
            batch_wave_size: config.batch_wave_size,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    secrets: Option<Arc<dyn SecretStore>>,
    quota: Arc<QuotaController>,
    dedup: DeduplicationIndex,
    dispatcher: BatchDispatcher,
    orchestrator: Arc<JobOrchestrator>,
    http: reqwest::Client,
    settings: Arc<ServiceSettings>,
}

impl core::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DocumentService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DocumentService {
    pub fn new(components: ServiceComponents, settings: ServiceSettings) -> Self {
        let ServiceComponents {
            store,
            objects,
            analysis,
            secrets,
            extractor,
        } = components;

        let quota = Arc::new(QuotaController::new(
            Arc::clone(&store),
            settings.quota_default_limit,
        ));
        let mut orchestrator = JobOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&objects),
            analysis,
            Arc::clone(&quota),
            OrchestratorConfig {
                backoff: settings.backoff.clone(),
                quota_wait_interval: settings.quota_wait_interval,
            },
        );
        if let Some(extractor) = extractor {
            orchestrator = orchestrator.with_extractor(extractor);
        }

        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "download client builder failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            dedup: DeduplicationIndex::new(Arc::clone(&store), settings.dedup_window),
            dispatcher: BatchDispatcher::new(
                Arc::clone(&store),
                Arc::clone(&objects),
                settings.analyzer_id.clone(),
                settings.batch_wave_size,
            ),
            orchestrator: Arc::new(orchestrator),
            store,
            objects,
            secrets,
            quota,
            http,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    /// Accept one document: deduplicate, take a quota slot, store, submit, and
    /// hand the job to a background orchestration task.
    #[instrument(skip(self, bytes), fields(tenant_id = %tenant_id, size = bytes.len()))]
    pub async fn submit_document(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<SubmissionReceipt, IntakeError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(IntakeError::Validation("file name is required".to_string()));
        }
        if bytes.is_empty() {
            return Err(IntakeError::Validation("file is empty".to_string()));
        }

        let content_hash = ContentHash::of(&bytes);
        if let Some(existing) = self.dedup.find_recent(tenant_id, &content_hash).await? {
            info!(job_id = %existing.id, "duplicate submission, returning existing job");
            return Ok(SubmissionReceipt {
                job: existing,
                deduplicated: true,
            });
        }

        let decision = self.quota.try_acquire(tenant_id).await?;
        if !decision.granted {
            warn!(inflight = decision.inflight, limit = decision.limit, "quota exceeded");
            return Err(IntakeError::QuotaExceeded {
                inflight: decision.inflight,
                limit: decision.limit,
                requested: 1,
            });
        }
        let slot = SlotGuard::new(Arc::clone(&self.quota), tenant_id.clone());

        let mut job = JobRecord::new(NewJob {
            tenant_id: tenant_id.clone(),
            user_id: user_id.clone(),
            file_name: file_name.to_string(),
            content_hash,
            analyzer_id: self.settings.analyzer_id.clone(),
            batch_id: None,
        });
        job.set_quota_held(true);

        self.objects.put(&job.object_key, bytes).await?;
        if let Err(e) = self.store.create_job(&job).await {
            if let Err(cleanup) = self.objects.delete(&job.object_key).await {
                warn!(object_key = %job.object_key, error = %cleanup, "orphaned object left behind");
            }
            return Err(e.into());
        }
        info!(job_id = %job.id, "job created");

        if let Err(e) = self.orchestrator.submit(&mut job).await {
            error!(job_id = %job.id, error = %e, "submission step failed");
        }

        if job.status == JobStatus::Failed {
            let reason = job.error.clone().unwrap_or_default();
            match slot.release().await {
                Ok(_) => {
                    job.set_quota_held(false);
                    if let Err(e) = self.store.update_job(&mut job).await {
                        warn!(job_id = %job.id, error = %e, "failed to record quota release");
                    }
                }
                Err(e) => error!(job_id = %job.id, error = %e, "quota release failed"),
            }
            return Err(IntakeError::SubmissionFailed {
                job_id: job.id,
                reason,
            });
        }

        slot.disarm();
        self.orchestrator.spawn(job.clone());
        Ok(SubmissionReceipt {
            job,
            deduplicated: false,
        })
    }

    /// Download a document over HTTP(S) and submit it.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn submit_from_url(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        file_url: &str,
        file_name: Option<&str>,
    ) -> Result<SubmissionReceipt, IntakeError> {
        let url = reqwest::Url::parse(file_url)
            .map_err(|e| IntakeError::Validation(format!("invalid fileUrl: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IntakeError::Validation(format!(
                "unsupported fileUrl scheme '{}'",
                url.scheme()
            )));
        }

        let file_name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| file_name_from_url(&url));

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IntakeError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IntakeError::Download(format!(
                "source answered {}",
                response.status()
            )));
        }
        let limit = self.settings.max_upload_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(IntakeError::Validation(format!(
                "file exceeds {limit} bytes"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IntakeError::Download(e.to_string()))?;
        if bytes.len() > limit {
            return Err(IntakeError::Validation(format!(
                "file exceeds {limit} bytes"
            )));
        }

        self.submit_document(tenant_id, user_id, &file_name, bytes)
            .await
    }

    /// Record a batch and dispatch it in the background.
    ///
    /// Fails with `QuotaExceeded` if the tenant's current headroom is smaller
    /// than the number of files. Created jobs each wait for their own slot.
    #[instrument(skip(self, files), fields(tenant_id = %tenant_id, files = files.len()))]
    pub async fn submit_batch(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        files: Vec<BatchFile>,
    ) -> Result<BatchReceipt, IntakeError> {
        if files.is_empty() {
            return Err(IntakeError::Validation("no files provided".to_string()));
        }

        let requested = u32::try_from(files.len()).unwrap_or(u32::MAX);
        let state = self.quota.get_state(tenant_id).await?;
        if !state.can_admit(requested) {
            warn!(
                inflight = state.inflight(),
                limit = state.limit(),
                requested,
                "batch exceeds quota headroom"
            );
            return Err(IntakeError::QuotaExceeded {
                inflight: state.inflight(),
                limit: state.limit(),
                requested,
            });
        }

        let batch = BatchRecord::new(tenant_id.clone(), user_id.clone(), files.len());
        self.store.save_batch(&batch).await?;
        info!(batch_id = %batch.id, "batch accepted");

        let receipt = BatchReceipt {
            batch_id: batch.id,
            file_count: batch.file_count,
            status: batch.status,
        };
        let service = self.clone();
        tokio::spawn(async move { service.run_batch(batch, files).await });
        Ok(receipt)
    }

    async fn run_batch(&self, mut batch: BatchRecord, files: Vec<BatchFile>) {
        let dispatch = self
            .dispatcher
            .dispatch(&batch.tenant_id, &batch.user_id, batch.id, files)
            .await;
        batch.complete(dispatch.outcomes);
        if let Err(e) = self.store.save_batch(&batch).await {
            error!(batch_id = %batch.id, error = %e, "failed to record batch outcomes");
        }
        info!(
            batch_id = %batch.id,
            submitted = batch.submitted_count(),
            failed = batch.failed_count(),
            "batch dispatched, starting orchestration"
        );
        for job in dispatch.jobs {
            self.orchestrator.spawn(job);
        }
    }

    pub async fn get_job(&self, tenant_id: &TenantId, job_id: JobId) -> Result<JobRecord, IntakeError> {
        match self.store.get_job(tenant_id, job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) | Err(StoreError::TenantIsolation) => Err(IntakeError::JobNotFound(job_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_jobs(&self, tenant_id: &TenantId, query: &JobQuery) -> Result<JobPage, IntakeError> {
        Ok(self.store.list_jobs(tenant_id, query).await?)
    }

    pub async fn get_batch(&self, tenant_id: &TenantId, batch_id: BatchId) -> Result<BatchRecord, IntakeError> {
        match self.store.get_batch(tenant_id, batch_id).await {
            Ok(Some(batch)) => Ok(batch),
            Ok(None) | Err(StoreError::TenantIsolation) => Err(IntakeError::BatchNotFound(batch_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn download_url(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<DocumentLink, IntakeError> {
        let job = self.get_job(tenant_id, job_id).await?;
        let url = self.objects.url(&job.object_key)?;
        Ok(DocumentLink {
            job_id,
            file_name: job.file_name,
            url,
        })
    }

    /// Stored bytes of the uploaded document, with its file name.
    pub async fn download(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<(String, Bytes), IntakeError> {
        let job = self.get_job(tenant_id, job_id).await?;
        let bytes = self.objects.get(&job.object_key).await?;
        Ok((job.file_name, bytes))
    }

    /// Remove a finished job's record and its stored document.
    ///
    /// Jobs still being analyzed, or still holding a quota slot, are refused.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    pub async fn delete_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<(), IntakeError> {
        let job = self.get_job(tenant_id, job_id).await?;
        if !job.status.is_terminal() {
            return Err(IntakeError::InUse {
                id: job_id,
                reason: format!("analysis is {}", job.status),
            });
        }
        if job.progress.quota_held || self.orchestrator.is_active(job_id) {
            return Err(IntakeError::InUse {
                id: job_id,
                reason: "quota slot not yet released".to_string(),
            });
        }

        self.objects.delete(&job.object_key).await?;
        if !self.store.delete_job(tenant_id, job_id).await? {
            return Err(IntakeError::JobNotFound(job_id));
        }
        info!(object_key = %job.object_key, "document deleted");
        Ok(())
    }

    /// Set the cancel flag; the orchestration task acts on it at its next step.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    pub async fn cancel_job(&self, tenant_id: &TenantId, job_id: JobId) -> Result<JobRecord, IntakeError> {
        let mut attempt = 0;
        loop {
            let mut job = self.get_job(tenant_id, job_id).await?;
            match job.request_cancel() {
                Ok(()) => {}
                Err(TransitionError::Terminal(status)) => {
                    return Err(IntakeError::AlreadyTerminal { id: job_id, status });
                }
                Err(e) => return Err(IntakeError::Validation(e.to_string())),
            }
            match self.store.update_job(&mut job).await {
                Ok(()) => {
                    info!("cancel requested");
                    return Ok(job);
                }
                Err(StoreError::Conflict { .. }) if attempt + 1 < CANCEL_RETRIES => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn quota_state(&self, tenant_id: &TenantId) -> Result<QuotaState, IntakeError> {
        Ok(self.quota.get_state(tenant_id).await?)
    }

    pub async fn set_quota_limit(&self, tenant_id: &TenantId, limit: u32) -> Result<QuotaState, IntakeError> {
        let state = self.quota.set_limit(tenant_id, limit).await?;
        info!(tenant_id = %tenant_id, limit, inflight = state.inflight(), "quota limit updated");
        Ok(state)
    }

    /// Resume every unfinished job. Call once at startup.
    pub async fn recover(&self) -> Result<usize, IntakeError> {
        Ok(self.orchestrator.recover().await?)
    }

    pub async fn health(&self) -> HealthReport {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(
            "metadataStore".to_string(),
            DependencyHealth::from_result(self.store.ping().await),
        );
        dependencies.insert(
            "objectStore".to_string(),
            DependencyHealth::from_result(self.objects.ping().await),
        );
        if let Some(secrets) = &self.secrets {
            let result = secrets
                .get_secret(&self.settings.key_secret_name)
                .await
                .map(|_| ());
            dependencies.insert("secretStore".to_string(), DependencyHealth::from_result(result));
        }
        HealthReport {
            healthy: dependencies.values().all(|d| d.healthy),
            dependencies,
        }
    }
}

fn file_name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::analysis::SimulatedAnalysisService;
    use crate::jobs::test_support::{tenant, user};
    use crate::object_store::InMemoryObjectStore;
    use crate::secrets::StaticSecretStore;
    use crate::store::InMemoryMetadataStore;

    struct Fixture {
        service: DocumentService,
        store: Arc<InMemoryMetadataStore>,
        objects: Arc<InMemoryObjectStore>,
        analysis: Arc<SimulatedAnalysisService>,
    }

    fn fixture_with(analysis: SimulatedAnalysisService, settings: ServiceSettings) -> Fixture {
        let store = Arc::new(InMemoryMetadataStore::new());
        let objects = Arc::new(InMemoryObjectStore::default());
        let analysis = Arc::new(analysis);
        let service = DocumentService::new(
            ServiceComponents {
                store: store.clone(),
                objects: objects.clone(),
                analysis: analysis.clone(),
                secrets: Some(Arc::new(
                    StaticSecretStore::new().with_secret("ANALYZER-KEY", "k"),
                )),
                extractor: None,
            },
            settings,
        );
        Fixture {
            service,
            store,
            objects,
            analysis,
        }
    }

    fn fixture(analysis: SimulatedAnalysisService) -> Fixture {
        fixture_with(analysis, ServiceSettings::default())
    }

    async fn settle(service: &DocumentService) {
        for _ in 0..1_000 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if service.orchestrator().active_count() == 0 {
                return;
            }
        }
        panic!("orchestrations did not settle");
    }

    #[tokio::test(start_paused = true)]
    async fn single_submission_runs_to_success() {
        let f = fixture(SimulatedAnalysisService::new().with_running_polls(2));
        let t = tenant("t1");

        let receipt = f
            .service
            .submit_document(&t, &user(), "receipt.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(!receipt.deduplicated);
        assert_eq!(receipt.job.status, JobStatus::Running);
        assert!(f.objects.contains(&receipt.job.object_key));

        settle(&f.service).await;
        let job = f.service.get_job(&t, receipt.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.extracted_fields.is_some());
        assert_eq!(f.service.quota_state(&t).await.unwrap().inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_content_is_deduplicated() {
        let f = fixture(SimulatedAnalysisService::new().with_running_polls(5));
        let t = tenant("t1");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let r = f
                .service
                .submit_document(&t, &user(), "same.pdf", Bytes::from_static(b"same bytes"))
                .await
                .unwrap();
            ids.push((r.job.id, r.deduplicated));
        }
        assert_eq!(ids[0].0, ids[1].0);
        assert_eq!(ids[0].0, ids[2].0);
        assert_eq!(
            ids.iter().map(|(_, d)| *d).collect::<Vec<_>>(),
            vec![false, true, true]
        );
        assert_eq!(f.analysis.submission_count(), 1);

        // a different tenant gets its own job
        let other = f
            .service
            .submit_document(&tenant("t2"), &user(), "same.pdf", Bytes::from_static(b"same bytes"))
            .await
            .unwrap();
        assert!(!other.deduplicated);
        assert_ne!(other.job.id, ids[0].0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_window_creates_new_jobs() {
        let settings = ServiceSettings {
            dedup_window: None,
            ..ServiceSettings::default()
        };
        let f = fixture_with(SimulatedAnalysisService::new(), settings);
        let t = tenant("t1");
        let a = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let b = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_ne!(a.job.id, b.job.id);
        assert!(!b.deduplicated);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_denial_creates_no_record() {
        let settings = ServiceSettings {
            quota_default_limit: 1,
            ..ServiceSettings::default()
        };
        let f = fixture_with(SimulatedAnalysisService::new().with_running_polls(3), settings);
        let t = tenant("t1");

        f.service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let err = f
            .service
            .submit_document(&t, &user(), "b.pdf", Bytes::from_static(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::QuotaExceeded {
                inflight: 1,
                limit: 1,
                requested: 1
            }
        ));
        let page = f.service.list_jobs(&t, &JobQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);

        settle(&f.service).await;
        f.service
            .submit_document(&t, &user(), "b.pdf", Bytes::from_static(b"two"))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failure_is_recorded_and_releases_quota() {
        let f = fixture(SimulatedAnalysisService::new().rejecting_submissions());
        let t = tenant("t1");

        let err = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        let IntakeError::SubmissionFailed { job_id, reason } = err else {
            panic!("expected submission failure, got {err:?}");
        };
        assert!(reason.starts_with("failed to start analysis:"));

        let job = f.service.get_job(&t, job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.progress.quota_held);
        assert_eq!(f.service.quota_state(&t).await.unwrap().inflight(), 0);
        assert_eq!(f.analysis.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_uploads_are_rejected() {
        let f = fixture(SimulatedAnalysisService::new());
        let t = tenant("t1");
        assert!(matches!(
            f.service
                .submit_document(&t, &user(), "a.pdf", Bytes::new())
                .await,
            Err(IntakeError::Validation(_))
        ));
        assert!(matches!(
            f.service
                .submit_document(&t, &user(), "  ", Bytes::from_static(b"x"))
                .await,
            Err(IntakeError::Validation(_))
        ));
        assert!(f.objects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_creates_jobs_and_runs_them() {
        let f = fixture(SimulatedAnalysisService::new().with_running_polls(1));
        let t = tenant("t1");
        let files = (0..7)
            .map(|i| BatchFile::new(format!("f{i}.pdf"), format!("content {i}").into_bytes()))
            .collect();

        let receipt = f.service.submit_batch(&t, &user(), files).await.unwrap();
        assert_eq!(receipt.file_count, 7);
        assert_eq!(receipt.status, BatchStatus::Processing);

        settle(&f.service).await;
        let batch = f.service.get_batch(&t, receipt.batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.outcomes.len(), 7);
        assert_eq!(batch.submitted_count(), 7);

        let page = f
            .service
            .list_jobs(&t, &JobQuery::new(Some(JobStatus::Succeeded), None, None))
            .await
            .unwrap();
        assert_eq!(page.total, 7);
        assert!(page.jobs.iter().all(|j| j.batch_id == Some(receipt.batch_id)));
        assert_eq!(f.service.quota_state(&t).await.unwrap().inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_headroom() {
        let settings = ServiceSettings {
            quota_default_limit: 2,
            ..ServiceSettings::default()
        };
        let f = fixture_with(SimulatedAnalysisService::new(), settings);
        let t = tenant("t1");
        let files: Vec<BatchFile> = (0..3)
            .map(|i| BatchFile::new(format!("f{i}.pdf"), vec![i as u8 + 1]))
            .collect();

        assert!(matches!(
            f.service.submit_batch(&t, &user(), files).await,
            Err(IntakeError::QuotaExceeded {
                inflight: 0,
                limit: 2,
                requested: 3
            })
        ));
        assert!(matches!(
            f.service.submit_batch(&t, &user(), Vec::new()).await,
            Err(IntakeError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_jobs_wait_for_slots_beyond_the_limit() {
        let settings = ServiceSettings {
            quota_default_limit: 3,
            ..ServiceSettings::default()
        };
        let f = fixture_with(SimulatedAnalysisService::new().with_running_polls(3), settings);
        let t = tenant("t1");
        let files: Vec<BatchFile> = (0..3)
            .map(|i| BatchFile::new(format!("f{i}.pdf"), vec![i as u8 + 1]))
            .collect();
        f.service.submit_batch(&t, &user(), files).await.unwrap();
        // admitted against the old limit; jobs now queue for the single slot
        f.service.set_quota_limit(&t, 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let state = f.service.quota_state(&t).await.unwrap();
        assert_eq!(state.inflight(), 1);
        assert_eq!(f.analysis.submission_count(), 1);

        settle(&f.service).await;
        let page = f
            .service
            .list_jobs(&t, &JobQuery::new(Some(JobStatus::Succeeded), None, None))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(f.service.quota_state(&t).await.unwrap().inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_a_running_job_and_refuses_terminal_ones() {
        let f = fixture(SimulatedAnalysisService::new().with_running_polls(100));
        let t = tenant("t1");
        let receipt = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let flagged = f.service.cancel_job(&t, receipt.job.id).await.unwrap();
        assert!(flagged.cancel_requested);

        settle(&f.service).await;
        let job = f.service.get_job(&t, receipt.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert_eq!(f.service.quota_state(&t).await.unwrap().inflight(), 0);

        assert!(matches!(
            f.service.cancel_job(&t, receipt.job.id).await,
            Err(IntakeError::AlreadyTerminal {
                status: JobStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn download_returns_stored_document() {
        let f = fixture(SimulatedAnalysisService::new());
        let t = tenant("t1");
        let receipt = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let link = f.service.download_url(&t, receipt.job.id).await.unwrap();
        assert_eq!(link.file_name, "a.pdf");
        assert!(link.url.ends_with(&receipt.job.object_key), "{}", link.url);

        let (name, bytes) = f.service.download(&t, receipt.job.id).await.unwrap();
        assert_eq!(name, "a.pdf");
        assert_eq!(bytes, Bytes::from_static(b"abc"));

        assert!(matches!(
            f.service.download_url(&tenant("t2"), receipt.job.id).await,
            Err(IntakeError::JobNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_refuses_running_jobs_and_removes_finished_ones() {
        let f = fixture(SimulatedAnalysisService::new().with_running_polls(3));
        let t = tenant("t1");
        let receipt = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let id = receipt.job.id;

        assert!(matches!(
            f.service.delete_job(&t, id).await,
            Err(IntakeError::InUse { .. })
        ));

        settle(&f.service).await;
        assert!(matches!(
            f.service.delete_job(&tenant("t2"), id).await,
            Err(IntakeError::JobNotFound(_))
        ));
        f.service.delete_job(&t, id).await.unwrap();

        assert!(!f.objects.contains(&receipt.job.object_key));
        assert!(matches!(
            f.service.get_job(&t, id).await,
            Err(IntakeError::JobNotFound(_))
        ));
        assert!(matches!(
            f.service.delete_job(&t, id).await,
            Err(IntakeError::JobNotFound(_))
        ));

        // same content is a fresh submission once the old job is gone
        let again = f
            .service
            .submit_document(&t, &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(!again.deduplicated);
    }

    #[tokio::test(start_paused = true)]
    async fn other_tenants_cannot_see_jobs() {
        let f = fixture(SimulatedAnalysisService::new());
        let receipt = f
            .service
            .submit_document(&tenant("t1"), &user(), "a.pdf", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(matches!(
            f.service.get_job(&tenant("t2"), receipt.job.id).await,
            Err(IntakeError::JobNotFound(_))
        ));
        assert!(matches!(
            f.service.get_batch(&tenant("t1"), BatchId::new()).await,
            Err(IntakeError::BatchNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recover_resumes_unfinished_jobs() {
        let f = fixture(SimulatedAnalysisService::new());
        let t = tenant("t1");
        let job = JobRecord::new(NewJob {
            tenant_id: t.clone(),
            user_id: user(),
            file_name: "left-behind.pdf".to_string(),
            content_hash: ContentHash::of(b"left"),
            analyzer_id: "prebuilt-receipt".to_string(),
            batch_id: None,
        });
        f.objects.put(&job.object_key, Bytes::from_static(b"left")).await.unwrap();
        f.store.create_job(&job).await.unwrap();

        assert_eq!(f.service.recover().await.unwrap(), 1);
        settle(&f.service).await;
        assert_eq!(
            f.service.get_job(&t, job.id).await.unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn health_reports_each_dependency() {
        let f = fixture(SimulatedAnalysisService::new());
        let report = f.service.health().await;
        assert!(report.healthy);
        assert_eq!(report.dependencies.len(), 3);

        let g = DocumentService::new(
            ServiceComponents {
                store: Arc::new(InMemoryMetadataStore::new()),
                objects: Arc::new(InMemoryObjectStore::default()),
                analysis: Arc::new(SimulatedAnalysisService::new()),
                secrets: Some(Arc::new(StaticSecretStore::new())),
                extractor: None,
            },
            ServiceSettings::default(),
        );
        let report = g.health().await;
        assert!(!report.healthy);
        assert!(!report.dependencies["secretStore"].healthy);
        assert!(report.dependencies["metadataStore"].healthy);
    }

    #[tokio::test]
    async fn url_intake_downloads_and_enforces_size() {
        use axum::routing::get;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = axum::Router::new()
            .route("/files/scan.pdf", get(|| async { "pdf bytes" }))
            .route("/files/huge.pdf", get(|| async { "x".repeat(64) }));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let settings = ServiceSettings {
            max_upload_bytes: 32,
            ..ServiceSettings::default()
        };
        let f = fixture_with(SimulatedAnalysisService::new(), settings);
        let t = tenant("t1");

        let receipt = f
            .service
            .submit_from_url(&t, &user(), &format!("{base}/files/scan.pdf"), None)
            .await
            .unwrap();
        assert_eq!(receipt.job.file_name, "scan.pdf");
        assert_eq!(
            f.objects.get(&receipt.job.object_key).await.unwrap(),
            Bytes::from_static(b"pdf bytes")
        );

        assert!(matches!(
            f.service
                .submit_from_url(&t, &user(), &format!("{base}/files/huge.pdf"), None)
                .await,
            Err(IntakeError::Validation(_))
        ));
        assert!(matches!(
            f.service
                .submit_from_url(&t, &user(), &format!("{base}/missing"), Some("m.pdf"))
                .await,
            Err(IntakeError::Download(_))
        ));
        assert!(matches!(
            f.service
                .submit_from_url(&t, &user(), "ftp://example.com/a.pdf", None)
                .await,
            Err(IntakeError::Validation(_))
        ));
        server.abort();
    }

    #[test]
    fn url_file_names_fall_back() {
        let url = reqwest::Url::parse("https://example.com/").unwrap();
        assert_eq!(file_name_from_url(&url), "document");
        let url = reqwest::Url::parse("https://example.com/a/b/invoice.png?x=1").unwrap();
        assert_eq!(file_name_from_url(&url), "invoice.png");
    }
}
