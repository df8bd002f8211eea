//! Per-job orchestration: quota, submission, polling, terminal persistence.
//!
//! ```text
//! Submitted ──submit ok──▶ Running ──succeeded──▶ Succeeded
//!     │                       ├──────failed─────▶ Failed
//!     │                       └──poll budget────▶ TimedOut
//!     └──submit failed / cancelled──▶ Failed
//! ```
//!
//! Progress is written to the job record after every step, so a job picked up
//! by `recover` continues from its last persisted attempt count and interval.
//! The quota slot a job holds is released on every exit path; if the task is
//! aborted or panics, a drop guard hands the release to the runtime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use docintel_core::{JobId, TenantId};
use docintel_documents::{BackoffPolicy, JobRecord, JobStatus, TransitionError};

use super::poller::{PollOutcome, StatusPoller};
use super::quota::{QuotaController, QuotaError};
use crate::analysis::AnalysisService;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::store::{MetadataStore, StoreError};

/// Attempts to merge a concurrent cancel flag before giving up on a write.
const MAX_MERGE_ATTEMPTS: usize = 3;

/// Consecutive quota controller errors tolerated while waiting for a slot.
const MAX_QUOTA_ERRORS: u32 = 5;

pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error("job {0} disappeared from the store")]
    Missing(JobId),
}

/// Turns a raw analysis result into extracted fields.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, result: &Value) -> Option<Value>;
}

/// Copies `analyzeResult.documents[0].fields` verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFieldsExtractor;

impl FieldExtractor for RawFieldsExtractor {
    fn extract(&self, result: &Value) -> Option<Value> {
        result.pointer("/analyzeResult/documents/0/fields").cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub backoff: BackoffPolicy,
    /// Pause between quota attempts for jobs waiting on a slot
    pub quota_wait_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            quota_wait_interval: Duration::from_secs(2),
        }
    }
}

/// A quota slot held on behalf of one job.
///
/// Dropping an armed guard releases the slot from a spawned task.
pub(crate) struct SlotGuard {
    quota: Arc<QuotaController>,
    tenant_id: TenantId,
    armed: bool,
}

impl SlotGuard {
    pub(crate) fn new(quota: Arc<QuotaController>, tenant_id: TenantId) -> Self {
        Self {
            quota,
            tenant_id,
            armed: true,
        }
    }

    /// Release now and report the outcome.
    pub(crate) async fn release(mut self) -> Result<u32, QuotaError> {
        self.armed = false;
        self.quota.release(&self.tenant_id).await
    }

    /// Hand responsibility for the slot to someone else (an orchestration task).
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let quota = Arc::clone(&self.quota);
        let tenant_id = self.tenant_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = quota.release(&tenant_id).await {
                        error!(tenant_id = %tenant_id, error = %e, "deferred quota release failed");
                    }
                });
            }
            Err(_) => {
                error!(tenant_id = %tenant_id, "quota slot dropped outside a runtime; slot leaked");
            }
        }
    }
}

/// Removes a job from the active registry when its task ends.
struct ActiveEntry {
    orchestrator: Arc<JobOrchestrator>,
    job_id: JobId,
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        if let Ok(mut active) = self.orchestrator.active.lock() {
            active.remove(&self.job_id);
        }
    }
}

pub struct JobOrchestrator {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisService>,
    poller: StatusPoller,
    quota: Arc<QuotaController>,
    extractor: Arc<dyn FieldExtractor>,
    config: OrchestratorConfig,
    active: Mutex<HashSet<JobId>>,
}

impl core::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
        quota: Arc<QuotaController>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            objects,
            poller: StatusPoller::new(Arc::clone(&analysis)),
            analysis,
            quota,
            extractor: Arc::new(RawFieldsExtractor),
            config,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(&job_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Start an orchestration task for `job`.
    ///
    /// Returns `None` if an orchestration for this job id is already running in
    /// this process.
    pub fn spawn(self: &Arc<Self>, job: JobRecord) -> Option<JoinHandle<()>> {
        {
            let mut active = self.active.lock().ok()?;
            if !active.insert(job.id) {
                debug!(job_id = %job.id, "orchestration already active");
                return None;
            }
        }
        let entry = ActiveEntry {
            orchestrator: Arc::clone(self),
            job_id: job.id,
        };
        Some(tokio::spawn(async move {
            let orchestrator = Arc::clone(&entry.orchestrator);
            let job_id = job.id;
            match orchestrator.run(job).await {
                Ok(done) => debug!(job_id = %job_id, status = %done.status, "orchestration finished"),
                Err(e) => error!(job_id = %job_id, error = %e, "orchestration aborted"),
            }
            drop(entry);
        }))
    }

    /// Re-spawn every non-terminal job, and every finished job that still holds
    /// a quota slot. Returns how many tasks were started.
    #[instrument(skip(self), err)]
    pub async fn recover(self: &Arc<Self>) -> Result<usize, OrchestratorError> {
        let unfinished = self.store.list_unfinished().await?;
        let mut started = 0;
        for job in unfinished {
            info!(
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                status = %job.status,
                attempts = job.progress.attempts,
                "resuming job"
            );
            if self.spawn(job).is_some() {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Drive `job` to a terminal state and release its quota slot.
    ///
    /// Dependency failures, including an unavailable quota controller, end the
    /// job as `Failed` rather than propagating. Only a failure to persist that
    /// state is returned as an error.
    #[instrument(skip(self, job), fields(job_id = %job.id, tenant_id = %job.tenant_id))]
    pub async fn run(&self, job: JobRecord) -> Result<JobRecord, OrchestratorError> {
        let mut job = job;

        if job.status.is_terminal() {
            if job.progress.quota_held {
                let slot = SlotGuard::new(Arc::clone(&self.quota), job.tenant_id.clone());
                self.release_slot(&mut job, slot).await;
            }
            return Ok(job);
        }

        let slot = if job.progress.quota_held {
            SlotGuard::new(Arc::clone(&self.quota), job.tenant_id.clone())
        } else {
            match self.acquire_slot(&mut job).await {
                Ok(Some(slot)) => slot,
                Ok(None) => return Ok(job),
                Err(e) => {
                    error!(error = %e, "could not obtain a quota slot");
                    if !job.status.is_terminal() {
                        job.mark_failed(format!("quota unavailable: {e}"))?;
                    }
                    self.persist(&mut job).await?;
                    return Ok(job);
                }
            }
        };

        if let Err(e) = self.drive(&mut job).await {
            error!(error = %e, status = %job.status, "orchestration step failed");
            if !job.status.is_terminal() {
                if job.mark_failed(format!("orchestration error: {e}")).is_ok() {
                    if let Err(persist_err) = self.persist(&mut job).await {
                        error!(error = %persist_err, "failed to persist failure state");
                    }
                }
            }
        }

        self.release_slot(&mut job, slot).await;
        info!(status = %job.status, attempts = job.progress.attempts, "job finished");
        Ok(job)
    }

    /// Submission step, fenced on `Submitted` without an operation id.
    ///
    /// On success the job is `Running`; on failure it is `Failed` with a
    /// "failed to start analysis" reason. Either way the state is persisted.
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    pub async fn submit(&self, job: &mut JobRecord) -> Result<(), OrchestratorError> {
        if job.status != JobStatus::Submitted || job.external_operation_id.is_some() {
            return Ok(());
        }

        let submitted = match self.objects.url(&job.object_key) {
            Ok(url) => self.analysis.submit(&url).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match submitted {
            Ok(operation_id) => {
                info!(operation_id = %operation_id, "analysis started");
                job.mark_running(operation_id)?;
                job.progress.attempts = 0;
                job.progress.current_backoff_ms = millis(self.config.backoff.initial_interval);
            }
            Err(reason) => {
                warn!(error = %reason, "analysis submission failed");
                job.mark_failed(format!("failed to start analysis: {reason}"))?;
            }
        }
        self.persist(job).await?;
        Ok(())
    }

    async fn drive(&self, job: &mut JobRecord) -> Result<(), OrchestratorError> {
        if job.status == JobStatus::Submitted {
            if self.cancel_requested(job).await? {
                return self.finish_cancelled(job).await;
            }
            self.submit(job).await?;
        }

        let backoff = &self.config.backoff;
        while job.status == JobStatus::Running {
            if self.cancel_requested(job).await? {
                return self.finish_cancelled(job).await;
            }

            let Some(operation_id) = job.external_operation_id.clone() else {
                job.mark_failed("running job has no operation id")?;
                self.persist(job).await?;
                break;
            };

            match self.poller.poll(&operation_id).await {
                PollOutcome::Succeeded(result) => {
                    let fields = self.extractor.extract(&result);
                    job.mark_succeeded(result, fields)?;
                    self.persist(job).await?;
                }
                PollOutcome::Failed(reason) => {
                    job.mark_failed(reason)?;
                    self.persist(job).await?;
                }
                PollOutcome::Running { transient } => {
                    let attempts = job.progress.attempts.saturating_add(1);
                    let current = match job.progress.current_backoff_ms {
                        0 => backoff.initial_interval,
                        ms => Duration::from_millis(ms),
                    };
                    if backoff.is_exhausted(attempts) {
                        job.record_poll(attempts, millis(current))?;
                        job.mark_timed_out(format!(
                            "analysis still running after {attempts} polls"
                        ))?;
                        self.persist(job).await?;
                    } else {
                        let next = backoff.next_interval(current);
                        job.record_poll(attempts, millis(next))?;
                        self.persist(job).await?;
                        debug!(
                            attempt = attempts,
                            sleep_ms = millis(current),
                            transient = transient.as_deref(),
                            "analysis still running"
                        );
                        tokio::time::sleep(current).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait for a quota slot, re-checking the cancel flag between attempts.
    ///
    /// Returns `None` if the job was cancelled while waiting.
    async fn acquire_slot(&self, job: &mut JobRecord) -> Result<Option<SlotGuard>, OrchestratorError> {
        let mut waits: u32 = 0;
        let mut quota_errors: u32 = 0;
        loop {
            if self.cancel_requested(job).await? {
                self.finish_cancelled(job).await?;
                return Ok(None);
            }

            let decision = match self.quota.try_acquire(&job.tenant_id).await {
                Ok(decision) => decision,
                Err(e) if quota_errors + 1 < MAX_QUOTA_ERRORS => {
                    quota_errors += 1;
                    warn!(error = %e, quota_errors, "quota controller unavailable, retrying");
                    tokio::time::sleep(self.config.quota_wait_interval).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            quota_errors = 0;
            if decision.granted {
                let slot = SlotGuard::new(Arc::clone(&self.quota), job.tenant_id.clone());
                job.set_quota_held(true);
                self.persist(job).await?;
                if waits > 0 {
                    debug!(waits, "quota slot granted after waiting");
                }
                return Ok(Some(slot));
            }

            if waits == 0 {
                info!(
                    inflight = decision.inflight,
                    limit = decision.limit,
                    "waiting for quota slot"
                );
            }
            waits = waits.saturating_add(1);
            tokio::time::sleep(self.config.quota_wait_interval).await;
        }
    }

    /// Release the slot, then record that the job no longer holds one.
    async fn release_slot(&self, job: &mut JobRecord, slot: SlotGuard) {
        match slot.release().await {
            Ok(inflight) => {
                debug!(inflight, "quota slot released");
                job.set_quota_held(false);
                if let Err(e) = self.persist(job).await {
                    warn!(error = %e, "failed to record quota release on job");
                }
            }
            Err(e) => {
                error!(error = %e, "quota release failed; job keeps quota_held");
            }
        }
    }

    async fn cancel_requested(&self, job: &mut JobRecord) -> Result<bool, OrchestratorError> {
        if job.cancel_requested {
            return Ok(true);
        }
        let stored = self
            .store
            .get_job(&job.tenant_id, job.id)
            .await?
            .ok_or(OrchestratorError::Missing(job.id))?;
        if stored.cancel_requested {
            job.cancel_requested = true;
        }
        Ok(job.cancel_requested)
    }

    async fn finish_cancelled(&self, job: &mut JobRecord) -> Result<(), OrchestratorError> {
        info!("job cancelled");
        job.mark_failed(CANCELLED_REASON)?;
        self.persist(job).await?;
        Ok(())
    }

    /// Write `job`, merging a concurrently set cancel flag on version conflicts.
    async fn persist(&self, job: &mut JobRecord) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            match self.store.update_job(job).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict { .. }) if attempt + 1 < MAX_MERGE_ATTEMPTS => {
                    attempt += 1;
                    let stored = self
                        .store
                        .get_job(&job.tenant_id, job.id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(job.id.to_string()))?;
                    job.cancel_requested |= stored.cancel_requested;
                    job.version = stored.version;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
