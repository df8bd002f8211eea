//! Job record and its lifecycle state machine.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docintel_core::{BatchId, ContentHash, DomainError, JobId, TenantId, UserId};

/// Job lifecycle status.
///
/// `Submitted → Running → {Succeeded | Failed | TimedOut}`, plus `Submitted → Failed`
/// when analysis could not be started or the job was cancelled before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record created, analysis not yet started
    Submitted,
    /// Analysis submitted, waiting for the external operation
    Running,
    /// Analysis finished and the result is persisted
    Succeeded,
    /// Analysis failed, could not be started, or was cancelled
    Failed,
    /// Poll budget exhausted while the operation was still running
    TimedOut,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Submitted,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::TimedOut,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "timed_out" | "timedout" => Ok(JobStatus::TimedOut),
            other => Err(DomainError::validation(format!(
                "unknown job status '{other}' (expected one of: submitted, running, succeeded, failed, timed_out)"
            ))),
        }
    }
}

/// Rejected state-machine transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },
    #[error("{0} is already set")]
    AlreadySet(&'static str),
    #[error("job is already terminal ({0})")]
    Terminal(JobStatus),
}

/// Orchestration progress persisted after every step.
///
/// A runner that picks the job up after a restart continues from these values
/// instead of from process memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationProgress {
    /// Poll attempts that came back `running` (or transiently failed)
    pub attempts: u32,
    /// Interval to sleep before the next poll
    pub current_backoff_ms: u64,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Whether this job currently holds a quota slot for its tenant
    pub quota_held: bool,
}

/// Input for creating a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub analyzer_id: String,
    pub batch_id: Option<BatchId>,
}

/// Durable representation of one analysis request.
///
/// Fields are public for reads and storage mapping; lifecycle changes go through
/// the `mark_*` methods, which enforce the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub file_name: String,
    /// Object-store key of the raw bytes (`{tenant}/{job}/{file}`)
    pub object_key: String,
    pub content_hash: ContentHash,
    pub analyzer_id: String,
    pub status: JobStatus,
    pub external_operation_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub extracted_fields: Option<serde_json::Value>,
    pub error: Option<String>,
    pub batch_id: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: OrchestrationProgress,
    pub cancel_requested: bool,
    /// Optimistic concurrency counter, bumped by the store on every update
    pub version: u64,
}

/// Build the object-store key for a job's raw bytes.
///
/// Path separators and control characters in the file name are replaced so the
/// key always has exactly three segments.
pub fn object_key(tenant_id: &TenantId, job_id: JobId, file_name: &str) -> String {
    let sanitized: String = file_name
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let sanitized = match sanitized.as_str() {
        "" | "." | ".." => "document".to_string(),
        _ => sanitized,
    };
    format!("{tenant_id}/{job_id}/{sanitized}")
}

impl JobRecord {
    /// Create a new record in `Submitted`.
    pub fn new(new: NewJob) -> Self {
        let id = JobId::new();
        let now = Utc::now();
        Self {
            id,
            object_key: object_key(&new.tenant_id, id, &new.file_name),
            tenant_id: new.tenant_id,
            user_id: new.user_id,
            file_name: new.file_name,
            content_hash: new.content_hash,
            analyzer_id: new.analyzer_id,
            status: JobStatus::Submitted,
            external_operation_id: None,
            result: None,
            extracted_fields: None,
            error: None,
            batch_id: new.batch_id,
            created_at: now,
            updated_at: now,
            progress: OrchestrationProgress::default(),
            cancel_requested: false,
            version: 0,
        }
    }

    /// Mark that the job holds (or no longer holds) a quota slot.
    pub fn set_quota_held(&mut self, held: bool) {
        self.progress.quota_held = held;
        self.updated_at = Utc::now();
    }

    /// Analysis was accepted by the external service.
    pub fn mark_running(&mut self, operation_id: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::Submitted, JobStatus::Running)?;
        if self.external_operation_id.is_some() {
            return Err(TransitionError::AlreadySet("external_operation_id"));
        }
        self.external_operation_id = Some(operation_id.into());
        self.status = JobStatus::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a poll that did not reach a terminal outcome.
    pub fn record_poll(&mut self, attempts: u32, next_backoff_ms: u64) -> Result<(), TransitionError> {
        if self.status != JobStatus::Running {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        let now = Utc::now();
        self.progress.attempts = attempts;
        self.progress.current_backoff_ms = next_backoff_ms;
        self.progress.last_polled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Analysis finished successfully.
    pub fn mark_succeeded(
        &mut self,
        result: serde_json::Value,
        extracted_fields: Option<serde_json::Value>,
    ) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::Running, JobStatus::Succeeded)?;
        self.ensure_outcome_unset()?;
        self.result = Some(result);
        self.extracted_fields = extracted_fields;
        self.status = JobStatus::Succeeded;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Analysis failed, could not be started, or was cancelled.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.ensure_outcome_unset()?;
        self.error = Some(reason.into());
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Poll budget exhausted while still running.
    pub fn mark_timed_out(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::Running, JobStatus::TimedOut)?;
        self.ensure_outcome_unset()?;
        self.error = Some(reason.into());
        self.status = JobStatus::TimedOut;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Ask the orchestrator to stop at its next resume point.
    pub fn request_cancel(&mut self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.cancel_requested = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if self.status != expected {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn ensure_outcome_unset(&self) -> Result<(), TransitionError> {
        if self.result.is_some() {
            return Err(TransitionError::AlreadySet("result"));
        }
        if self.error.is_some() {
            return Err(TransitionError::AlreadySet("error"));
        }
        Ok(())
    }
}
