//! Batch submissions: many files, one tenant, per-file outcomes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docintel_core::{BatchId, JobId, TenantId, UserId};

/// One file inside a batch upload.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub file_name: String,
    pub bytes: Bytes,
}

impl BatchFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Result of dispatching one file. A failed file never affects its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Submitted { job_id: JobId, file_name: String },
    Failed { file_name: String, error: String },
}

impl FileOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            FileOutcome::Submitted { file_name, .. } | FileOutcome::Failed { file_name, .. } => {
                file_name
            }
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            FileOutcome::Submitted { job_id, .. } => Some(*job_id),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waves are still being dispatched
    Processing,
    /// Every file has an outcome
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
        }
    }
}

/// Persisted batch summary, filled in once dispatch completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub file_count: usize,
    pub status: BatchStatus,
    pub outcomes: Vec<FileOutcome>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    pub fn new(tenant_id: TenantId, user_id: UserId, file_count: usize) -> Self {
        Self {
            id: BatchId::new(),
            tenant_id,
            user_id,
            file_count,
            status: BatchStatus::Processing,
            outcomes: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record the final per-file outcomes, in submission order.
    pub fn complete(&mut self, outcomes: Vec<FileOutcome>) {
        self.outcomes = outcomes;
        self.status = BatchStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn submitted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}
