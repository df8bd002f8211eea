//! Request/response bodies. JSON field names are camelCase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docintel_documents::{BatchRecord, BatchStatus, FileOutcome, JobRecord, JobStatus, QuotaState};
use docintel_infra::jobs::{
    BatchReceipt, DependencyHealth, DocumentLink, HealthReport, SubmissionReceipt,
};
use docintel_infra::store::JobPage;

// -------------------------
// Request DTOs
// -------------------------

/// JSON intake: the server downloads `fileUrl`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitUrlRequest {
    pub file_url: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub limit: u32,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub document_id: String,
    /// Analysis operation id, once submitted
    pub result_id: Option<String>,
    pub status: JobStatus,
    pub deduplicated: bool,
}

impl From<&SubmissionReceipt> for SubmitResponse {
    fn from(receipt: &SubmissionReceipt) -> Self {
        Self {
            document_id: receipt.job.id.to_string(),
            result_id: receipt.job.external_operation_id.clone(),
            status: receipt.job.status,
            deduplicated: receipt.deduplicated,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAcceptedResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub file_count: usize,
}

impl From<&BatchReceipt> for BatchAcceptedResponse {
    fn from(receipt: &BatchReceipt) -> Self {
        Self {
            batch_id: receipt.batch_id.to_string(),
            status: receipt.status,
            file_count: receipt.file_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub attempts: u32,
    pub current_backoff_ms: u64,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub quota_held: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub file_name: String,
    pub object_key: String,
    pub content_hash: String,
    pub analyzer_id: String,
    pub status: JobStatus,
    pub result_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub extracted_fields: Option<serde_json::Value>,
    pub error: Option<String>,
    pub batch_id: Option<String>,
    pub cancel_requested: bool,
    pub progress: ProgressResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for DocumentResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id.to_string(),
            tenant_id: job.tenant_id.to_string(),
            user_id: job.user_id.to_string(),
            file_name: job.file_name,
            object_key: job.object_key,
            content_hash: job.content_hash.to_string(),
            analyzer_id: job.analyzer_id,
            status: job.status,
            result_id: job.external_operation_id,
            result: job.result,
            extracted_fields: job.extracted_fields,
            error: job.error,
            batch_id: job.batch_id.map(|id| id.to_string()),
            cancel_requested: job.cancel_requested,
            progress: ProgressResponse {
                attempts: job.progress.attempts,
                current_backoff_ms: job.progress.current_backoff_ms,
                last_polled_at: job.progress.last_polled_at,
                quota_held: job.progress.quota_held,
            },
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub document_id: String,
    pub file_name: String,
    pub download_url: String,
}

impl From<DocumentLink> for DownloadResponse {
    fn from(link: DocumentLink) -> Self {
        Self {
            document_id: link.job_id.to_string(),
            file_name: link.file_name,
            download_url: link.url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub document_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl From<JobPage> for DocumentListResponse {
    fn from(page: JobPage) -> Self {
        let total_pages = page.total_pages();
        Self {
            documents: page.jobs.into_iter().map(DocumentResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcomeResponse {
    pub file_name: String,
    /// `submitted` or `failed`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FileOutcome> for FileOutcomeResponse {
    fn from(outcome: FileOutcome) -> Self {
        match outcome {
            FileOutcome::Submitted { job_id, file_name } => Self {
                file_name,
                status: "submitted",
                document_id: Some(job_id.to_string()),
                error: None,
            },
            FileOutcome::Failed { file_name, error } => Self {
                file_name,
                status: "failed",
                document_id: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub status: BatchStatus,
    pub file_count: usize,
    pub submitted: usize,
    pub failed: usize,
    pub outcomes: Vec<FileOutcomeResponse>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BatchRecord> for BatchResponse {
    fn from(batch: BatchRecord) -> Self {
        Self {
            batch_id: batch.id.to_string(),
            tenant_id: batch.tenant_id.to_string(),
            user_id: batch.user_id.to_string(),
            status: batch.status,
            file_count: batch.file_count,
            submitted: batch.submitted_count(),
            failed: batch.failed_count(),
            created_at: batch.created_at,
            completed_at: batch.completed_at,
            outcomes: batch.outcomes.into_iter().map(FileOutcomeResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub tenant_id: String,
    pub inflight: u32,
    pub limit: u32,
    pub available: u32,
}

impl QuotaResponse {
    pub fn new(tenant_id: &docintel_core::TenantId, state: QuotaState) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            inflight: state.inflight(),
            limit: state.limit(),
            available: state.headroom(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        Self {
            status: if report.healthy { "healthy" } else { "degraded" },
            timestamp: Utc::now(),
            dependencies: report.dependencies,
        }
    }
}
