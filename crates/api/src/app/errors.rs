use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use docintel_infra::jobs::{IntakeError, OrchestratorError, QuotaError};
use docintel_infra::object_store::ObjectStoreError;
use docintel_infra::store::StoreError;

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    match err {
        IntakeError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        e @ IntakeError::QuotaExceeded { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", e.to_string())
        }
        e @ IntakeError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        e @ IntakeError::BatchNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        e @ IntakeError::AlreadyTerminal { .. } => {
            json_error(StatusCode::CONFLICT, "already_terminal", e.to_string())
        }
        e @ IntakeError::InUse { .. } => json_error(StatusCode::CONFLICT, "in_use", e.to_string()),
        IntakeError::SubmissionFailed { job_id, reason } => {
            tracing::warn!(job_id = %job_id, reason = %reason, "submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({
                    "documentId": job_id.to_string(),
                    "status": "failed",
                    "error": reason,
                })),
            )
                .into_response()
        }
        IntakeError::Download(msg) => json_error(StatusCode::BAD_GATEWAY, "download_failed", msg),
        IntakeError::Store(e) => store_error_to_response(e),
        IntakeError::ObjectStore(ObjectStoreError::NotFound(key)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("stored document {key} not found"))
        }
        IntakeError::ObjectStore(e) => {
            tracing::error!(error = %e, "object store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "object_store_error", e.to_string())
        }
        IntakeError::Quota(QuotaError::Store(e)) => store_error_to_response(e),
        IntakeError::Quota(e) => {
            tracing::error!(error = %e, "quota controller error");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "quota_unavailable", e.to_string())
        }
        IntakeError::Orchestrator(OrchestratorError::Store(e)) => store_error_to_response(e),
        IntakeError::Orchestrator(e) => {
            tracing::error!(error = %e, "orchestrator error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "orchestrator_error", e.to_string())
        }
    }
}

fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::TenantIsolation => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        e @ StoreError::Conflict { .. } => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        e @ StoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        e => {
            tracing::error!(error = %e, "metadata store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
