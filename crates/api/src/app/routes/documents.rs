use std::sync::Arc;

use axum::{
    extract::{Extension, FromRequest, Multipart, Path, Query, Request},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::IntoResponse,
    Json,
};
use bytes::Bytes;

use docintel_core::{BatchId, JobId};
use docintel_documents::{BatchFile, JobStatus};
use docintel_infra::store::JobQuery;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

const FILE_FIELD: &str = "file";
const FALLBACK_FILE_NAME: &str = "document";

/// `POST /documents`: multipart upload (`file` field) or JSON `{fileUrl, fileName?}`.
pub async fn submit_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    req: Request,
) -> axum::response::Response {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let result = if content_type.starts_with("multipart/form-data") {
        let mut multipart = match Multipart::from_request(req, &()).await {
            Ok(m) => m,
            Err(rejection) => return rejection.into_response(),
        };
        let (file_name, bytes) = match read_file_field(&mut multipart).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "no file provided",
                );
            }
            Err(resp) => return resp,
        };
        services
            .documents
            .submit_document(tenant.tenant_id(), tenant.user_id(), &file_name, bytes)
            .await
    } else if content_type.starts_with("application/json") {
        let Json(body) = match Json::<dto::SubmitUrlRequest>::from_request(req, &()).await {
            Ok(body) => body,
            Err(rejection) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text());
            }
        };
        services
            .documents
            .submit_from_url(
                tenant.tenant_id(),
                tenant.user_id(),
                &body.file_url,
                body.file_name.as_deref(),
            )
            .await
    } else {
        return errors::json_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "expected multipart/form-data or application/json",
        );
    };

    match result {
        Ok(receipt) => (StatusCode::ACCEPTED, Json(dto::SubmitResponse::from(&receipt))).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// `POST /documents/batch`: every file field of the multipart body is a document.
pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return errors::json_error(e.status(), "invalid_multipart", e.body_text()),
        };
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => files.push(BatchFile::new(file_name, bytes)),
            Err(e) => return errors::json_error(e.status(), "invalid_multipart", e.body_text()),
        }
    }

    match services
        .documents
        .submit_batch(tenant.tenant_id(), tenant.user_id(), files)
        .await
    {
        Ok(receipt) => (
            StatusCode::ACCEPTED,
            Json(dto::BatchAcceptedResponse::from(&receipt)),
        )
            .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

pub async fn get_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let batch_id: BatchId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid batch id"),
    };
    match services.documents.get_batch(tenant.tenant_id(), batch_id).await {
        Ok(batch) => Json(dto::BatchResponse::from(batch)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return document_not_found();
    };
    match services.documents.get_job(tenant.tenant_id(), job_id).await {
        Ok(job) => Json(dto::DocumentResponse::from(job)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// `GET /documents/:id/download`: addressable URL of the stored document.
pub async fn download_url(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return document_not_found();
    };
    match services.documents.download_url(tenant.tenant_id(), job_id).await {
        Ok(link) => Json(dto::DownloadResponse::from(link)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// `GET /documents/:id/content`: the stored bytes as an attachment.
pub async fn download_content(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return document_not_found();
    };
    match services.documents.download(tenant.tenant_id(), job_id).await {
        Ok((file_name, bytes)) => {
            let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
            (
                [
                    (CONTENT_TYPE, "application/octet-stream".to_string()),
                    (CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// `DELETE /documents/:id`: removes a finished job and its stored document.
pub async fn delete_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return document_not_found();
    };
    match services.documents.delete_job(tenant.tenant_id(), job_id).await {
        Ok(()) => Json(dto::DeletedResponse {
            document_id: job_id.to_string(),
            deleted: true,
        })
        .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

fn parse_job_id(id: &str) -> Option<JobId> {
    id.parse().ok()
}

fn document_not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "document not found")
}

pub async fn cancel_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return document_not_found();
    };
    match services.documents.cancel_job(tenant.tenant_id(), job_id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(dto::DocumentResponse::from(job))).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// `GET /documents?status=&page=&pageSize=`, newest first.
pub async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListDocumentsQuery>,
) -> axum::response::Response {
    let status = match query.status.as_deref().map(str::parse::<JobStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
        }
    };
    let query = JobQuery::new(status, query.page, query.page_size);
    match services.documents.list_jobs(tenant.tenant_id(), &query).await {
        Ok(page) => Json(dto::DocumentListResponse::from(page)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// First field named `file` (or, failing that, the first field with a file name).
async fn read_file_field(
    multipart: &mut Multipart,
) -> Result<Option<(String, Bytes)>, axum::response::Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(errors::json_error(e.status(), "invalid_multipart", e.body_text())),
        };
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME)
            .to_string();
        return match field.bytes().await {
            Ok(bytes) => Ok(Some((file_name, bytes))),
            Err(e) => Err(errors::json_error(e.status(), "invalid_multipart", e.body_text())),
        };
    }
}
