use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// 200 when every dependency answers, 503 otherwise.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let report = services.documents.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        tracing::warn!(dependencies = ?report.dependencies, "health check degraded");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(dto::HealthResponse::from(report))).into_response()
}

pub async fn get_quota(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.documents.quota_state(tenant.tenant_id()).await {
        Ok(state) => Json(dto::QuotaResponse::new(tenant.tenant_id(), state)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

pub async fn set_quota(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::SetQuotaRequest>,
) -> axum::response::Response {
    match services
        .documents
        .set_quota_limit(tenant.tenant_id(), body.limit)
        .await
    {
        Ok(state) => Json(dto::QuotaResponse::new(tenant.tenant_id(), state)).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}
