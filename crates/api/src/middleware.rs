use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use docintel_core::{TenantId, UserId};

use crate::app::errors::json_error;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Reject requests without a valid tenant and user, and attach a `TenantContext`.
pub async fn tenant_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant_id = header_value(req.headers(), TENANT_HEADER)
        .and_then(|raw| TenantId::parse(raw).map_err(|e| invalid(TENANT_HEADER, e.to_string())))?;
    let user_id = header_value(req.headers(), USER_HEADER)
        .and_then(|raw| UserId::parse(raw).map_err(|e| invalid(USER_HEADER, e.to_string())))?;

    req.extensions_mut()
        .insert(TenantContext::new(tenant_id, user_id));

    Ok(next.run(req).await)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, Response> {
    let value = headers
        .get(name)
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "missing_header", format!("{name} header is required")))?;

    let value = value
        .to_str()
        .map_err(|_| invalid(name, "not valid ASCII".to_string()))?
        .trim();

    if value.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "missing_header",
            format!("{name} header is required"),
        ));
    }
    Ok(value)
}

fn invalid(name: &'static str, reason: String) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_header", format!("{name}: {reason}"))
}
