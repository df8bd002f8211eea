//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, analysis backend, document service)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

use docintel_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from configuration (public entrypoint used by `main.rs`).
///
/// Also returns the services so the caller can run startup recovery.
pub async fn build_app(config: &AppConfig) -> Result<(Router, Arc<services::AppServices>), services::ServicesError> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((router_with(Arc::clone(&services), config.max_upload_bytes), services))
}

/// Router over already-built services.
pub fn router_with(services: Arc<services::AppServices>, max_upload_bytes: usize) -> Router {
    // Tenant-scoped routes: require x-tenant-id / x-user-id.
    let scoped = routes::router().layer(axum::middleware::from_fn(middleware::tenant_context_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}
