use axum::{
    routing::{get, post},
    Router,
};

pub mod documents;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/documents", post(documents::submit_document).get(documents::list_documents))
        .route("/documents/batch", post(documents::submit_batch))
        .route("/documents/batch/:batch_id", get(documents::get_batch))
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/documents/:id/cancel", post(documents::cancel_document))
        .route("/documents/:id/download", get(documents::download_url))
        .route("/documents/:id/content", get(documents::download_content))
        .route("/quota", get(system::get_quota).put(system::set_quota))
}
