//! Content-based deduplication of recent submissions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use docintel_core::{ContentHash, TenantId};
use docintel_documents::JobRecord;

use crate::store::{MetadataStore, StoreError};

/// Looks up a tenant's most recent job with the same content hash inside a
/// trailing time window. A `None` window disables deduplication.
#[derive(Clone)]
pub struct DeduplicationIndex {
    store: Arc<dyn MetadataStore>,
    window: Option<Duration>,
}

impl DeduplicationIndex {
    pub fn new(store: Arc<dyn MetadataStore>, window: Option<Duration>) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub async fn find_recent(
        &self,
        tenant_id: &TenantId,
        content_hash: &ContentHash,
    ) -> Result<Option<JobRecord>, StoreError> {
        let Some(window) = self.window else {
            return Ok(None);
        };
        self.store
            .find_recent_by_hash(tenant_id, content_hash, window_start(Utc::now(), window))
            .await
    }
}

/// `now - window`, saturating at the earliest representable instant.
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
