//! Document analysis service: asynchronous submit-then-poll protocol.

use crate::secrets::SecretError;

pub mod http;
pub mod simulated;

pub use http::HttpAnalysisClient;
pub use simulated::SimulatedAnalysisService;

/// State of an external analysis operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running,
    /// Full result payload as returned by the service
    Succeeded(serde_json::Value),
    /// Service-reported failure reason
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("analysis service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] SecretError),
}

impl AnalysisError {
    /// Errors worth retrying on the next poll: transport failures, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            AnalysisError::Transport(_) => true,
            AnalysisError::Http { status, .. } => *status >= 500 || *status == 429,
            AnalysisError::Protocol(_) | AnalysisError::Credentials(_) => false,
        }
    }
}

#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    /// Start analysing the document at `source_url`. Returns the operation id.
    async fn submit(&self, source_url: &str) -> Result<String, AnalysisError>;

    /// Fetch the current state of an operation. No retries, no side effects.
    async fn poll(&self, operation_id: &str) -> Result<OperationStatus, AnalysisError>;
}

/// Operation id from an `Operation-Location` header: its last path segment.
pub fn operation_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && !id.contains(':'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_is_last_path_segment() {
        assert_eq!(
            operation_id_from_location(
                "https://x.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-receipt/analyzeResults/abc-123?api-version=2024-11-30"
            ),
            Some("abc-123".to_string())
        );
        assert_eq!(
            operation_id_from_location("https://host/results/op-9/"),
            Some("op-9".to_string())
        );
        assert_eq!(operation_id_from_location(""), None);
        assert_eq!(operation_id_from_location("https://"), None);
    }

    #[test]
    fn transient_classification() {
        assert!(AnalysisError::Transport("reset".into()).is_transient());
        assert!(AnalysisError::Http { status: 503, body: String::new() }.is_transient());
        assert!(AnalysisError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!AnalysisError::Http { status: 404, body: String::new() }.is_transient());
        assert!(!AnalysisError::Protocol("bad json".into()).is_transient());
        assert!(!AnalysisError::Credentials(SecretError::NotFound("k".into())).is_transient());
    }
}
