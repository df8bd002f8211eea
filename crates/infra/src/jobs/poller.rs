//! Single status check against the analysis service.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::analysis::{AnalysisService, OperationStatus};

/// Classified poll result. Retry and backoff are the orchestrator's concern.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still running; `transient` carries the absorbed error, if any
    Running { transient: Option<String> },
    Succeeded(Value),
    Failed(String),
}

#[derive(Clone)]
pub struct StatusPoller {
    analysis: Arc<dyn AnalysisService>,
}

impl StatusPoller {
    pub fn new(analysis: Arc<dyn AnalysisService>) -> Self {
        Self { analysis }
    }

    /// Transport errors, 5xx and 429 count as `Running`; every other error is terminal.
    pub async fn poll(&self, operation_id: &str) -> PollOutcome {
        match self.analysis.poll(operation_id).await {
            Ok(OperationStatus::Running) => PollOutcome::Running { transient: None },
            Ok(OperationStatus::Succeeded(result)) => PollOutcome::Succeeded(result),
            Ok(OperationStatus::Failed(reason)) => PollOutcome::Failed(reason),
            Err(e) if e.is_transient() => {
                warn!(operation_id, error = %e, "transient poll error, treating as running");
                PollOutcome::Running {
                    transient: Some(e.to_string()),
                }
            }
            Err(e) => PollOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisError, SimulatedAnalysisService};

    #[tokio::test]
    async fn transient_errors_read_as_running() {
        let svc = Arc::new(SimulatedAnalysisService::new().with_transient_errors(1));
        let op = svc.submit("memory://x").await.unwrap();
        let poller = StatusPoller::new(svc);

        assert!(matches!(
            poller.poll(&op).await,
            PollOutcome::Running { transient: Some(_) }
        ));
        assert!(matches!(poller.poll(&op).await, PollOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn permanent_errors_are_terminal() {
        let poller = StatusPoller::new(Arc::new(SimulatedAnalysisService::new()));
        let expected = AnalysisError::Http {
            status: 404,
            body: "unknown operation missing".to_string(),
        };
        assert_eq!(
            poller.poll("missing").await,
            PollOutcome::Failed(expected.to_string())
        );
    }

    #[tokio::test]
    async fn service_failures_pass_through() {
        let svc = Arc::new(SimulatedAnalysisService::new().failing_with("corrupt image"));
        let op = svc.submit("memory://x").await.unwrap();
        let poller = StatusPoller::new(svc);
        assert_eq!(
            poller.poll(&op).await,
            PollOutcome::Failed("corrupt image".to_string())
        );
    }
}
