//! In-process analysis backend for development and tests.
//!
//! Every operation reports `running` a configurable number of times, then the
//! configured outcome. Transient errors and submission rejections can be injected.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Value, json};
use tracing::debug;

use super::{AnalysisError, AnalysisService, OperationStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedOutcome {
    Succeed(Value),
    Fail(String),
}

#[derive(Debug)]
pub struct SimulatedAnalysisService {
    running_polls: u32,
    transient_errors: u32,
    outcome: SimulatedOutcome,
    reject_submissions: bool,
    submissions: AtomicU32,
    polls: AtomicU32,
    operations: Mutex<HashMap<String, u32>>,
}

impl Default for SimulatedAnalysisService {
    fn default() -> Self {
        Self::new()
    }
}

/// Result payload shaped like a prebuilt receipt analysis.
pub fn sample_receipt_result() -> Value {
    json!({
        "status": "succeeded",
        "analyzeResult": {
            "modelId": "prebuilt-receipt",
            "documents": [{
                "docType": "receipt",
                "fields": {
                    "MerchantName": {"type": "string", "valueString": "Contoso"},
                    "Total": {"type": "number", "valueNumber": 42.5},
                    "Items": {"type": "array", "valueArray": [{
                        "type": "object",
                        "valueObject": {
                            "Description": {"type": "string", "valueString": "Widget"},
                            "TotalPrice": {"type": "number", "valueNumber": 42.5}
                        }
                    }]}
                }
            }]
        }
    })
}

impl SimulatedAnalysisService {
    /// Succeeds on the first poll with `sample_receipt_result`.
    pub fn new() -> Self {
        Self {
            running_polls: 0,
            transient_errors: 0,
            outcome: SimulatedOutcome::Succeed(sample_receipt_result()),
            reject_submissions: false,
            submissions: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Report `running` this many times before the outcome.
    pub fn with_running_polls(mut self, n: u32) -> Self {
        self.running_polls = n;
        self
    }

    /// Fail the first `n` polls of every operation with a transport error.
    pub fn with_transient_errors(mut self, n: u32) -> Self {
        self.transient_errors = n;
        self
    }

    pub fn succeeding_with(mut self, result: Value) -> Self {
        self.outcome = SimulatedOutcome::Succeed(result);
        self
    }

    pub fn failing_with(mut self, reason: impl Into<String>) -> Self {
        self.outcome = SimulatedOutcome::Fail(reason.into());
        self
    }

    pub fn rejecting_submissions(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    pub fn submission_count(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, u32>>, AnalysisError> {
        self.operations
            .lock()
            .map_err(|_| AnalysisError::Transport("simulated backend lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl AnalysisService for SimulatedAnalysisService {
    async fn submit(&self, source_url: &str) -> Result<String, AnalysisError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.reject_submissions {
            return Err(AnalysisError::Http {
                status: 400,
                body: "InvalidRequest: source could not be read".to_string(),
            });
        }
        let operation_id = uuid::Uuid::now_v7().to_string();
        self.lock()?.insert(operation_id.clone(), 0);
        debug!(%operation_id, source_url, "simulated analysis submitted");
        Ok(operation_id)
    }

    async fn poll(&self, operation_id: &str) -> Result<OperationStatus, AnalysisError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let count = {
            let mut ops = self.lock()?;
            let Some(count) = ops.get_mut(operation_id) else {
                return Err(AnalysisError::Http {
                    status: 404,
                    body: format!("unknown operation {operation_id}"),
                });
            };
            *count += 1;
            *count
        };

        if count <= self.transient_errors {
            return Err(AnalysisError::Transport("connection reset by peer".to_string()));
        }
        if count - self.transient_errors <= self.running_polls {
            return Ok(OperationStatus::Running);
        }
        Ok(match &self.outcome {
            SimulatedOutcome::Succeed(result) => OperationStatus::Succeeded(result.clone()),
            SimulatedOutcome::Fail(reason) => OperationStatus::Failed(reason.clone()),
        })
    }
}
