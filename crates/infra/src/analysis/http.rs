//! HTTP client for the document analysis service.
//!
//! Submission: `POST {endpoint}/documentintelligence/documentModels/{model}:analyze`
//! with `{"urlSource": url}`; the service answers 202 with an `Operation-Location`
//! header. Polling: `GET .../documentModels/{model}/analyzeResults/{id}`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{AnalysisError, AnalysisService, OperationStatus, operation_id_from_location};
use crate::config::AnalyzerConfig;
use crate::secrets::SecretStore;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Error bodies are truncated before they end up in job records and logs.
const MAX_ERROR_BODY: usize = 512;

pub struct HttpAnalysisClient {
    client: reqwest::Client,
    endpoint: String,
    analyzer_id: String,
    api_version: String,
    key_secret_name: String,
    secrets: Arc<dyn SecretStore>,
}

impl core::fmt::Debug for HttpAnalysisClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpAnalysisClient")
            .field("endpoint", &self.endpoint)
            .field("analyzer_id", &self.analyzer_id)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl HttpAnalysisClient {
    pub fn new(
        endpoint: impl Into<String>,
        config: &AnalyzerConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            analyzer_id: config.analyzer_id.clone(),
            api_version: config.api_version.clone(),
            key_secret_name: config.key_secret_name.clone(),
            secrets,
        })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint, self.analyzer_id, self.api_version
        )
    }

    fn result_url(&self, operation_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}/analyzeResults/{}?api-version={}",
            self.endpoint, self.analyzer_id, operation_id, self.api_version
        )
    }

    async fn error_from_response(response: reqwest::Response) -> AnalysisError {
        let status = response.status().as_u16();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        AnalysisError::Http { status, body }
    }
}

/// Human-readable failure reason from a failed analysis payload.
fn failure_reason(payload: &Value) -> String {
    match payload.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(err @ Value::Object(_)) => match (
            err.get("code").and_then(Value::as_str),
            err.get("message").and_then(Value::as_str),
        ) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.to_string(),
            (Some(code), None) => code.to_string(),
            (None, None) => err.to_string(),
        },
        _ => "analysis failed".to_string(),
    }
}

/// Interpret a poll payload by its `status` field.
pub(crate) fn status_from_payload(payload: Value) -> Result<OperationStatus, AnalysisError> {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| AnalysisError::Protocol("poll response has no status field".to_string()))?;
    match status.to_ascii_lowercase().as_str() {
        "succeeded" => Ok(OperationStatus::Succeeded(payload)),
        "failed" | "canceled" | "cancelled" => Ok(OperationStatus::Failed(failure_reason(&payload))),
        _ => Ok(OperationStatus::Running),
    }
}

#[async_trait::async_trait]
impl AnalysisService for HttpAnalysisClient {
    #[instrument(skip(self, source_url), err)]
    async fn submit(&self, source_url: &str) -> Result<String, AnalysisError> {
        let key = self.secrets.get_secret(&self.key_secret_name).await?;
        let response = self
            .client
            .post(self.analyze_url())
            .header(SUBSCRIPTION_KEY_HEADER, key.expose_secret())
            .json(&serde_json::json!({ "urlSource": source_url }))
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::error_from_response(response).await);
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AnalysisError::Protocol("missing Operation-Location header".to_string()))?;
        let operation_id = operation_id_from_location(location).ok_or_else(|| {
            AnalysisError::Protocol(format!("unparseable Operation-Location: {location}"))
        })?;
        debug!(operation_id = %operation_id, "analysis submitted");
        Ok(operation_id)
    }

    #[instrument(skip(self), err(level = "debug"))]
    async fn poll(&self, operation_id: &str) -> Result<OperationStatus, AnalysisError> {
        let key = self.secrets.get_secret(&self.key_secret_name).await?;
        let response = self
            .client
            .get(self.result_url(operation_id))
            .header(SUBSCRIPTION_KEY_HEADER, key.expose_secret())
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(operation_id, error = %err, "poll returned non-success status");
            return Err(err);
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                AnalysisError::Protocol(format!("malformed poll payload: {e}"))
            } else {
                AnalysisError::Transport(format!("reading poll payload: {e}"))
            }
        })?;
        status_from_payload(payload)
    }
}
