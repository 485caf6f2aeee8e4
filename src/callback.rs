//! `CallbackEvent`: the protocol emitted to the control plane at every
//! stage boundary, plus the `CallbackSink` seam that delivers it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::error::{EngineError, RetryableError};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::task::OrchestrationData;
use crate::types::EnrichmentType;

/// Lifecycle status of a callback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Processing,
    Partial,
    Completed,
    Failed,
    Skipped,
    Batch,
}

impl CallbackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackStatus::Completed | CallbackStatus::Failed)
    }
}

/// `(page, total_pages)` for a paginated enrichment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub total_pages: u32,
}

impl Pagination {
    pub fn is_final(self) -> bool {
        self.page == self.total_pages
    }
}

/// Error detail attached to a `failed` callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub processing_time_s: Option<f64>,
}

/// One event in the callback protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub job_id: String,
    pub account_id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    pub enrichment_type: EnrichmentType,
    pub status: CallbackStatus,
    pub source: String,
    #[serde(default)]
    pub completion_percentage: f32,
    #[serde(default)]
    pub processed_data: Value,
    #[serde(default)]
    pub error_details: Option<ErrorDetails>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub orchestration_data: Option<OrchestrationData>,
}

impl CallbackEvent {
    pub fn processing(
        job_id: impl Into<String>,
        account_id: impl Into<String>,
        enrichment_type: EnrichmentType,
        source: impl Into<String>,
        completion_percentage: f32,
        processed_data: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            account_id: account_id.into(),
            lead_id: None,
            enrichment_type,
            status: CallbackStatus::Processing,
            source: source.into(),
            completion_percentage,
            processed_data,
            error_details: None,
            pagination: None,
            orchestration_data: None,
        }
    }

    pub fn completed(
        job_id: impl Into<String>,
        account_id: impl Into<String>,
        enrichment_type: EnrichmentType,
        source: impl Into<String>,
        processed_data: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            account_id: account_id.into(),
            lead_id: None,
            enrichment_type,
            status: CallbackStatus::Completed,
            source: source.into(),
            completion_percentage: 100.0,
            processed_data,
            error_details: None,
            pagination: None,
            orchestration_data: None,
        }
    }

    pub fn failed(
        job_id: impl Into<String>,
        account_id: impl Into<String>,
        enrichment_type: EnrichmentType,
        source: impl Into<String>,
        error_details: ErrorDetails,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            account_id: account_id.into(),
            lead_id: None,
            enrichment_type,
            status: CallbackStatus::Failed,
            source: source.into(),
            completion_percentage: 0.0,
            processed_data: Value::Null,
            error_details: Some(error_details),
            pagination: None,
            orchestration_data: None,
        }
    }

    #[must_use]
    pub fn with_lead(mut self, lead_id: impl Into<String>) -> Self {
        self.lead_id = Some(lead_id.into());
        self
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    #[must_use]
    pub fn with_orchestration_data(mut self, data: OrchestrationData) -> Self {
        self.orchestration_data = Some(data);
        self
    }
}

/// Delivery seam for callback events; the HTTP control-plane endpoint
/// this posts to is out of scope and represented purely as a trait.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn emit(&self, event: CallbackEvent) -> Result<(), crate::error::EngineError>;
}

/// Test/record-keeping sink that appends every event it receives to an
/// in-memory log, used by task and orchestrator tests to assert on the
/// emitted sequence (monotonic `completion_percentage`, terminal
/// uniqueness, and so on).
#[derive(Default)]
pub struct RecordingCallbackSink {
    events: tokio::sync::Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl CallbackSink for RecordingCallbackSink {
    async fn emit(&self, event: CallbackEvent) -> Result<(), crate::error::EngineError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Lets any already-constructed `Arc<dyn CallbackSink>` (or `Arc<Concrete>`)
/// satisfy the `Sink: CallbackSink` bound the task runners are generic
/// over, so a single shared sink can back every runner `EnrichmentEngine`
/// builds without cloning the underlying client per task.
#[async_trait]
impl<T: CallbackSink + ?Sized> CallbackSink for std::sync::Arc<T> {
    async fn emit(&self, event: CallbackEvent) -> Result<(), crate::error::EngineError> {
        (**self).emit(event).await
    }
}

/// Posts each event as JSON to `{base_url}/internal/enrichment-callback`,
/// the inbound endpoint [`crate::callback_handler::CallbackHandler`]
/// consumes on the receiving side. Retries transient faults the same way
/// every other outbound call in the crate does.
pub struct HttpCallbackSink {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpCallbackSink {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    #[instrument(skip(self, event), fields(job_id = %event.job_id, status = ?event.status))]
    async fn emit(&self, event: CallbackEvent) -> Result<(), EngineError> {
        let url = format!("{}/internal/enrichment-callback", self.base_url.trim_end_matches('/'));
        let retry_config = RetryConfig::default();
        retry_with_backoff(retry_config, || async {
            let mut req = self.http.post(&url).json(&event).timeout(Duration::from_secs(20));
            if let Some(token) = &self.auth_token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    RetryableError::Timeout { elapsed_ms: 20_000 }
                } else {
                    RetryableError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;
            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(RetryableError::HttpStatus {
                    status: status.as_u16(),
                    url: url.clone(),
                });
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}
