//! Crate-wide error taxonomy.
//!
//! Mirrors the error categories of the enrichment pipeline: validation
//! failures are never retried, not-found conditions surface as 404-shaped
//! results, retryable faults flow through [`crate::retry`], fatal task
//! errors carry an optional [`LadderError`] cause chain back through the
//! stage that raised them, and per-entity errors are attached to individual
//! results rather than failing a whole batch.

use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::Retryable;

/// A chained, serialisable cause carried by [`EngineError::FatalTask`].
///
/// Ported from the teacher's `channels::errors::LadderError`: a minimal
/// linked list of `{message, cause, details}` that survives JSON
/// round-tripping so a stage failure can be traced back through the
/// pipeline inside a callback payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LadderError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for LadderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

/// Payload missing required fields, an unsupported model, a would-be
/// dependency cycle, or an unknown enrichment type. Never retried;
/// surfaced to the control plane as a 400-equivalent.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    #[diagnostic(code(enrichment_engine::validation::missing_field))]
    MissingField { field: &'static str },

    #[error("unsupported model: {model}")]
    #[diagnostic(
        code(enrichment_engine::validation::unsupported_model),
        help("Add the model to the provider's allow-list or use a known model id.")
    )]
    UnsupportedModel { model: String },

    #[error("unknown enrichment type: {value}")]
    #[diagnostic(code(enrichment_engine::validation::unknown_enrichment_type))]
    UnknownEnrichmentType { value: String },

    #[error("this dependency would create a circular reference")]
    #[diagnostic(code(enrichment_engine::validation::dependency_cycle))]
    DependencyCycle { dependent: String, required: String },

    #[error("{message}")]
    #[diagnostic(code(enrichment_engine::validation::other))]
    Other { message: String },
}

/// A referenced entity (account, lead, column, job) does not exist.
/// Never retried; surfaced as a 404-equivalent.
#[derive(Debug, Error, Diagnostic)]
pub enum NotFoundError {
    #[error("account not found: {account_id}")]
    #[diagnostic(code(enrichment_engine::not_found::account))]
    Account { account_id: String },

    #[error("lead not found: {lead_id}")]
    #[diagnostic(code(enrichment_engine::not_found::lead))]
    Lead { lead_id: String },

    #[error("no result for enrichment_type={enrichment_type} account_id={account_id}")]
    #[diagnostic(code(enrichment_engine::not_found::result))]
    Result {
        enrichment_type: String,
        account_id: String,
    },
}

/// HTTP 429/5xx, connection/timeout faults, LLM provider capacity errors,
/// and empty/refusal LLM responses. Retried per [`crate::retry`].
#[derive(Debug, Error, Diagnostic)]
pub enum RetryableError {
    #[error("http status {status} from {url}")]
    #[diagnostic(code(enrichment_engine::retryable::http_status))]
    HttpStatus { status: u16, url: String },

    #[error("request timed out after {elapsed_ms}ms")]
    #[diagnostic(code(enrichment_engine::retryable::timeout))]
    Timeout { elapsed_ms: u64 },

    #[error("connection error: {message}")]
    #[diagnostic(code(enrichment_engine::retryable::connection))]
    Connection { message: String },

    #[error("provider capacity exhausted: {provider}")]
    #[diagnostic(code(enrichment_engine::retryable::resource_exhausted))]
    ResourceExhausted { provider: String },

    #[error("empty or refused LLM response from {provider}")]
    #[diagnostic(code(enrichment_engine::retryable::empty_response))]
    EmptyResponse { provider: String },
}

impl Retryable for RetryableError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Unrecoverable pipeline state: a stage's required inputs never arrived,
/// a downstream dependency is permanently unavailable, and so on. Stored
/// and surfaced as the task's terminal `failed` callback.
#[derive(Debug, Error, Diagnostic)]
#[error("fatal task error at stage {stage}: {message}")]
#[diagnostic(code(enrichment_engine::fatal_task))]
pub struct FatalTaskError {
    pub stage: String,
    pub message: String,
    pub cause: Option<LadderError>,
}

impl FatalTaskError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// An error scoped to a single entity inside a batch. Never fails the
/// job; attached to the entity's result (e.g. `CustomColumnValue.status =
/// error`) alongside `error_details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerEntityError {
    pub error: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl PerEntityError {
    pub fn new(entity_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            entity_id: entity_id.into(),
            stage: None,
        }
    }
}

/// Umbrella error type for any fallible public API in the crate, unifying
/// the per-category enums above the way the teacher's `NodeError`/
/// `CheckpointerError` pair feed into call-site `Result`s.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Retryable(#[from] RetryableError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FatalTask(#[from] FatalTaskError),

    #[error("storage backend error: {0}")]
    #[diagnostic(code(enrichment_engine::storage))]
    Storage(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(enrichment_engine::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
