//! Custom-column declarations and per-(column, entity) results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::AiConfig;
use crate::types::EntityKind;

/// The declared shape of a column's answer. Drives both prompt assembly
/// (`src/tasks/custom_column.rs`) and response coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    String,
    JsonObject,
    Boolean,
    Number,
    Enum,
}

/// Response-shape hints supplied alongside a column's `response_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub validation_rules: Vec<String>,
}

/// A tenant-defined question applied to many entities of the same type.
/// Declared and persisted externally; the core only reads the fields it
/// needs to run a custom-column task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub entity_type: EntityKind,
    pub response_type: ResponseType,
    #[serde(default)]
    pub response_config: ResponseConfig,
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ai_config: AiConfig,
    /// When set, the custom-column task fetches the entity's recent
    /// LinkedIn activity (via the LinkedIn adapter) and attaches it to
    /// the per-entity prompt context, provided the entity exposes a
    /// `linkedin_url` in its context data.
    #[serde(default)]
    pub uses_linkedin_activity: bool,
    /// Bumped at orchestration start for idempotency tracking; owned by
    /// the control plane, read here only for `§4.6`'s bump step.
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// A directed edge `(dependent -> required)` over columns of the same
/// entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDependency {
    pub dependent: String,
    pub required: String,
}

/// Lifecycle status of one `(column, entity)` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomColumnStatus {
    Pending,
    Completed,
    Error,
}

/// The result of running one column against one entity. Exactly one of
/// the `value_*` fields is populated, matching `response_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomColumnValue {
    pub column_id: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_enum: Option<String>,
    pub confidence_score: f32,
    pub rationale: String,
    pub status: CustomColumnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    pub generated_at: DateTime<Utc>,
}

impl CustomColumnValue {
    pub fn error(column_id: impl Into<String>, entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            column_id: column_id.into(),
            entity_id: entity_id.into(),
            value_string: None,
            value_json: None,
            value_boolean: None,
            value_number: None,
            value_enum: None,
            confidence_score: 0.0,
            rationale: String::new(),
            status: CustomColumnStatus::Error,
            error_details: Some(serde_json::json!({ "error": message })),
            generated_at: Utc::now(),
        }
    }

    /// Clamp a raw model-reported confidence into `[0, 1]`.
    pub fn clamp_confidence(value: f32) -> f32 {
        value.clamp(0.0, 1.0)
    }
}
