//! `TaskPayload`: the typed descriptor submitted to run one enrichment
//! task.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::column::Column;
use crate::config::{DEFAULT_CONCURRENT_REQUESTS, DEFAULT_TASK_BATCH_SIZE};
use crate::types::{EnrichmentType, ThinkingBudget};

/// Per-call LLM configuration carried on a task payload. `model`/
/// `temperature` override the provider's per-service defaults; both
/// participate in the LLM cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub thinking_budget: Option<ThinkingBudget>,
    #[serde(default)]
    pub use_internet: bool,
    #[serde(default)]
    pub unstructured: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            temperature: None,
            thinking_budget: None,
            use_internet: false,
            unstructured: false,
        }
    }
}

/// Continuation state threaded across task boundaries so the
/// orchestrator can advance a column DAG after a task's terminal
/// callback, without the orchestrator holding any mutable state itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationData {
    pub next_columns: Vec<String>,
    pub entity_ids: Vec<String>,
    pub batch_size: usize,
    pub tenant_id: String,
    pub request_id: String,
}

/// The input to one task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Unique per run; a job_id produces at most one terminal event.
    pub job_id: String,
    pub enrichment_type: EnrichmentType,
    /// Ordered, nonempty.
    pub entity_ids: Vec<String>,
    /// `EntityRef.id -> JSON snapshot` captured by the caller.
    #[serde(default)]
    pub context_data: HashMap<String, Value>,
    pub tenant_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    #[serde(default)]
    pub ai_config: AiConfig,
    /// The column to generate; required when `enrichment_type ==
    /// EnrichmentType::CustomColumn`, unused otherwise.
    #[serde(default)]
    pub column: Option<Column>,
    #[serde(default)]
    pub orchestration_data: Option<OrchestrationData>,
    #[serde(default)]
    pub attempt_number: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_batch_size() -> usize {
    DEFAULT_TASK_BATCH_SIZE
}

fn default_concurrent_requests() -> usize {
    DEFAULT_CONCURRENT_REQUESTS
}

fn default_max_retries() -> u32 {
    3
}

impl TaskPayload {
    /// Clamp `concurrent_requests` down to at most `entity_ids.len()`
    /// (never up) so a small batch doesn't over-provision semaphore
    /// permits.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrent_requests
            .min(self.entity_ids.len().max(1))
            .max(1)
    }
}
