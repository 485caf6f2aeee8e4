//! The `LlmProvider` capability trait and its request/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::llm_cache::canonical_prompt;
use crate::error::EngineError;
use crate::types::{SearchContextSize, ThinkingBudget};

/// Either prompt-passing mode accepted by the provider abstraction.
/// Internally a canonical combined form is used for cache keys;
/// providers with a native system/user split use it directly.
#[derive(Debug, Clone)]
pub enum Prompt {
    Single(String),
    Split { system: String, user: String },
}

impl Prompt {
    pub fn single(prompt: impl Into<String>) -> Self {
        Prompt::Single(prompt.into())
    }

    pub fn split(system: impl Into<String>, user: impl Into<String>) -> Self {
        Prompt::Split {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Canonical `"<system>…</system>\n\n<user>…</user>"` form used for
    /// cache keys and by providers that concatenate rather than split
    /// natively.
    pub fn canonical(&self) -> String {
        match self {
            Prompt::Single(p) => p.clone(),
            Prompt::Split { system, user } => canonical_prompt(Some(system), user),
        }
    }

    pub fn as_split(&self) -> (Option<&str>, &str) {
        match self {
            Prompt::Single(p) => (None, p.as_str()),
            Prompt::Split { system, user } => (Some(system.as_str()), user.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateContentRequest {
    pub prompt: Prompt,
    pub is_json: bool,
    pub operation_tag: String,
    pub temperature: Option<f32>,
    pub thinking_budget: Option<ThinkingBudget>,
    pub tenant_id: String,
    pub force_refresh: bool,
}

#[derive(Debug, Clone)]
pub struct GenerateSearchRequest {
    pub prompt: Prompt,
    pub search_context_size: SearchContextSize,
    pub user_location: Option<String>,
    pub operation_tag: String,
    pub temperature: Option<f32>,
    pub tenant_id: String,
    pub force_refresh: bool,
}

#[derive(Debug, Clone)]
pub struct StructuredSearchRequest {
    pub search: GenerateSearchRequest,
    pub response_schema: Value,
}

/// One source surfaced by a search-grounded call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// `_search_metadata` attached to every search call's response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub sources: Vec<SearchSource>,
    pub markdown: String,
    /// Segment (by index into the answer text) -> indices into
    /// `sources`, when the provider exposes grounding data.
    #[serde(default)]
    pub segment_sources: std::collections::HashMap<String, Vec<usize>>,
}

impl SearchMetadata {
    pub fn render_markdown(sources: &[SearchSource]) -> String {
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| match &s.snippet {
                Some(snippet) => format!("{}. [{}]({}) — {}", i + 1, s.title, s.url, snippet),
                None => format!("{}. [{}]({})", i + 1, s.title, s.url),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Returned alongside every uncached response and stored in cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub operation_tag: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub total_cost_in_usd: f64,
    pub provider: String,
}

/// The uniform interface implemented by each concrete provider
/// (`OpenAiLikeProvider`, `GeminiLikeProvider`) and by
/// [`crate::llm::FallbackProvider`]. Dispatch is by tagged variant
/// rather than deep inheritance.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Per-service default temperature, overridden by an explicit
    /// `temperature` on the request.
    fn default_temperature(&self) -> f32 {
        0.7
    }

    async fn generate_content(
        &self,
        request: GenerateContentRequest,
    ) -> Result<(Value, TokenUsage), EngineError>;

    async fn generate_search_content(
        &self,
        request: GenerateSearchRequest,
    ) -> Result<(Value, TokenUsage), EngineError>;

    async fn generate_structured_search_content(
        &self,
        request: StructuredSearchRequest,
    ) -> Result<(Value, TokenUsage), EngineError>;
}
