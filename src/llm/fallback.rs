//! Provider fallback: retries a failed call against a secondary model
//! before surfacing the error to the caller.
//!
//! Only capacity/5xx-class failures (`RetryableError::ResourceExhausted`,
//! `HttpStatus`, `Connection`, `Timeout`) trigger a fallback attempt.
//! Validation and not-found errors pass straight through, since a
//! different model will not fix a malformed payload.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::EngineError;
use crate::llm::provider::{
    GenerateContentRequest, GenerateSearchRequest, LlmProvider, StructuredSearchRequest, TokenUsage,
};

/// Wraps a primary [`LlmProvider`] with a fallback one. Both sides share
/// the same trait object shape, so the fallback can itself be another
/// `FallbackProvider` if a chain is ever needed.
pub struct FallbackProvider {
    primary: Box<dyn LlmProvider>,
    fallback: Box<dyn LlmProvider>,
}

impl FallbackProvider {
    pub fn new(primary: Box<dyn LlmProvider>, fallback: Box<dyn LlmProvider>) -> Self {
        Self { primary, fallback }
    }

    fn should_fall_back(err: &EngineError) -> bool {
        matches!(err, EngineError::Retryable(_))
    }
}

#[async_trait]
impl LlmProvider for FallbackProvider {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn default_temperature(&self) -> f32 {
        self.primary.default_temperature()
    }

    async fn generate_content(
        &self,
        request: GenerateContentRequest,
    ) -> Result<(Value, TokenUsage), EngineError> {
        match self.primary.generate_content(request.clone()).await {
            Ok(result) => Ok(result),
            Err(err) if Self::should_fall_back(&err) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %err,
                    "falling back to secondary LLM provider"
                );
                self.fallback.generate_content(request).await
            }
            Err(err) => Err(err),
        }
    }

    async fn generate_search_content(
        &self,
        request: GenerateSearchRequest,
    ) -> Result<(Value, TokenUsage), EngineError> {
        match self.primary.generate_search_content(request.clone()).await {
            Ok(result) => Ok(result),
            Err(err) if Self::should_fall_back(&err) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %err,
                    "falling back to secondary LLM provider for search"
                );
                self.fallback.generate_search_content(request).await
            }
            Err(err) => Err(err),
        }
    }

    async fn generate_structured_search_content(
        &self,
        request: StructuredSearchRequest,
    ) -> Result<(Value, TokenUsage), EngineError> {
        match self
            .primary
            .generate_structured_search_content(request.clone())
            .await
        {
            Ok(result) => Ok(result),
            Err(err) if Self::should_fall_back(&err) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %err,
                    "falling back to secondary LLM provider for structured search"
                );
                self.fallback.generate_structured_search_content(request).await
            }
            Err(err) => Err(err),
        }
    }
}
