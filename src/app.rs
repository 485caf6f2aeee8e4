//! `EnrichmentEngine`: the process-wide set of shared primitives every
//! task pipeline is built from.
//!
//! Everything here is constructed once, behind `Arc`, and handed to
//! tasks by cheap clone — there is no global mutable state, matching the
//! "constructed once and passed via explicit dependency injection" rule
//! for caches, providers, and adapters. A `ColumnOrchestrator` or
//! `CallbackHandler` is *not* wired here: both are generic over
//! application-owned seams (a column catalog, an account/lead
//! repository, a dispatch implementation) that this crate does not
//! provide, so callers build those themselves from the engine's shared
//! pieces (`llm_provider()`, `result_store()`, and so on).

use std::sync::Arc;

use crate::adapters::{BuiltWithAdapter, HttpLinkedinAdapter, HttpProfileAdapter, HttpSearchAdapter, LinkedinAdapter};
use crate::cache::api_cache::ApiCache;
use crate::cache::llm_cache::LlmCache;
use crate::callback::{CallbackSink, HttpCallbackSink, RecordingCallbackSink};
use crate::config::EngineConfig;
use crate::llm::provider::LlmProvider;
use crate::llm::{FallbackProvider, GeminiLikeProvider, OpenAiLikeProvider};
use crate::result_store::{ResultStore, ResultStoreConfig};
use crate::tasks::{AccountEnhancementRunner, CustomColumnRunner, LinkedinActivityRunner};
use crate::tasks::custom_column::StaticProviderRegistry;

/// The fully wired engine. Every field is `Arc`-backed so cloning the
/// handle (or just the field you need) is always cheap; there is
/// intentionally no `Clone` impl on `EnrichmentEngine` itself since
/// callers should hold one instance for the process lifetime and pull
/// `Arc` clones out of it per task.
pub struct EnrichmentEngine {
    config: EngineConfig,
    api_cache: Arc<ApiCache>,
    llm_cache: Arc<LlmCache>,
    llm_provider: Arc<dyn LlmProvider>,
    result_store: Arc<ResultStore>,
    callback_sink: Arc<dyn CallbackSink>,
    profile_adapter: Arc<HttpProfileAdapter>,
    search_adapter: Arc<HttpSearchAdapter>,
    technographic_adapter: Arc<BuiltWithAdapter>,
    linkedin_adapter: Arc<HttpLinkedinAdapter>,
}

impl EnrichmentEngine {
    pub fn builder() -> EnrichmentEngineBuilder {
        EnrichmentEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn api_cache(&self) -> Arc<ApiCache> {
        self.api_cache.clone()
    }

    pub fn llm_cache(&self) -> Arc<LlmCache> {
        self.llm_cache.clone()
    }

    pub fn llm_provider(&self) -> Arc<dyn LlmProvider> {
        self.llm_provider.clone()
    }

    pub fn result_store(&self) -> Arc<ResultStore> {
        self.result_store.clone()
    }

    pub fn callback_sink(&self) -> Arc<dyn CallbackSink> {
        self.callback_sink.clone()
    }

    pub fn linkedin_adapter(&self) -> Arc<HttpLinkedinAdapter> {
        self.linkedin_adapter.clone()
    }

    /// Builds a custom-column runner (§4.9) over the engine's default LLM
    /// provider and shared callback sink. Per-model overrides beyond the
    /// default belong to a caller-supplied [`StaticProviderRegistry`]
    /// built from [`Self::llm_provider`]; this constructor covers the
    /// common case where every column uses the same provider.
    pub fn custom_column_runner(&self) -> CustomColumnRunner<StaticProviderRegistry, Arc<dyn CallbackSink>> {
        let registry = StaticProviderRegistry::new(self.llm_provider.clone());
        let linkedin: Arc<dyn LinkedinAdapter> = self.linkedin_adapter.clone();
        CustomColumnRunner::new(registry, Some(linkedin), self.callback_sink.clone())
    }

    /// Builds the account-enhancement runner (§4.10).
    pub fn account_enhancement_runner(
        &self,
    ) -> AccountEnhancementRunner<HttpProfileAdapter, BuiltWithAdapter, HttpSearchAdapter, Arc<dyn CallbackSink>> {
        AccountEnhancementRunner::new(
            self.profile_adapter.clone(),
            self.technographic_adapter.clone(),
            self.search_adapter.clone(),
            self.llm_provider.clone(),
            self.result_store.clone(),
            self.callback_sink.clone(),
        )
    }

    /// Builds the LinkedIn-activity runner (§4.10).
    pub fn linkedin_activity_runner(&self) -> LinkedinActivityRunner<HttpLinkedinAdapter, Arc<dyn CallbackSink>> {
        LinkedinActivityRunner::new(
            self.linkedin_adapter.clone(),
            self.llm_provider.clone(),
            self.callback_sink.clone(),
        )
    }
}

/// Builder for [`EnrichmentEngine`], mirroring the teacher's
/// `GraphBuilder` construction style: each setter consumes and returns
/// `self`, and `build()` resolves the pieces callers never bothered to
/// override against [`EngineConfig`] defaults.
#[derive(Default)]
pub struct EnrichmentEngineBuilder {
    config: Option<EngineConfig>,
    http: Option<reqwest::Client>,
    api_cache: Option<Arc<ApiCache>>,
    llm_cache: Option<Arc<LlmCache>>,
    llm_provider: Option<Arc<dyn LlmProvider>>,
    result_store: Option<Arc<ResultStore>>,
    callback_sink: Option<Arc<dyn CallbackSink>>,
}

impl EnrichmentEngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn api_cache(mut self, api_cache: Arc<ApiCache>) -> Self {
        self.api_cache = Some(api_cache);
        self
    }

    #[must_use]
    pub fn llm_cache(mut self, llm_cache: Arc<LlmCache>) -> Self {
        self.llm_cache = Some(llm_cache);
        self
    }

    /// Override the default LLM provider entirely (bypassing the
    /// Gemini-like/OpenAI-like/fallback wiring `build()` otherwise
    /// assembles from `config`). Useful for tests, where a stub provider
    /// is usually preferable to a real HTTP-backed one.
    #[must_use]
    pub fn llm_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn result_store(mut self, result_store: Arc<ResultStore>) -> Self {
        self.result_store = Some(result_store);
        self
    }

    #[must_use]
    pub fn callback_sink(mut self, sink: Arc<dyn CallbackSink>) -> Self {
        self.callback_sink = Some(sink);
        self
    }

    /// Assemble the engine. When a piece was not overridden, build it
    /// from `config` (or its defaults): an in-memory `ApiCache`/`LlmCache`
    /// pair, a Gemini-like primary provider falling back to an
    /// OpenAI-like secondary when both API keys are configured (primary
    /// only when just one is), an in-memory `ResultStore`, and a
    /// `RecordingCallbackSink` (a caller wiring up a real control plane
    /// should always override this with [`HttpCallbackSink`]).
    pub fn build(self) -> EnrichmentEngine {
        let config = self.config.unwrap_or_default();
        let http = self.http.unwrap_or_default();

        let api_cache = self.api_cache.unwrap_or_else(|| Arc::new(ApiCache::in_memory(http.clone())));
        let llm_cache = self.llm_cache.unwrap_or_else(|| Arc::new(LlmCache::in_memory()));

        let llm_provider = self.llm_provider.unwrap_or_else(|| {
            let gemini = config
                .gemini_api_token
                .clone()
                .map(|token| GeminiLikeProvider::new(token, "gemini-1.5-pro", llm_cache.clone()));
            let openai = config
                .openai_api_key
                .clone()
                .map(|key| OpenAiLikeProvider::new(key, "gpt-4o", llm_cache.clone()));

            match (gemini, openai) {
                (Some(gemini), Some(openai)) => {
                    Arc::new(FallbackProvider::new(Box::new(gemini), Box::new(openai))) as Arc<dyn LlmProvider>
                }
                (Some(gemini), None) => Arc::new(gemini) as Arc<dyn LlmProvider>,
                (None, Some(openai)) => Arc::new(openai) as Arc<dyn LlmProvider>,
                (None, None) => {
                    Arc::new(GeminiLikeProvider::new(String::new(), "gemini-1.5-pro", llm_cache.clone()))
                        as Arc<dyn LlmProvider>
                }
            }
        });

        let result_store = self.result_store.unwrap_or_else(|| {
            Arc::new(ResultStore::in_memory(ResultStoreConfig {
                batch_size: config.task_result_batch_size,
                batch_threshold: config.task_result_batch_threshold,
                max_concurrent_inserts: config.task_result_max_concurrent,
                enable_batching: config.enable_result_batching,
            }))
        });

        let callback_sink = self
            .callback_sink
            .unwrap_or_else(|| Arc::new(RecordingCallbackSink::new()) as Arc<dyn CallbackSink>);

        let profile_adapter = Arc::new(HttpProfileAdapter::new(api_cache.clone()));
        let search_adapter = Arc::new(HttpSearchAdapter::new(
            config.jina_api_token.clone().unwrap_or_default(),
            api_cache.clone(),
        ));
        let technographic_adapter = Arc::new(BuiltWithAdapter::new(
            config.builtwith_api_key.clone().unwrap_or_default(),
            api_cache.clone(),
        ));
        let linkedin_adapter = Arc::new(HttpLinkedinAdapter::new(
            config.rapid_api_key.clone().unwrap_or_default(),
            api_cache.clone(),
        ));

        EnrichmentEngine {
            config,
            api_cache,
            llm_cache,
            llm_provider,
            result_store,
            callback_sink,
            profile_adapter,
            search_adapter,
            technographic_adapter,
            linkedin_adapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::llm::provider::{GenerateContentRequest, GenerateSearchRequest, StructuredSearchRequest, TokenUsage};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct EchoProvider;
    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }
        async fn generate_content(&self, _request: GenerateContentRequest) -> Result<(Value, TokenUsage), EngineError> {
            Ok((json!({"value": "ok"}), TokenUsage {
                operation_tag: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                total_cost_in_usd: 0.0,
                provider: "echo".to_string(),
            }))
        }
        async fn generate_search_content(&self, _request: GenerateSearchRequest) -> Result<(Value, TokenUsage), EngineError> {
            unimplemented!()
        }
        async fn generate_structured_search_content(
            &self,
            _request: StructuredSearchRequest,
        ) -> Result<(Value, TokenUsage), EngineError> {
            unimplemented!()
        }
    }

    #[test]
    fn builder_falls_back_to_documented_defaults_without_api_keys() {
        let engine = EnrichmentEngine::builder()
            .llm_provider(Arc::new(EchoProvider))
            .build();
        assert_eq!(engine.config().task_result_batch_size, 100);
        assert_eq!(engine.llm_provider().name(), "echo");
    }

    #[test]
    fn runner_constructors_do_not_panic_with_default_wiring() {
        let engine = EnrichmentEngine::builder()
            .llm_provider(Arc::new(EchoProvider))
            .build();
        let _custom_column = engine.custom_column_runner();
        let _account_enhancement = engine.account_enhancement_runner();
        let _linkedin_activity = engine.linkedin_activity_runner();
    }

    #[tokio::test]
    async fn shared_callback_sink_is_visible_through_every_runner() {
        let sink = Arc::new(RecordingCallbackSink::new());
        let engine = EnrichmentEngine::builder()
            .llm_provider(Arc::new(EchoProvider))
            .callback_sink(sink.clone() as Arc<dyn CallbackSink>)
            .build();

        engine
            .callback_sink()
            .emit(crate::callback::CallbackEvent::completed(
                "job-1",
                "acct-1",
                crate::types::EnrichmentType::CompanyInfo,
                "test",
                json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(sink.events().await.len(), 1);
    }
}
