//! Account-enhancement task (§4.10): a staged pipeline that builds a
//! typed `AccountInfo` for one account per run, enriching a web profile
//! with structured extraction, technographic data, and a LinkedIn URL.
//!
//! Unlike the custom-column task, every stage here is fixed rather than
//! tenant-configured, so the pipeline is a straight sequence of `async
//! fn` stages over a shared `StageContext` rather than a data-driven
//! closure list, matching how the original source's single `process()`
//! method reads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use crate::adapters::{ProfileAdapter, SearchAdapter, TechnographicAdapter, WebsiteParserAdapter};
use crate::adapters::technographic::quality_metrics;
use crate::callback::{CallbackEvent, CallbackSink, ErrorDetails};
use crate::error::EngineError;
use crate::llm::provider::{GenerateContentRequest, LlmProvider, Prompt};
use crate::result_store::ResultStore;
use crate::task::TaskPayload;
use crate::types::{EnrichmentType, ThinkingBudget};

/// The fully built record emitted on the `completed` callback. Mirrors
/// the shape the original account-enhancement worker returns, trimmed
/// to the fields this pipeline actually populates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub domain: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub employee_count_estimate: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub technology_categories: Vec<String>,
    #[serde(default)]
    pub customers: Vec<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
}

struct StageContext {
    account_id: String,
    domain: String,
    tenant_id: String,
    job_id: String,
    profile_html: String,
    extracted: Value,
    info: AccountInfo,
}

/// Emitted after every stage; `completion_percentage` values are fixed
/// and monotonically increasing, matching §4.10's "non-decreasing"
/// requirement without needing the batch processor's formula (this
/// pipeline runs one account per invocation, not a batch of entities).
const STAGE_PERCENTAGES: [f32; 6] = [15.0, 35.0, 50.0, 70.0, 85.0, 95.0];

pub struct AccountEnhancementRunner<Profile, Tech, Search, Sink> {
    profile_adapter: Arc<Profile>,
    technographic_adapter: Arc<Tech>,
    search_adapter: Arc<Search>,
    llm: Arc<dyn LlmProvider>,
    result_store: Arc<ResultStore>,
    callback_sink: Sink,
}

impl<Profile, Tech, Search, Sink> AccountEnhancementRunner<Profile, Tech, Search, Sink>
where
    Profile: ProfileAdapter,
    Tech: TechnographicAdapter,
    Search: SearchAdapter,
    Sink: CallbackSink,
{
    pub fn new(
        profile_adapter: Arc<Profile>,
        technographic_adapter: Arc<Tech>,
        search_adapter: Arc<Search>,
        llm: Arc<dyn LlmProvider>,
        result_store: Arc<ResultStore>,
        callback_sink: Sink,
    ) -> Self {
        Self {
            profile_adapter,
            technographic_adapter,
            search_adapter,
            llm,
            result_store,
            callback_sink,
        }
    }

    #[instrument(skip(self, payload), fields(job_id = %payload.job_id, tenant_id = %payload.tenant_id))]
    pub async fn run(&self, payload: TaskPayload) -> Result<(), EngineError> {
        let account_id = match payload.entity_ids.first() {
            Some(id) => id.clone(),
            None => {
                let event = CallbackEvent::failed(
                    payload.job_id.clone(),
                    String::new(),
                    EnrichmentType::CompanyInfo,
                    "account_enhancement",
                    ErrorDetails {
                        error_type: "validation".to_string(),
                        message: "entity_ids is empty".to_string(),
                        stage: Some("start".to_string()),
                        processing_time_s: None,
                    },
                );
                self.callback_sink.emit(event).await?;
                return Ok(());
            }
        };
        let domain = payload
            .context_data
            .get(&account_id)
            .and_then(|v| v.get("domain"))
            .and_then(Value::as_str)
            .unwrap_or(&account_id)
            .to_string();

        let mut ctx = StageContext {
            account_id: account_id.clone(),
            domain,
            tenant_id: payload.tenant_id.clone(),
            job_id: payload.job_id.clone(),
            profile_html: String::new(),
            extracted: Value::Null,
            info: AccountInfo::default(),
        };

        match self.run_stages(&mut ctx).await {
            Ok(()) => {
                let processed_data = serde_json::to_value(&ctx.info)?;
                let event = CallbackEvent::completed(
                    ctx.job_id.clone(),
                    ctx.account_id.clone(),
                    EnrichmentType::CompanyInfo,
                    "account_enhancement",
                    json!({ "account_info": processed_data, "raw_profile_html": ctx.profile_html }),
                );
                self.result_store.store(EnrichmentType::CompanyInfo, &event).await?;
                self.callback_sink.emit(event).await?;
                Ok(())
            }
            Err((stage, err)) => {
                let event = CallbackEvent::failed(
                    ctx.job_id.clone(),
                    ctx.account_id.clone(),
                    EnrichmentType::CompanyInfo,
                    "account_enhancement",
                    ErrorDetails {
                        error_type: "fatal".to_string(),
                        message: err.to_string(),
                        stage: Some(stage.to_string()),
                        processing_time_s: None,
                    },
                );
                self.callback_sink.emit(event).await?;
                Ok(())
            }
        }
    }

    async fn report(&self, ctx: &StageContext, stage_index: usize, label: &str) -> Result<(), EngineError> {
        let event = CallbackEvent::processing(
            ctx.job_id.clone(),
            ctx.account_id.clone(),
            EnrichmentType::CompanyInfo,
            "account_enhancement",
            STAGE_PERCENTAGES[stage_index],
            json!({ "stage": label }),
        );
        self.callback_sink.emit(event).await
    }

    async fn run_stages(&self, ctx: &mut StageContext) -> Result<(), (&'static str, EngineError)> {
        self.report(ctx, 0, "web_profile_fetch").await.map_err(|e| ("web_profile_fetch", e))?;
        let profile = self
            .profile_adapter
            .fetch_web_profile(&ctx.domain, &ctx.tenant_id)
            .await
            .map_err(|e| ("web_profile_fetch", e))?;
        ctx.profile_html = profile.html;
        ctx.info.domain = ctx.domain.clone();

        self.report(ctx, 1, "structured_extraction").await.map_err(|e| ("structured_extraction", e))?;
        ctx.extracted = self.extract_structured(ctx).await.map_err(|e| ("structured_extraction", e))?;
        ctx.info.industry = ctx.extracted.get("industry").and_then(Value::as_str).map(str::to_string);
        ctx.info.employee_count_estimate =
            ctx.extracted.get("employee_count_estimate").and_then(Value::as_str).map(str::to_string);
        ctx.info.customers = ctx
            .extracted
            .get("customers")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        self.report(ctx, 2, "analysis_generation").await.map_err(|e| ("analysis_generation", e))?;
        ctx.info.analysis = self.generate_analysis(ctx).await.map_err(|e| ("analysis_generation", e))?;
        ctx.info.summary = ctx.extracted.get("summary").and_then(Value::as_str).unwrap_or_default().to_string();

        self.report(ctx, 3, "technographic_fetch").await.map_err(|e| ("technographic_fetch", e))?;
        let tech_profile = match self.technographic_adapter.get_technology_profile(&ctx.domain, &ctx.tenant_id).await {
            Ok(profile) if !profile.technologies.is_empty() => profile,
            _ => WebsiteParserAdapter::parse_html(&ctx.domain, &ctx.profile_html),
        };
        let metrics = quality_metrics(&tech_profile);
        ctx.info.technologies = tech_profile.technologies.iter().map(|t| t.name.clone()).collect();
        ctx.info.technology_categories = tech_profile.categories.keys().cloned().collect();
        if let Value::Object(map) = &mut ctx.extracted {
            map.insert("technographic_quality".to_string(), serde_json::to_value(&metrics).unwrap_or(Value::Null));
        }

        self.report(ctx, 4, "linkedin_discovery").await.map_err(|e| ("linkedin_discovery", e))?;
        ctx.info.linkedin_url = self
            .search_adapter
            .find_linkedin_company_url(&ctx.domain, &ctx.tenant_id)
            .await
            .map_err(|e| ("linkedin_discovery", e))?;

        self.report(ctx, 5, "build_account_info").await.map_err(|e| ("build_account_info", e))?;
        Ok(())
    }

    async fn extract_structured(&self, ctx: &StageContext) -> Result<Value, EngineError> {
        let system = "Extract structured company information from the HTML of a company's \
                       website. Respond with a single JSON object: {\"industry\": string|null, \
                       \"employee_count_estimate\": string|null, \"summary\": string, \
                       \"customers\": [string]}.";
        let user = format!("Website HTML (truncated):\n{}", truncate(&ctx.profile_html, 8000));
        let request = GenerateContentRequest {
            prompt: Prompt::split(system, user),
            is_json: true,
            operation_tag: format!("account_enhancement:extract:{}", ctx.account_id),
            temperature: None,
            thinking_budget: Some(ThinkingBudget::Low),
            tenant_id: ctx.tenant_id.clone(),
            force_refresh: false,
        };
        let (value, _usage) = self.llm.generate_content(request).await?;
        Ok(value)
    }

    async fn generate_analysis(&self, ctx: &StageContext) -> Result<String, EngineError> {
        let system = "Write a two-to-three sentence sales-facing analysis of this company, \
                       given the extracted summary and industry. Respond with plain text, no \
                       JSON wrapper.";
        let user = format!(
            "Domain: {}\nExtracted data:\n{}",
            ctx.domain,
            serde_json::to_string_pretty(&ctx.extracted).unwrap_or_default()
        );
        let request = GenerateContentRequest {
            prompt: Prompt::split(system, user),
            is_json: false,
            operation_tag: format!("account_enhancement:analysis:{}", ctx.account_id),
            temperature: None,
            thinking_budget: Some(ThinkingBudget::Low),
            tenant_id: ctx.tenant_id.clone(),
            force_refresh: false,
        };
        let (value, _usage) = self.llm.generate_content(request).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::linkedin::RawLinkedinActivity;
    use crate::adapters::profile::WebProfile;
    use crate::adapters::search::SearchResult;
    use crate::adapters::technographic::TechnologyProfile;
    use crate::callback::{CallbackStatus, RecordingCallbackSink};
    use crate::config::DEFAULT_TASK_BATCH_SIZE;
    use crate::llm::provider::{GenerateSearchRequest, StructuredSearchRequest, TokenUsage};
    use crate::result_store::ResultStoreConfig;
    use crate::task::AiConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubProfile;
    #[async_trait]
    impl ProfileAdapter for StubProfile {
        async fn fetch_web_profile(&self, domain: &str, _tenant_id: &str) -> Result<WebProfile, EngineError> {
            Ok(WebProfile {
                url: format!("https://{domain}"),
                html: "<html><body>Acme builds widgets.</body></html>".to_string(),
                fetched_at: chrono::Utc::now(),
            })
        }
    }

    struct StubTech;
    #[async_trait]
    impl TechnographicAdapter for StubTech {
        async fn get_technology_profile(&self, domain: &str, _tenant_id: &str) -> Result<TechnologyProfile, EngineError> {
            Ok(TechnologyProfile {
                domain: domain.to_string(),
                ..Default::default()
            })
        }
    }

    struct StubSearch;
    #[async_trait]
    impl SearchAdapter for StubSearch {
        async fn search(&self, _query: &str, _tenant_id: &str) -> Result<Vec<SearchResult>, EngineError> {
            Ok(vec![SearchResult {
                title: "Acme on LinkedIn".to_string(),
                url: "https://www.linkedin.com/company/acme".to_string(),
                snippet: None,
            }])
        }
    }

    struct StubLlm;
    #[async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &'static str {
            "stub"
        }
        async fn generate_content(&self, request: GenerateContentRequest) -> Result<(Value, TokenUsage), EngineError> {
            let value = if request.is_json {
                json!({"industry": "Manufacturing", "employee_count_estimate": "51-200", "summary": "Acme builds widgets.", "customers": ["Globex"]})
            } else {
                json!("Acme is a mid-size widget manufacturer with a growing customer base.")
            };
            Ok((
                value,
                TokenUsage {
                    operation_tag: request.operation_tag,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                    total_cost_in_usd: 0.0,
                    provider: "stub".to_string(),
                },
            ))
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

    fn payload() -> TaskPayload {
        let mut context_data = HashMap::new();
        context_data.insert("acct-1".to_string(), json!({"domain": "acme.com"}));
        TaskPayload {
            job_id: "job-1".to_string(),
            enrichment_type: EnrichmentType::CompanyInfo,
            entity_ids: vec!["acct-1".to_string()],
            context_data,
            tenant_id: "tenant-1".to_string(),
            batch_size: DEFAULT_TASK_BATCH_SIZE,
            concurrent_requests: 1,
            ai_config: AiConfig::default(),
            column: None,
            orchestration_data: None,
            attempt_number: 0,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn full_pipeline_emits_completed_callback_with_account_info() {
        let sink = RecordingCallbackSink::new();
        let runner = AccountEnhancementRunner::new(
            Arc::new(StubProfile),
            Arc::new(StubTech),
            Arc::new(StubSearch),
            Arc::new(StubLlm) as Arc<dyn LlmProvider>,
            Arc::new(ResultStore::in_memory(ResultStoreConfig::default())),
            sink,
        );
        runner.run(payload()).await.unwrap();

        let events = runner.callback_sink.events().await;
        assert!(events.len() >= STAGE_PERCENTAGES.len());
        let last = events.last().unwrap();
        assert_eq!(last.status, CallbackStatus::Completed);
        let info = &last.processed_data["account_info"];
        assert_eq!(info["domain"], json!("acme.com"));
        assert_eq!(info["industry"], json!("Manufacturing"));
        assert_eq!(info["linkedin_url"], json!("https://www.linkedin.com/company/acme"));

        let pcts: Vec<f32> = events.iter().map(|e| e.completion_percentage).collect();
        for window in pcts.windows(2) {
            assert!(window[1] >= window[0]);
        }
    }

    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[test]
    fn raw_activity_is_send() {
        assert_send::<RawLinkedinActivity>();
    }
}
