//! Scenarios A and B: custom-column generation for a single entity,
//! exercised through the public `CustomColumnRunner` surface end to end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use enrichment_engine::callback::{CallbackStatus, RecordingCallbackSink};
use enrichment_engine::column::{Column, ResponseConfig, ResponseType};
use enrichment_engine::llm::{
    GenerateContentRequest, GenerateSearchRequest, LlmProvider, StructuredSearchRequest, TokenUsage,
};
use enrichment_engine::task::{AiConfig, TaskPayload};
use enrichment_engine::tasks::custom_column::StaticProviderRegistry;
use enrichment_engine::tasks::CustomColumnRunner;
use enrichment_engine::types::{EntityKind, EnrichmentType};

/// Answers every structured call with a fixed JSON payload, never
/// touching the network, so scenarios A/B run fully offline.
struct FixedAnswer {
    value: Value,
}

fn usage() -> TokenUsage {
    TokenUsage {
        operation_tag: String::new(),
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        total_cost_in_usd: 0.0,
        provider: "fixed".to_string(),
    }
}

#[async_trait]
impl LlmProvider for FixedAnswer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn generate_content(
        &self,
        _request: GenerateContentRequest,
    ) -> Result<(Value, TokenUsage), enrichment_engine::error::EngineError> {
        Ok((self.value.clone(), usage()))
    }

    async fn generate_search_content(
        &self,
        _request: GenerateSearchRequest,
    ) -> Result<(Value, TokenUsage), enrichment_engine::error::EngineError> {
        unimplemented!("scenarios A/B never set use_internet")
    }

    async fn generate_structured_search_content(
        &self,
        _request: StructuredSearchRequest,
    ) -> Result<(Value, TokenUsage), enrichment_engine::error::EngineError> {
        unimplemented!("scenarios A/B never set use_internet")
    }
}

fn hq_city_column() -> Column {
    Column {
        id: "hq_city".to_string(),
        entity_type: EntityKind::Account,
        response_type: ResponseType::String,
        response_config: ResponseConfig::default(),
        question: "What is the HQ city?".to_string(),
        description: String::new(),
        ai_config: AiConfig::default(),
        uses_linkedin_activity: false,
        last_refresh: None,
    }
}

fn payload_for(column: Column, entity_id: &str, context: Value) -> TaskPayload {
    let mut context_data = HashMap::new();
    context_data.insert(entity_id.to_string(), context);
    TaskPayload {
        job_id: "job-scenario".to_string(),
        enrichment_type: EnrichmentType::CustomColumn,
        entity_ids: vec![entity_id.to_string()],
        context_data,
        tenant_id: "tenant-1".to_string(),
        batch_size: 10,
        concurrent_requests: 5,
        ai_config: AiConfig::default(),
        column: Some(column),
        orchestration_data: None,
        attempt_number: 0,
        max_retries: 3,
    }
}

#[tokio::test]
async fn scenario_a_structured_string_single_entity() {
    let provider: Arc<dyn LlmProvider> = Arc::new(FixedAnswer {
        value: json!({
            "analysis": "found it",
            "rationale": "company profile lists headquarters in Boston",
            "value": "Boston",
            "confidence_score": 0.82,
        }),
    });
    let registry = StaticProviderRegistry::new(provider);
    let sink = Arc::new(RecordingCallbackSink::new());
    let runner = CustomColumnRunner::new(registry, None, sink.clone());

    let context = json!({"company": {"name": "Acme", "hq": {"city": "Boston"}}});
    let payload = payload_for(hq_city_column(), "E1", context);

    runner
        .run(payload, tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events().await;
    let completed = events
        .iter()
        .find(|e| e.status == CallbackStatus::Completed)
        .expect("a completed callback is emitted");

    let values = completed.processed_data["values"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    let value = &values[0];
    assert_eq!(value["entity_id"], json!("E1"));
    assert_eq!(value["value_string"], json!("Boston"));
    assert_eq!(value["status"], json!("completed"));
    let confidence = value["confidence_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(!value["rationale"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_b_enum_with_allowed_values_accepts_exact_match() {
    let provider: Arc<dyn LlmProvider> = Arc::new(FixedAnswer {
        value: json!({"value": "Medium", "confidence_score": 0.7, "rationale": "mid-size signals"}),
    });
    let registry = StaticProviderRegistry::new(provider);
    let sink = Arc::new(RecordingCallbackSink::new());
    let runner = CustomColumnRunner::new(registry, None, sink.clone());

    let mut column = hq_city_column();
    column.id = "deal_size".to_string();
    column.response_type = ResponseType::Enum;
    column.response_config = ResponseConfig {
        allowed_values: Some(vec!["High".to_string(), "Medium".to_string(), "Low".to_string(), "Unknown".to_string()]),
        ..Default::default()
    };
    let payload = payload_for(column, "E1", json!({}));

    runner
        .run(payload, tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events().await;
    let completed = events.iter().find(|e| e.status == CallbackStatus::Completed).unwrap();
    let value = &completed.processed_data["values"][0];
    assert_eq!(value["value_enum"], json!("Medium"));
    assert_eq!(value["status"], json!("completed"));
}

#[tokio::test]
async fn scenario_b_enum_outside_allowed_values_is_recorded_advisory_not_rejected() {
    let provider: Arc<dyn LlmProvider> = Arc::new(FixedAnswer {
        value: json!({"value": "Moderate", "confidence_score": 0.6, "rationale": "between tiers"}),
    });
    let registry = StaticProviderRegistry::new(provider);
    let sink = Arc::new(RecordingCallbackSink::new());
    let runner = CustomColumnRunner::new(registry, None, sink.clone());

    let mut column = hq_city_column();
    column.id = "deal_size".to_string();
    column.response_type = ResponseType::Enum;
    column.response_config = ResponseConfig {
        allowed_values: Some(vec!["High".to_string(), "Medium".to_string(), "Low".to_string(), "Unknown".to_string()]),
        ..Default::default()
    };
    let payload = payload_for(column, "E1", json!({}));

    runner
        .run(payload, tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events().await;
    let completed = events.iter().find(|e| e.status == CallbackStatus::Completed).unwrap();
    let value = &completed.processed_data["values"][0];
    // Not one of the allowed values, recorded as-is rather than rejected.
    assert_eq!(value["value_enum"], json!("Moderate"));
    assert_eq!(value["status"], json!("completed"));
}
