//! Custom-column task (§4.9): runs one column's question against a
//! batch of entities, composing structured or unstructured prompts,
//! invoking the LLM (search-grounded when the column asks for it), and
//! coercing the answer to the column's declared `response_type`.
//!
//! Custom-column results are recomputed on every run and never written
//! to the result store; the completed callback is the only durable
//! trace of a run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::adapters::LinkedinAdapter;
use crate::batch::{self, BatchMetrics, ErrorClass, ProgressReporter};
use crate::callback::{CallbackEvent, CallbackSink};
use crate::column::{Column, CustomColumnStatus, CustomColumnValue, ResponseConfig, ResponseType};
use crate::error::{EngineError, ValidationError};
use crate::llm::json_repair::repair_json;
use crate::llm::provider::{GenerateContentRequest, GenerateSearchRequest, LlmProvider, Prompt};
use crate::task::TaskPayload;
use crate::types::{EntityKind, EntityRef, EnrichmentType, ThinkingBudget};

/// Resolves an `ai_config.model` against an allow-list of configured
/// providers. `None` (no override) resolves to the caller's default.
pub trait ProviderRegistry: Send + Sync {
    fn resolve(&self, model: Option<&str>) -> Result<Arc<dyn LlmProvider>, EngineError>;
}

/// A registry backed by a static `model -> provider` map plus a default.
pub struct StaticProviderRegistry {
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
    default_provider: Arc<dyn LlmProvider>,
}

impl StaticProviderRegistry {
    pub fn new(default_provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(model.into(), provider);
        self
    }
}

impl ProviderRegistry for StaticProviderRegistry {
    fn resolve(&self, model: Option<&str>) -> Result<Arc<dyn LlmProvider>, EngineError> {
        match model {
            None => Ok(self.default_provider.clone()),
            Some(m) => self
                .providers
                .get(m)
                .cloned()
                .ok_or_else(|| EngineError::Validation(ValidationError::UnsupportedModel { model: m.to_string() })),
        }
    }
}

/// Cast/parse/validate a raw LLM answer against a column's declared
/// `response_type`. Returns the coerced JSON value plus an optional
/// warning string (attached to the rationale, never rejecting the
/// entity outright — enum validation in particular is advisory).
pub fn coerce_value(response_type: ResponseType, raw: &Value, config: &ResponseConfig) -> (Value, Option<String>) {
    match response_type {
        ResponseType::String => {
            let s = match raw {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (Value::String(s), None)
        }
        ResponseType::JsonObject => match raw {
            Value::Object(_) | Value::Array(_) => (raw.clone(), None),
            Value::String(s) => {
                let repaired = repair_json(s);
                if repaired.as_object().is_some_and(|m| m.is_empty()) {
                    (Value::String(s.clone()), Some("could not parse value as JSON".to_string()))
                } else {
                    (repaired, None)
                }
            }
            other => (other.clone(), Some("expected a json object".to_string())),
        },
        ResponseType::Boolean => match raw {
            Value::Bool(b) => (Value::Bool(*b), None),
            Value::Number(n) => (Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0), None),
            Value::String(s) => {
                let lower = s.trim().to_ascii_lowercase();
                match lower.as_str() {
                    "true" | "yes" | "1" => (Value::Bool(true), None),
                    "false" | "no" | "0" => (Value::Bool(false), None),
                    _ => (Value::Bool(false), Some(format!("could not parse '{s}' as boolean"))),
                }
            }
            other => (Value::Bool(false), Some(format!("expected boolean, got {other}"))),
        },
        ResponseType::Number => match raw {
            Value::Number(n) => (Value::Number(n.clone()), None),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => (json!(n), None),
                Err(_) => (Value::Null, Some(format!("'{s}' is not numeric"))),
            },
            other => (Value::Null, Some(format!("expected number, got {other}"))),
        },
        ResponseType::Enum => {
            let raw_str = match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match &config.allowed_values {
                Some(allowed) if !allowed.is_empty() => {
                    match allowed.iter().find(|a| a.eq_ignore_ascii_case(&raw_str)) {
                        Some(matched) => (Value::String(matched.clone()), None),
                        None => (
                            Value::String(raw_str.clone()),
                            Some(format!("'{raw_str}' is not one of the allowed values")),
                        ),
                    }
                }
                _ => (Value::String(raw_str), None),
            }
        }
    }
}

fn response_shape_hint(response_type: ResponseType, config: &ResponseConfig) -> String {
    let mut hint = match response_type {
        ResponseType::String => "a short string".to_string(),
        ResponseType::JsonObject => "a JSON object".to_string(),
        ResponseType::Boolean => "true or false".to_string(),
        ResponseType::Number => "a number".to_string(),
        ResponseType::Enum => match &config.allowed_values {
            Some(values) => format!("one of: {}", values.join(", ")),
            None => "a short categorical label".to_string(),
        },
    };
    if !config.validation_rules.is_empty() {
        hint.push_str(&format!(" ({})", config.validation_rules.join("; ")));
    }
    hint
}

fn compose_system_prompt(column: &Column, use_internet: bool, unstructured: bool) -> String {
    let web_policy = if use_internet {
        "You may use web search results provided to you; cite sources when you rely on them."
    } else {
        "Answer using only the provided context; do not assume access to the live internet."
    };
    let shape = response_shape_hint(column.response_type, &column.response_config);
    if unstructured {
        format!(
            "You are answering a custom data-enrichment question about a business entity.\n\
             Respond in markdown with your answer first, then a `Rationale:` section and, if \
             applicable, a `Sources:` section. State your confidence as \"high confidence\", \
             \"medium confidence\", or \"low confidence\" somewhere in the rationale.\n\
             Expected answer shape: {shape}.\n{web_policy}"
        )
    } else {
        format!(
            "You are answering a custom data-enrichment question about a business entity.\n\
             Respond with a single JSON object: {{\"analysis\": string, \"rationale\": string, \
             \"value\": <answer>, \"confidence_score\": number in [0,1]}}.\n\
             \"value\" must be {shape}.\n{web_policy}"
        )
    }
}

fn compose_user_prompt(column: &Column, entity_context: &Value) -> String {
    let mut examples = String::new();
    if !column.response_config.examples.is_empty() {
        examples = format!("\nExamples of good answers:\n- {}", column.response_config.examples.join("\n- "));
    }
    format!(
        "Entity context:\n{}\n\nQuestion: {}\nDescription: {}{}",
        serde_json::to_string_pretty(entity_context).unwrap_or_default(),
        column.question,
        column.description,
        examples
    )
}

/// Heuristic confidence/rationale/sources split for the unstructured
/// answer mode: the free-form "Rationale:"/"Sources:" sections and a
/// `"high|medium|low confidence"` cue somewhere in the text.
fn parse_unstructured_answer(text: &str) -> (String, String, Option<String>, f32) {
    let (value_part, rest) = match text.find("Rationale:") {
        Some(idx) => (text[..idx].trim().to_string(), text[idx..].to_string()),
        None => (text.trim().to_string(), String::new()),
    };
    let rationale = rest
        .split("Sources:")
        .next()
        .unwrap_or(&rest)
        .trim_start_matches("Rationale:")
        .trim()
        .to_string();
    let sources = rest.find("Sources:").map(|idx| rest[idx..].trim_start_matches("Sources:").trim().to_string());

    let lower = text.to_ascii_lowercase();
    let confidence = if lower.contains("high confidence") {
        0.9
    } else if lower.contains("medium confidence") {
        0.6
    } else if lower.contains("low confidence") {
        0.3
    } else {
        0.5
    };
    (value_part, rationale, sources, confidence)
}

pub struct CustomColumnRunner<Reg, Sink> {
    providers: Reg,
    linkedin: Option<Arc<dyn LinkedinAdapter>>,
    callback_sink: Sink,
}

impl<Reg, Sink> CustomColumnRunner<Reg, Sink>
where
    Reg: ProviderRegistry,
    Sink: CallbackSink,
{
    pub fn new(providers: Reg, linkedin: Option<Arc<dyn LinkedinAdapter>>, callback_sink: Sink) -> Self {
        Self {
            providers,
            linkedin,
            callback_sink,
        }
    }

    #[instrument(skip(self, payload, cancellation), fields(job_id = %payload.job_id, tenant_id = %payload.tenant_id))]
    pub async fn run(&self, payload: TaskPayload, cancellation: CancellationToken) -> Result<(), EngineError> {
        let column = payload
            .column
            .clone()
            .ok_or(ValidationError::MissingField { field: "column" })?;
        let provider = self.providers.resolve(column.ai_config.model.as_deref())?;

        let entity_kind = column.entity_type;
        let entities: Vec<EntityRef> = payload
            .entity_ids
            .iter()
            .map(|id| EntityRef {
                kind: entity_kind,
                id: id.clone(),
            })
            .collect();

        let progress_log: Arc<StdMutex<Vec<(usize, usize, f32)>>> = Arc::new(StdMutex::new(Vec::new()));
        let progress_log_for_reporter = progress_log.clone();
        let reporter = move |batch_index: usize, num_batches: usize, pct: f32| {
            progress_log_for_reporter.lock().unwrap().push((batch_index, num_batches, pct));
        };

        let column_for_op = column.clone();
        let provider_for_op = provider.clone();
        let linkedin_for_op = self.linkedin.clone();
        let tenant_id = payload.tenant_id.clone();
        let context_data = payload.context_data.clone();

        let outcome = batch::process_in_batches(
            &entities,
            payload.batch_size,
            payload.effective_concurrency(),
            cancellation,
            reporter,
            move |entity: EntityRef| {
                let column = column_for_op.clone();
                let provider = provider_for_op.clone();
                let linkedin = linkedin_for_op.clone();
                let tenant_id = tenant_id.clone();
                let entity_context = context_data.get(&entity.id).cloned().unwrap_or(Value::Null);
                async move {
                    run_one_entity(&column, provider.as_ref(), linkedin.as_deref(), &tenant_id, &entity, entity_context)
                        .await
                }
            },
        )
        .await;

        // The callback protocol's `account_id` is a single-entity field;
        // a custom-column run spans every entity in `payload.entity_ids`,
        // so the batch-level progress/completion events are keyed by the
        // first entity and the full set travels in `processed_data`.
        let primary_entity_id = payload.entity_ids.first().cloned().unwrap_or_default();

        for (batch_index, num_batches, pct) in progress_log.lock().unwrap().iter().copied() {
            let event = CallbackEvent::processing(
                payload.job_id.clone(),
                primary_entity_id.clone(),
                EnrichmentType::CustomColumn,
                "custom_column",
                pct,
                json!({ "batch_index": batch_index, "num_batches": num_batches }),
            );
            self.callback_sink.emit(event).await?;
        }

        let values: Vec<CustomColumnValue> = outcome.values.into_iter().map(|(_, v)| v).collect();
        let processed_data = json!({
            "values": values,
            "metrics": outcome.metrics,
        });

        let mut event = CallbackEvent::completed(
            payload.job_id.clone(),
            primary_entity_id,
            EnrichmentType::CustomColumn,
            "custom_column",
            processed_data,
        );
        if let Some(orch) = payload.orchestration_data.clone() {
            if !orch.next_columns.is_empty() {
                event = event.with_orchestration_data(orch);
            }
        }
        self.callback_sink.emit(event).await?;
        Ok(())
    }
}

async fn run_one_entity(
    column: &Column,
    provider: &dyn LlmProvider,
    linkedin: Option<&dyn LinkedinAdapter>,
    tenant_id: &str,
    entity: &EntityRef,
    mut entity_context: Value,
) -> Result<(CustomColumnValue, Option<f64>), (ErrorClass, String)> {
    if column.uses_linkedin_activity {
        if let Some(linkedin) = linkedin {
            let profile_url = entity_context.get("linkedin_url").and_then(Value::as_str).map(str::to_string);
            if let Some(profile_url) = profile_url {
                match linkedin.fetch_recent_activity(&profile_url, tenant_id).await {
                    Ok(activity) => {
                        if let Value::Object(map) = &mut entity_context {
                            map.insert(
                                "linkedin_recent_activity".to_string(),
                                json!({
                                    "posts_html": activity.posts_html,
                                    "comments_html": activity.comments_html,
                                    "reactions_html": activity.reactions_html,
                                }),
                            );
                        }
                    }
                    Err(err) => {
                        return Err((ErrorClass::Api, format!("linkedin fetch failed: {err}")));
                    }
                }
            }
        }
    }

    let unstructured = column.ai_config.unstructured;
    let system = compose_system_prompt(column, column.ai_config.use_internet, unstructured);
    let user = compose_user_prompt(column, &entity_context);
    let operation_tag = format!("custom_column:{}:{}", column.id, entity.id);

    let (raw_value, rationale_hint, sources, confidence_hint) = if column.ai_config.use_internet {
        let request = GenerateSearchRequest {
            prompt: Prompt::split(system, user),
            search_context_size: Default::default(),
            user_location: None,
            operation_tag,
            temperature: Some(0.0),
            tenant_id: tenant_id.to_string(),
            force_refresh: false,
        };
        let (value, _usage) = provider
            .generate_search_content(request)
            .await
            .map_err(|e| (ErrorClass::Ai, e.to_string()))?;
        let answer = value.get("answer").and_then(Value::as_str).unwrap_or_default().to_string();
        let sources = value
            .get("_search_metadata")
            .and_then(|m| m.get("sources"))
            .cloned();
        if unstructured {
            let (v, rationale, src_text, conf) = parse_unstructured_answer(&answer);
            (Value::String(v), Some(rationale), src_text, Some(conf))
        } else {
            let repaired = repair_json(&answer);
            (repaired, None, sources.map(|s| s.to_string()), None)
        }
    } else {
        let request = GenerateContentRequest {
            prompt: Prompt::split(system, user),
            is_json: !unstructured,
            operation_tag,
            temperature: None,
            thinking_budget: Some(ThinkingBudget::Zero),
            tenant_id: tenant_id.to_string(),
            force_refresh: false,
        };
        let (value, _usage) = provider
            .generate_content(request)
            .await
            .map_err(|e| (ErrorClass::Ai, e.to_string()))?;
        if unstructured {
            let text = value.as_str().unwrap_or_default();
            let (v, rationale, src_text, conf) = parse_unstructured_answer(text);
            (Value::String(v), Some(rationale), src_text, Some(conf))
        } else {
            (value, None, None, None)
        }
    };

    let (raw_answer_value, rationale, confidence_score) = if unstructured {
        (raw_value, rationale_hint.unwrap_or_default(), confidence_hint.unwrap_or(0.5))
    } else {
        let rationale = raw_value.get("rationale").and_then(Value::as_str).unwrap_or_default().to_string();
        let confidence = raw_value.get("confidence_score").and_then(Value::as_f64).unwrap_or(0.5) as f32;
        let value = raw_value.get("value").cloned().unwrap_or(Value::Null);
        (value, rationale, confidence)
    };

    let (coerced, warning) = coerce_value(column.response_type, &raw_answer_value, &column.response_config);
    let mut rationale = rationale;
    if let Some(warning) = warning {
        rationale = format!("{rationale} [warning: {warning}]").trim().to_string();
    }
    if let Some(sources) = sources {
        rationale = format!("{rationale}\nSources: {sources}").trim().to_string();
    }

    let confidence = CustomColumnValue::clamp_confidence(confidence_score);
    let mut value = CustomColumnValue {
        column_id: column.id.clone(),
        entity_id: entity.id.clone(),
        value_string: None,
        value_json: None,
        value_boolean: None,
        value_number: None,
        value_enum: None,
        confidence_score: confidence,
        rationale,
        status: CustomColumnStatus::Completed,
        error_details: None,
        generated_at: chrono::Utc::now(),
    };
    match column.response_type {
        ResponseType::String => value.value_string = coerced.as_str().map(str::to_string),
        ResponseType::JsonObject => value.value_json = Some(coerced),
        ResponseType::Boolean => value.value_boolean = coerced.as_bool(),
        ResponseType::Number => value.value_number = coerced.as_f64(),
        ResponseType::Enum => value.value_enum = coerced.as_str().map(str::to_string),
    }

    Ok((value, Some(confidence as f64)))
}
