//! LinkedIn-activity task (§4.10): parses a lead's recent posts,
//! comments, and reactions into typed `LinkedInActivity` records, drops
//! anything older than the activity cutoff, and asks the LLM for a
//! single `Insights` summary over what remains.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use crate::adapters::LinkedinAdapter;
use crate::callback::{CallbackEvent, CallbackSink, ErrorDetails};
use crate::error::EngineError;
use crate::llm::provider::{GenerateContentRequest, LlmProvider, Prompt};
use crate::task::TaskPayload;
use crate::types::{EnrichmentType, ThinkingBudget};

/// 15 months, approximated in days since `chrono::Months` arithmetic on
/// `DateTime<Utc>` isn't available without the `clock` feature split; a
/// day-count cutoff is precise enough for "drop stale activity".
const ACTIVITY_CUTOFF_DAYS: i64 = 456;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Post,
    Comment,
    Reaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedInActivity {
    pub kind: ActivityKind,
    pub raw_text: String,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    pub summary: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub company_focus: Option<String>,
    #[serde(default)]
    pub mentioned_people: Vec<String>,
    #[serde(default)]
    pub mentioned_products: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insights {
    pub personality: String,
    pub areas_of_interest: Vec<String>,
    pub engaged_colleagues: Vec<String>,
    pub engaged_products: Vec<String>,
    pub outreach_recommendation: String,
    pub personalization_signals: Vec<String>,
}

/// Best-effort split of an activity feed's HTML into one text block per
/// item. Tries a few selectors common to feed markup in order, falling
/// back to the page's whole text when none match, so a single large
/// block is still analysed rather than silently dropped.
fn split_blocks(html: &str) -> Vec<String> {
    if html.trim().is_empty() {
        return Vec::new();
    }
    let document = scraper::Html::parse_fragment(html);
    for selector_str in ["article", "li", "div.activity-item", "div.feed-shared-update-v2"] {
        if let Ok(selector) = scraper::Selector::parse(selector_str) {
            let blocks: Vec<String> = document
                .select(&selector)
                .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !blocks.is_empty() {
                return blocks;
            }
        }
    }
    let whole = document.root_element().text().collect::<Vec<_>>().join(" ").trim().to_string();
    if whole.is_empty() { Vec::new() } else { vec![whole] }
}

fn is_stale(publish_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match publish_date {
        Some(date) => (now - date).num_days() > ACTIVITY_CUTOFF_DAYS,
        None => false,
    }
}

const STAGE_PERCENTAGES: [f32; 5] = [20.0, 45.0, 60.0, 75.0, 90.0];

pub struct LinkedinActivityRunner<Linkedin, Sink> {
    linkedin: Arc<Linkedin>,
    llm: Arc<dyn LlmProvider>,
    callback_sink: Sink,
}

impl<Linkedin, Sink> LinkedinActivityRunner<Linkedin, Sink>
where
    Linkedin: LinkedinAdapter,
    Sink: CallbackSink,
{
    pub fn new(linkedin: Arc<Linkedin>, llm: Arc<dyn LlmProvider>, callback_sink: Sink) -> Self {
        Self { linkedin, llm, callback_sink }
    }

    #[instrument(skip(self, payload), fields(job_id = %payload.job_id, tenant_id = %payload.tenant_id))]
    pub async fn run(&self, payload: TaskPayload) -> Result<(), EngineError> {
        let lead_id = match payload.entity_ids.first() {
            Some(id) => id.clone(),
            None => {
                let event = CallbackEvent::failed(
                    payload.job_id.clone(),
                    String::new(),
                    EnrichmentType::LeadLinkedinResearch,
                    "linkedin_activity",
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
        let profile_url = payload
            .context_data
            .get(&lead_id)
            .and_then(|v| v.get("linkedin_url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(profile_url) = profile_url else {
            let event = CallbackEvent::failed(
                payload.job_id.clone(),
                lead_id,
                EnrichmentType::LeadLinkedinResearch,
                "linkedin_activity",
                ErrorDetails {
                    error_type: "validation".to_string(),
                    message: "no linkedin_url in context_data".to_string(),
                    stage: Some("start".to_string()),
                    processing_time_s: None,
                },
            );
            self.callback_sink.emit(event).await?;
            return Ok(());
        };

        match self.run_stages(&payload, &lead_id, &profile_url).await {
            Ok((activities, insights)) => {
                let event = CallbackEvent::completed(
                    payload.job_id.clone(),
                    lead_id,
                    EnrichmentType::LeadLinkedinResearch,
                    "linkedin_activity",
                    json!({ "activities": activities, "insights": insights }),
                );
                self.callback_sink.emit(event).await?;
                Ok(())
            }
            Err((stage, err)) => {
                let event = CallbackEvent::failed(
                    payload.job_id.clone(),
                    lead_id,
                    EnrichmentType::LeadLinkedinResearch,
                    "linkedin_activity",
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

    async fn report(
        &self,
        payload: &TaskPayload,
        lead_id: &str,
        stage_index: usize,
        label: &str,
    ) -> Result<(), EngineError> {
        let event = CallbackEvent::processing(
            payload.job_id.clone(),
            lead_id.to_string(),
            EnrichmentType::LeadLinkedinResearch,
            "linkedin_activity",
            STAGE_PERCENTAGES[stage_index],
            json!({ "stage": label }),
        );
        self.callback_sink.emit(event).await
    }

    async fn run_stages(
        &self,
        payload: &TaskPayload,
        lead_id: &str,
        profile_url: &str,
    ) -> Result<(Vec<LinkedInActivity>, Insights), (&'static str, EngineError)> {
        self.report(payload, lead_id, 0, "fetch_activity").await.map_err(|e| ("fetch_activity", e))?;
        let raw = self
            .linkedin
            .fetch_recent_activity(profile_url, &payload.tenant_id)
            .await
            .map_err(|e| ("fetch_activity", e))?;

        let now = Utc::now();
        let mut activities = Vec::new();

        self.report(payload, lead_id, 1, "parse_posts").await.map_err(|e| ("parse_posts", e))?;
        for block in split_blocks(&raw.posts_html) {
            activities.push(self.analyze_block(payload, ActivityKind::Post, block).await.map_err(|e| ("parse_posts", e))?);
        }

        self.report(payload, lead_id, 2, "parse_comments").await.map_err(|e| ("parse_comments", e))?;
        for block in split_blocks(&raw.comments_html) {
            activities.push(
                self.analyze_block(payload, ActivityKind::Comment, block).await.map_err(|e| ("parse_comments", e))?,
            );
        }

        self.report(payload, lead_id, 3, "parse_reactions").await.map_err(|e| ("parse_reactions", e))?;
        for block in split_blocks(&raw.reactions_html) {
            activities.push(
                self.analyze_block(payload, ActivityKind::Reaction, block).await.map_err(|e| ("parse_reactions", e))?,
            );
        }

        activities.retain(|a| !is_stale(a.publish_date, now));

        self.report(payload, lead_id, 4, "generate_insights").await.map_err(|e| ("generate_insights", e))?;
        let insights = self.generate_insights(payload, &activities).await.map_err(|e| ("generate_insights", e))?;

        Ok((activities, insights))
    }

    async fn analyze_block(
        &self,
        payload: &TaskPayload,
        kind: ActivityKind,
        raw_text: String,
    ) -> Result<LinkedInActivity, EngineError> {
        let system = "Extract structured metadata from one LinkedIn activity item (a post, \
                       comment, or reaction). Respond with a single JSON object: \
                       {\"publish_date\": string|null (ISO 8601), \"summary\": string, \
                       \"category\": string|null, \"company_focus\": string|null, \
                       \"mentioned_people\": [string], \"mentioned_products\": [string]}.";
        let user = format!("Activity text:\n{raw_text}");
        let request = GenerateContentRequest {
            prompt: Prompt::split(system, user),
            is_json: true,
            operation_tag: format!("linkedin_activity:{kind:?}"),
            temperature: None,
            thinking_budget: Some(ThinkingBudget::Zero),
            tenant_id: payload.tenant_id.clone(),
            force_refresh: false,
        };
        let (value, _usage) = self.llm.generate_content(request).await?;

        let publish_date = value
            .get("publish_date")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let mentioned_people = value
            .get("mentioned_people")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let mentioned_products = value
            .get("mentioned_products")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        Ok(LinkedInActivity {
            kind,
            raw_text,
            publish_date,
            summary: value.get("summary").and_then(Value::as_str).unwrap_or_default().to_string(),
            category: value.get("category").and_then(Value::as_str).map(str::to_string),
            company_focus: value.get("company_focus").and_then(Value::as_str).map(str::to_string),
            mentioned_people,
            mentioned_products,
            metadata: value,
        })
    }

    async fn generate_insights(
        &self,
        payload: &TaskPayload,
        activities: &[LinkedInActivity],
    ) -> Result<Insights, EngineError> {
        if activities.is_empty() {
            return Ok(Insights::default());
        }
        let system = "Given a lead's recent LinkedIn activity, produce a single JSON object: \
                       {\"personality\": string, \"areas_of_interest\": [string], \
                       \"engaged_colleagues\": [string], \"engaged_products\": [string], \
                       \"outreach_recommendation\": string, \"personalization_signals\": \
                       [string]}.";
        let user = format!(
            "Activity summaries:\n{}",
            serde_json::to_string_pretty(activities).unwrap_or_default()
        );
        let request = GenerateContentRequest {
            prompt: Prompt::split(system, user),
            is_json: true,
            operation_tag: "linkedin_activity:insights".to_string(),
            temperature: None,
            thinking_budget: Some(ThinkingBudget::Low),
            tenant_id: payload.tenant_id.clone(),
            force_refresh: false,
        };
        let (value, _usage) = self.llm.generate_content(request).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}
