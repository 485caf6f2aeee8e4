//! Technographic fetch: cached BuiltWith-style technology lookup, with a
//! website-parser fallback for when the external API is unavailable or
//! returns nothing usable. Ported field-for-field (simplified) from the
//! original `builtwith_service.py`: technologies detected more than a
//! year ago are dropped, and a confidence score blends detection
//! recency, path count, and category count.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::api_cache::ApiCache;
use crate::error::EngineError;

const STALE_DETECTION_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnologyDetail {
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub is_premium: bool,
    pub confidence_score: f64,
    #[serde(default)]
    pub last_detected_days_ago: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnologyProfile {
    pub domain: String,
    pub technologies: Vec<TechnologyDetail>,
    pub categories: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub technology_count: usize,
    pub category_count: usize,
    pub premium_count: usize,
    pub average_confidence: f64,
    pub detection_quality: String,
}

impl QualityMetrics {
    fn from_profile(profile: &TechnologyProfile) -> Self {
        let technology_count = profile.technologies.len();
        let category_count = profile.categories.len();
        let premium_count = profile.technologies.iter().filter(|t| t.is_premium).count();
        let average_confidence = if technology_count == 0 {
            0.0
        } else {
            profile.technologies.iter().map(|t| t.confidence_score).sum::<f64>() / technology_count as f64
        };
        let detection_quality = if technology_count == 0 {
            "insufficient_data"
        } else if average_confidence >= 0.7 && technology_count >= 8 {
            "high"
        } else if average_confidence >= 0.4 {
            "medium"
        } else {
            "low"
        }
        .to_string();

        Self {
            technology_count,
            category_count,
            premium_count,
            average_confidence,
            detection_quality,
        }
    }
}

fn confidence_score(last_detected_days_ago: Option<i64>, path_count: usize, category_count: usize) -> f64 {
    let mut score = 0.5;
    if let Some(days) = last_detected_days_ago {
        score += match days {
            d if d <= 30 => 0.2,
            d if d <= 90 => 0.15,
            d if d <= 180 => 0.1,
            d if d <= 365 => 0.05,
            _ => 0.0,
        };
    }
    score += (path_count as f64 * 0.02).min(0.1);
    score += (category_count as f64 * 0.02).min(0.1);
    score.min(1.0)
}

#[async_trait]
pub trait TechnographicAdapter: Send + Sync {
    async fn get_technology_profile(
        &self,
        domain: &str,
        tenant_id: &str,
    ) -> Result<TechnologyProfile, EngineError>;
}

pub struct BuiltWithAdapter {
    cache: Arc<ApiCache>,
    api_key: String,
    cache_ttl_hours: i64,
}

impl BuiltWithAdapter {
    pub fn new(api_key: impl Into<String>, cache: Arc<ApiCache>) -> Self {
        Self {
            cache,
            api_key: api_key.into(),
            cache_ttl_hours: 24 * 30,
        }
    }

    fn parse_response(domain: &str, body: &Value) -> TechnologyProfile {
        let now = Utc::now();
        let mut profile = TechnologyProfile {
            domain: domain.to_string(),
            ..Default::default()
        };

        let results = body.get("Results").and_then(Value::as_array).cloned().unwrap_or_default();
        for result in &results {
            let techs = result.get("Technologies").and_then(Value::as_array).cloned().unwrap_or_default();
            for tech in &techs {
                let Some(name) = tech.get("Name").and_then(Value::as_str) else {
                    continue;
                };
                let last_detected_ms = tech.get("LastDetected").and_then(Value::as_i64);
                let days_ago = last_detected_ms.map(|ms| {
                    let detected = chrono::DateTime::from_timestamp_millis(ms).unwrap_or(now);
                    (now - detected).num_days()
                });
                if days_ago.is_some_and(|d| d > STALE_DETECTION_DAYS) {
                    continue;
                }

                let categories: Vec<String> = tech
                    .get("Categories")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|c| c.get("Name").and_then(Value::as_str).map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let path_count = tech.get("Paths").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
                let is_premium = tech
                    .get("IsPremium")
                    .and_then(Value::as_str)
                    .map(|s| s.eq_ignore_ascii_case("yes"))
                    .unwrap_or(false);

                for category in &categories {
                    profile
                        .categories
                        .entry(category.clone())
                        .or_default()
                        .push(name.to_string());
                }

                profile.technologies.push(TechnologyDetail {
                    name: name.to_string(),
                    confidence_score: confidence_score(days_ago, path_count, categories.len()),
                    categories,
                    is_premium,
                    last_detected_days_ago: days_ago,
                });
            }
        }
        profile
    }
}

#[async_trait]
impl TechnographicAdapter for BuiltWithAdapter {
    async fn get_technology_profile(
        &self,
        domain: &str,
        tenant_id: &str,
    ) -> Result<TechnologyProfile, EngineError> {
        let params = json!({ "KEY": self.api_key, "LOOKUP": domain });
        let headers = BTreeMap::new();
        let (body, status) = self
            .cache
            .cached_request(
                "https://api.builtwith.com/v21/api.json",
                "GET",
                &params,
                &headers,
                tenant_id,
                self.cache_ttl_hours,
                false,
            )
            .await?;

        if status == 429 || status >= 500 {
            return Err(EngineError::Retryable(crate::error::RetryableError::HttpStatus {
                status,
                url: "https://api.builtwith.com/v21/api.json".to_string(),
            }));
        }
        if status >= 400 {
            return Ok(TechnologyProfile {
                domain: domain.to_string(),
                ..Default::default()
            });
        }

        Ok(Self::parse_response(domain, &body))
    }
}

/// Fallback used when the BuiltWith-style lookup is unavailable: scrapes
/// `<script src>`/`<meta generator>` tags from the site's own HTML for a
/// short, low-confidence technology guess list.
pub struct WebsiteParserAdapter;

impl WebsiteParserAdapter {
    const KNOWN_MARKERS: &'static [(&'static str, &'static str)] = &[
        ("wp-content", "WordPress"),
        ("shopify", "Shopify"),
        ("cdn.segment.com", "Segment"),
        ("googletagmanager.com", "Google Tag Manager"),
        ("hubspot", "HubSpot"),
        ("react", "React"),
        ("__next", "Next.js"),
    ];

    pub fn parse_html(domain: &str, html: &str) -> TechnologyProfile {
        let document = scraper::Html::parse_document(html);
        let lower = html.to_ascii_lowercase();
        let mut profile = TechnologyProfile {
            domain: domain.to_string(),
            ..Default::default()
        };

        for (marker, name) in Self::KNOWN_MARKERS {
            if lower.contains(marker) {
                profile.technologies.push(TechnologyDetail {
                    name: name.to_string(),
                    categories: vec!["inferred".to_string()],
                    is_premium: false,
                    confidence_score: 0.3,
                    last_detected_days_ago: Some(0),
                });
            }
        }

        if let Ok(selector) = scraper::Selector::parse(r#"meta[name="generator"]"#) {
            if let Some(el) = document.select(&selector).next() {
                if let Some(content) = el.value().attr("content") {
                    profile.technologies.push(TechnologyDetail {
                        name: content.to_string(),
                        categories: vec!["cms".to_string()],
                        is_premium: false,
                        confidence_score: 0.4,
                        last_detected_days_ago: Some(0),
                    });
                }
            }
        }

        for tech in &profile.technologies {
            for category in &tech.categories {
                profile.categories.entry(category.clone()).or_default().push(tech.name.clone());
            }
        }
        profile
    }
}

pub fn quality_metrics(profile: &TechnologyProfile) -> QualityMetrics {
    QualityMetrics::from_profile(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_detection_beats_stale_one_on_confidence() {
        let recent = confidence_score(Some(10), 0, 0);
        let stale = confidence_score(Some(300), 0, 0);
        assert!(recent > stale);
    }

    #[test]
    fn quality_metrics_on_empty_profile_is_insufficient() {
        let profile = TechnologyProfile::default();
        let metrics = quality_metrics(&profile);
        assert_eq!(metrics.detection_quality, "insufficient_data");
    }

    #[test]
    fn website_parser_detects_known_markers() {
        let html = r#"<html><head><meta name="generator" content="WordPress 6.0"></head>
            <body><script src="/wp-content/themes/foo.js"></script></body></html>"#;
        let profile = WebsiteParserAdapter::parse_html("acme.com", html);
        assert!(profile.technologies.iter().any(|t| t.name == "WordPress"));
        assert!(profile.technologies.iter().any(|t| t.name.contains("WordPress")));
    }

    #[test]
    fn parse_response_drops_stale_technologies() {
        let now_ms = Utc::now().timestamp_millis();
        let stale_ms = now_ms - (400 * 24 * 60 * 60 * 1000);
        let body = json!({
            "Results": [{
                "Technologies": [
                    {"Name": "Fresh", "LastDetected": now_ms, "Categories": [], "Paths": []},
                    {"Name": "Stale", "LastDetected": stale_ms, "Categories": [], "Paths": []},
                ]
            }]
        });
        let profile = BuiltWithAdapter::parse_response("acme.com", &body);
        let names: Vec<_> = profile.technologies.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"Fresh"));
        assert!(!names.contains(&"Stale"));
    }
}
