//! Web-profile fetch: the first stage of account enhancement (§4.10).
//! Pulls the raw HTML of a company's public site so the task pipeline can
//! hand it to the LLM for structured-JSON extraction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::api_cache::ApiCache;
use crate::error::EngineError;

/// Raw HTML captured for one company domain, plus when it was fetched.
#[derive(Debug, Clone)]
pub struct WebProfile {
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileAdapter: Send + Sync {
    async fn fetch_web_profile(&self, domain: &str, tenant_id: &str) -> Result<WebProfile, EngineError>;
}

pub struct HttpProfileAdapter {
    cache: std::sync::Arc<ApiCache>,
    cache_ttl_hours: i64,
}

impl HttpProfileAdapter {
    pub fn new(cache: std::sync::Arc<ApiCache>) -> Self {
        Self {
            cache,
            cache_ttl_hours: 24 * 7,
        }
    }

    fn url_for(domain: &str) -> String {
        if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }
}

#[async_trait]
impl ProfileAdapter for HttpProfileAdapter {
    async fn fetch_web_profile(&self, domain: &str, tenant_id: &str) -> Result<WebProfile, EngineError> {
        let url = Self::url_for(domain);
        let headers = BTreeMap::new();
        let (html, status) = self
            .cache
            .cached_request_text(&url, "GET", &Value::Null, &headers, tenant_id, self.cache_ttl_hours, false)
            .await?;

        if status >= 400 {
            return Err(EngineError::Retryable(crate::error::RetryableError::HttpStatus {
                status,
                url,
            }));
        }

        Ok(WebProfile {
            url,
            html,
            fetched_at: Utc::now(),
        })
    }
}
