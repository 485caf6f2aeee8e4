//! Generic web-search adapter, used for LinkedIn URL discovery during
//! account enhancement (§4.10). Wraps a search API behind the cache so
//! repeated lookups for the same query/domain don't re-hit the provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::cache::api_cache::ApiCache;
use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn search(&self, query: &str, tenant_id: &str) -> Result<Vec<SearchResult>, EngineError>;

    /// Best-effort LinkedIn company-page URL for a domain, derived from a
    /// `site:linkedin.com/company "<domain>"`-style query. `None` when no
    /// result plausibly matches.
    async fn find_linkedin_company_url(
        &self,
        domain: &str,
        tenant_id: &str,
    ) -> Result<Option<String>, EngineError> {
        let query = format!("site:linkedin.com/company {domain}");
        let results = self.search(&query, tenant_id).await?;
        Ok(results
            .into_iter()
            .find(|r| r.url.contains("linkedin.com/company"))
            .map(|r| r.url))
    }
}

pub struct HttpSearchAdapter {
    cache: Arc<ApiCache>,
    api_key: String,
    endpoint: String,
    cache_ttl_hours: i64,
}

impl HttpSearchAdapter {
    pub fn new(api_key: impl Into<String>, cache: Arc<ApiCache>) -> Self {
        Self {
            cache,
            api_key: api_key.into(),
            endpoint: "https://serpapi.com/search".to_string(),
            cache_ttl_hours: 24 * 7,
        }
    }
}

#[async_trait]
impl SearchAdapter for HttpSearchAdapter {
    async fn search(&self, query: &str, tenant_id: &str) -> Result<Vec<SearchResult>, EngineError> {
        let params = json!({ "q": query, "api_key": self.api_key, "engine": "google" });
        let headers = BTreeMap::new();
        let (body, status) = self
            .cache
            .cached_request(&self.endpoint, "GET", &params, &headers, tenant_id, self.cache_ttl_hours, false)
            .await?;

        if status >= 400 {
            return Err(EngineError::Retryable(crate::error::RetryableError::HttpStatus {
                status,
                url: self.endpoint.clone(),
            }));
        }

        let organic = body
            .get("organic_results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let results = organic
            .into_iter()
            .filter_map(|entry| {
                let title = entry.get("title")?.as_str()?.to_string();
                let url = entry.get("link")?.as_str()?.to_string();
                let snippet = entry.get("snippet").and_then(Value::as_str).map(str::to_string);
                Some(SearchResult { title, url, snippet })
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct StubSearch {
        results: Vec<SearchResult>,
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchAdapter for StubSearch {
        async fn search(&self, query: &str, _tenant_id: &str) -> Result<Vec<SearchResult>, EngineError> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.results.clone())
        }
    }

    #[tokio::test]
    async fn finds_first_matching_linkedin_company_url() {
        let adapter = StubSearch {
            results: vec![
                SearchResult {
                    title: "Acme homepage".to_string(),
                    url: "https://acme.com".to_string(),
                    snippet: None,
                },
                SearchResult {
                    title: "Acme on LinkedIn".to_string(),
                    url: "https://www.linkedin.com/company/acme".to_string(),
                    snippet: None,
                },
            ],
            calls: StdMutex::new(Vec::new()),
        };
        let found = adapter.find_linkedin_company_url("acme.com", "tenant-1").await.unwrap();
        assert_eq!(found, Some("https://www.linkedin.com/company/acme".to_string()));
    }

    #[tokio::test]
    async fn none_when_no_linkedin_result() {
        let adapter = StubSearch {
            results: vec![SearchResult {
                title: "Acme homepage".to_string(),
                url: "https://acme.com".to_string(),
                snippet: None,
            }],
            calls: StdMutex::new(Vec::new()),
        };
        let found = adapter.find_linkedin_company_url("acme.com", "tenant-1").await.unwrap();
        assert_eq!(found, None);
    }
}
