//! Unified cached fetcher gating all outbound HTTP to third-party
//! providers. Ported field-for-field from the original
//! `ai_cache_service.py`-adjacent `api_cache_service.py`: header
//! sanitisation strips `Authorization`, `api-key`, and `x-api-key`
//! before hashing so rotating credentials never fragment the cache.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::cache_key;
use crate::error::EngineError;

/// Request headers, with the credential-bearing ones removed before
/// hashing. Call sites pass the full header set; sanitisation happens
/// inside `compute_key`.
const SANITISED_HEADERS: [&str; 3] = ["authorization", "api-key", "x-api-key"];

/// One stored external-API response.
#[derive(Debug, Clone)]
pub struct ApiCacheRecord {
    pub cache_key: String,
    pub method: String,
    pub url: String,
    pub params: Value,
    pub response_body: Value,
    pub response_status: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tenant_id: String,
}

fn sanitise_headers(headers: &BTreeMap<String, String>) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in headers {
        if SANITISED_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
            continue;
        }
        map.insert(k.clone(), json!(v));
    }
    Value::Object(map)
}

/// `cache_key = SHA256(sorted-JSON(url, params, sanitised-headers))`.
pub fn compute_key(
    url: &str,
    method: &str,
    params: &Value,
    headers: &BTreeMap<String, String>,
) -> String {
    let keying = json!({
        "url": url,
        "method": method,
        "params": params,
        "headers": sanitise_headers(headers),
    });
    cache_key(&keying)
}

/// Storage backend for the external-API cache.
enum Backend {
    InMemory(RwLock<FxHashMap<String, Vec<ApiCacheRecord>>>),
    #[cfg(feature = "sqlite")]
    Sql(crate::cache::sql_backend::SqlPool),
}

pub struct ApiCache {
    backend: Backend,
    http: reqwest::Client,
}

impl ApiCache {
    pub fn in_memory(http: reqwest::Client) -> Self {
        Self {
            backend: Backend::InMemory(RwLock::new(FxHashMap::default())),
            http,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sql(pool: crate::cache::sql_backend::SqlPool, http: reqwest::Client) -> Self {
        Self {
            backend: Backend::Sql(pool),
            http,
        }
    }

    /// Most-recent unexpired record for the given request shape, or
    /// `None` on miss/expiry.
    pub async fn get(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        tenant_id: &str,
    ) -> Result<Option<(Value, u16)>, EngineError> {
        let key = compute_key(url, method, params, headers);
        match &self.backend {
            Backend::InMemory(store) => {
                let guard = store.read().expect("lock poisoned");
                let now = Utc::now();
                Ok(guard
                    .get(&key)
                    .into_iter()
                    .flatten()
                    .filter(|r| r.tenant_id == tenant_id && r.expires_at > now)
                    .max_by_key(|r| r.created_at)
                    .map(|r| (r.response_body.clone(), r.response_status)))
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.get_api_cache(&key, tenant_id).await,
        }
    }

    pub async fn put(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        response: Value,
        status: u16,
        tenant_id: &str,
        ttl_hours: i64,
    ) -> Result<(), EngineError> {
        let key = compute_key(url, method, params, headers);
        let now = Utc::now();
        let record = ApiCacheRecord {
            cache_key: key.clone(),
            method: method.to_string(),
            url: url.to_string(),
            params: params.clone(),
            response_body: response,
            response_status: status,
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            tenant_id: tenant_id.to_string(),
        };
        match &self.backend {
            Backend::InMemory(store) => {
                let mut guard = store.write().expect("lock poisoned");
                guard.entry(key).or_default().push(record);
                Ok(())
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.put_api_cache(record).await,
        }
    }

    /// Check the cache; on miss (or `force_refresh`) perform the HTTP
    /// call through the shared connection pool, store the response on
    /// any `status < 400`, and return it. Transport errors propagate
    /// without being cached.
    #[instrument(skip(self, params, headers), fields(url, method))]
    pub async fn cached_request(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        tenant_id: &str,
        ttl_hours: i64,
        force_refresh: bool,
    ) -> Result<(Value, u16), EngineError> {
        if !force_refresh {
            if let Some(hit) = self.get(url, method, params, headers, tenant_id).await? {
                debug!(url, "api cache hit");
                return Ok(hit);
            }
        }

        let verb: Method = method.parse().unwrap_or(Method::GET);
        let mut req = self.http.request(verb, url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if let Value::Object(map) = params {
            req = req.query(&map.iter().collect::<Vec<_>>());
        }

        let resp = req.send().await.map_err(|e| {
            EngineError::Retryable(crate::error::RetryableError::Connection {
                message: e.to_string(),
            })
        })?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status < 400 {
            self.put(
                url, method, params, headers, body.clone(), status, tenant_id, ttl_hours,
            )
            .await?;
        }
        Ok((body, status))
    }

    /// Same contract as [`Self::cached_request`], but for endpoints that
    /// return a body that isn't JSON (HTML pages, for instance). The text
    /// is cached as a JSON string so the storage path stays uniform.
    #[instrument(skip(self, params, headers), fields(url, method))]
    pub async fn cached_request_text(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        tenant_id: &str,
        ttl_hours: i64,
        force_refresh: bool,
    ) -> Result<(String, u16), EngineError> {
        if !force_refresh {
            if let Some((body, status)) = self.get(url, method, params, headers, tenant_id).await? {
                debug!(url, "api cache hit");
                let text = body.as_str().map(str::to_string).unwrap_or_default();
                return Ok((text, status));
            }
        }

        let verb: Method = method.parse().unwrap_or(Method::GET);
        let mut req = self.http.request(verb, url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if let Value::Object(map) = params {
            req = req.query(&map.iter().collect::<Vec<_>>());
        }

        let resp = req.send().await.map_err(|e| {
            EngineError::Retryable(crate::error::RetryableError::Connection {
                message: e.to_string(),
            })
        })?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status < 400 {
            self.put(
                url,
                method,
                params,
                headers,
                json!(text),
                status,
                tenant_id,
                ttl_hours,
            )
            .await?;
        }
        Ok((text, status))
    }

    /// Delete expired records, plus records older than `max_age_days`
    /// regardless of expiry, matching the periodic sweep described for
    /// cache-record lifecycles.
    pub async fn sweep(&self, max_age_days: i64) -> Result<usize, EngineError> {
        match &self.backend {
            Backend::InMemory(store) => {
                let mut guard = store.write().expect("lock poisoned");
                let now = Utc::now();
                let cutoff = now - Duration::days(max_age_days);
                let mut removed = 0usize;
                for records in guard.values_mut() {
                    let before = records.len();
                    records.retain(|r| r.expires_at > now && r.created_at > cutoff);
                    removed += before - records.len();
                }
                guard.retain(|_, v| !v.is_empty());
                Ok(removed)
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.sweep_api_cache(max_age_days).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn headers(auth: &str) -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("Authorization".to_string(), auth.to_string());
        h.insert("Accept".to_string(), "application/json".to_string());
        h
    }

    #[test]
    fn cache_key_purity_under_rotating_credentials() {
        let params = json!({"q": "acme"});
        let k1 = compute_key("https://x", "GET", &params, &headers("Bearer aaa"));
        let k2 = compute_key("https://x", "GET", &params, &headers("Bearer bbb"));
        assert_eq!(k1, k2);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = ApiCache::in_memory(reqwest::Client::new());
        let params = json!({"q": "acme"});
        let h = headers("Bearer aaa");
        cache
            .put(
                "https://x",
                "GET",
                &params,
                &h,
                json!({"ok": true}),
                200,
                "tenant-1",
                24,
            )
            .await
            .unwrap();
        let hit = cache
            .get("https://x", "GET", &params, &h, "tenant-1")
            .await
            .unwrap();
        assert_eq!(hit, Some((json!({"ok": true}), 200)));
    }

    #[tokio::test]
    async fn miss_for_other_tenant() {
        let cache = ApiCache::in_memory(reqwest::Client::new());
        let params = json!({});
        let h = headers("x");
        cache
            .put("https://x", "GET", &params, &h, json!({}), 200, "t1", 24)
            .await
            .unwrap();
        let hit = cache
            .get("https://x", "GET", &params, &h, "t2")
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    proptest! {
        // Invariant #1: cache_key is a pure function of (url, method,
        // sorted-params, sanitised-headers); rotating the credential
        // under any of the stripped header names never changes it.
        #[test]
        fn cache_key_ignores_rotated_credentials(
            url in "[a-z]{1,10}://[a-z]{1,10}\\.example/[a-z/]{0,10}",
            method in "GET|POST|PUT",
            q in "[a-z]{1,8}",
            auth_a in "[A-Za-z0-9]{1,20}",
            auth_b in "[A-Za-z0-9]{1,20}",
            extra_header_name in "accept|user-agent|content-type",
            extra_header_value in "[a-z/]{1,12}",
        ) {
            let params = json!({ "q": q });
            let mut h_a = BTreeMap::new();
            h_a.insert("Authorization".to_string(), format!("Bearer {auth_a}"));
            h_a.insert(extra_header_name.clone(), extra_header_value.clone());
            let mut h_b = BTreeMap::new();
            h_b.insert("Authorization".to_string(), format!("Bearer {auth_b}"));
            h_b.insert(extra_header_name, extra_header_value);

            let k_a = compute_key(&url, &method, &params, &h_a);
            let k_b = compute_key(&url, &method, &params, &h_b);
            prop_assert_eq!(k_a, k_b);
        }

        // Any difference in url, method, or an unsanitised header value
        // must still be allowed to change the key (purity doesn't mean
        // everything collapses to one key).
        #[test]
        fn cache_key_still_varies_with_params(
            url in "[a-z]{1,10}://[a-z]{1,10}\\.example",
            q_a in "[a-z]{1,8}",
            q_b in "[a-z]{1,8}",
        ) {
            prop_assume!(q_a != q_b);
            let h = headers("Bearer shared");
            let k_a = compute_key(&url, "GET", &json!({"q": q_a}), &h);
            let k_b = compute_key(&url, "GET", &json!({"q": q_b}), &h);
            prop_assert_ne!(k_a, k_b);
        }
    }
}
