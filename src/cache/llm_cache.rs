//! Prompt/response cache for LLM provider calls.
//!
//! `cache_key = SHA256(sorted-JSON(prompt, provider, model, is_json,
//! operation_tag, temperature))`. A system/user split, when used, is
//! collapsed into a canonical `"<system>…</system>\n\n<user>…</user>"`
//! string before keying, matching the provider abstraction's contract.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use super::cache_key;
use crate::error::EngineError;

/// Combine a system/user prompt split into the canonical single-string
/// form used both for providers that don't support a native split and
/// for cache keying.
pub fn canonical_prompt(system: Option<&str>, user: &str) -> String {
    match system {
        Some(system) => format!("<system>{system}</system>\n\n<user>{user}</user>"),
        None => user.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct LlmCacheRecord {
    pub cache_key: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub is_json: bool,
    pub operation_tag: String,
    pub temperature: f32,
    pub response: Value,
    pub token_usage: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tenant_id: String,
}

/// `cache_key` inputs for one LLM call.
pub struct LlmCacheKeyInput<'a> {
    pub prompt: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub is_json: bool,
    pub operation_tag: &'a str,
    pub temperature: f32,
}

pub fn compute_key(input: &LlmCacheKeyInput<'_>) -> String {
    let keying = json!({
        "prompt": input.prompt,
        "provider": input.provider,
        "model": input.model,
        "is_json": input.is_json,
        "operation_tag": input.operation_tag,
        // Stored with fixed precision so float formatting never causes
        // two logically-identical temperatures to hash differently.
        "temperature": format!("{:.4}", input.temperature),
    });
    cache_key(&keying)
}

/// A response is never cached if it is an empty object/string, or the
/// decoded object carries an `"error"` or `"refusal"` key — a refusal
/// or failed call should not poison future identical requests.
pub fn is_cacheable(response: &Value) -> bool {
    match response {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Object(map) => {
            if map.is_empty() {
                return false;
            }
            !map.contains_key("error") && !map.contains_key("refusal")
        }
        _ => true,
    }
}

enum Backend {
    InMemory(RwLock<FxHashMap<String, Vec<LlmCacheRecord>>>),
    #[cfg(feature = "sqlite")]
    Sql(crate::cache::sql_backend::SqlPool),
}

pub struct LlmCache {
    backend: Backend,
}

impl Default for LlmCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LlmCache {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::InMemory(RwLock::new(FxHashMap::default())),
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sql(pool: crate::cache::sql_backend::SqlPool) -> Self {
        Self {
            backend: Backend::Sql(pool),
        }
    }

    pub async fn get(
        &self,
        input: &LlmCacheKeyInput<'_>,
        tenant_id: &str,
    ) -> Result<Option<LlmCacheRecord>, EngineError> {
        let key = compute_key(input);
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
                    .cloned())
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.get_llm_cache(&key, tenant_id).await,
        }
    }

    /// Store `response`, unless [`is_cacheable`] rejects it as a
    /// refusal/empty result.
    pub async fn put(
        &self,
        input: &LlmCacheKeyInput<'_>,
        response: Value,
        token_usage: Value,
        tenant_id: &str,
        ttl_hours: i64,
    ) -> Result<bool, EngineError> {
        if !is_cacheable(&response) {
            return Ok(false);
        }
        let key = compute_key(input);
        let now = Utc::now();
        let record = LlmCacheRecord {
            cache_key: key.clone(),
            provider: input.provider.to_string(),
            model: input.model.to_string(),
            prompt: input.prompt.to_string(),
            is_json: input.is_json,
            operation_tag: input.operation_tag.to_string(),
            temperature: input.temperature,
            response,
            token_usage,
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            tenant_id: tenant_id.to_string(),
        };
        match &self.backend {
            Backend::InMemory(store) => {
                let mut guard = store.write().expect("lock poisoned");
                guard.entry(key).or_default().push(record);
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.put_llm_cache(record).await?,
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(temp: f32) -> LlmCacheKeyInput<'static> {
        LlmCacheKeyInput {
            prompt: "hello",
            provider: "openai-like",
            model: "gpt-x",
            is_json: false,
            operation_tag: "summary",
            temperature: temp,
        }
    }

    #[test]
    fn temperature_partitions_cache_key() {
        assert_ne!(compute_key(&input(0.0)), compute_key(&input(0.7)));
        assert_eq!(compute_key(&input(0.5)), compute_key(&input(0.5)));
    }

    #[test]
    fn refusal_and_empty_responses_are_not_cacheable() {
        assert!(!is_cacheable(&json!({})));
        assert!(!is_cacheable(&json!("")));
        assert!(!is_cacheable(&json!({"error": "rate limited"})));
        assert!(!is_cacheable(&json!({"refusal": "cannot help"})));
        assert!(is_cacheable(&json!({"value": "Boston"})));
    }

    #[tokio::test]
    async fn refused_response_is_not_stored() {
        let cache = LlmCache::in_memory();
        let stored = cache
            .put(&input(0.0), json!({"error": "x"}), json!({}), "t1", 24)
            .await
            .unwrap();
        assert!(!stored);
        assert!(cache.get(&input(0.0), "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accepted_response_round_trips() {
        let cache = LlmCache::in_memory();
        cache
            .put(&input(0.0), json!({"value": "Boston"}), json!({}), "t1", 24)
            .await
            .unwrap();
        let hit = cache.get(&input(0.0), "t1").await.unwrap().unwrap();
        assert_eq!(hit.response, json!({"value": "Boston"}));
    }

    proptest! {
        // Invariant #2: fixed (prompt, provider, model, is_json,
        // operation_tag), distinct temperatures rounded to four decimals
        // partition the key; identical temperatures (at that precision)
        // always share one.
        #[test]
        fn temperature_partitions_key_at_four_decimal_precision(
            t_a in -1.0f32..2.0,
            t_b in -1.0f32..2.0,
        ) {
            let k_a = compute_key(&input(t_a));
            let k_b = compute_key(&input(t_b));
            let same_rounded = format!("{t_a:.4}") == format!("{t_b:.4}");
            prop_assert_eq!(k_a == k_b, same_rounded);
        }
    }
}
