//! Typed configuration loaded from the environment.
//!
//! Mirrors the env vars named in the external-interfaces section: a
//! `.env` file is loaded (if present) via `dotenvy`, then each field is
//! read with `std::env::var` and a typed default matching the constants
//! ported from the original `task_result_manager.py`.

use std::env;

/// Default number of items per batch row when splitting a large payload
/// array for the result store (`TASK_RESULT_BATCH_SIZE`).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Minimum array length before the result store switches from a
/// single-row write to the batched master/child layout
/// (`TASK_RESULT_BATCH_THRESHOLD`).
pub const DEFAULT_BATCH_THRESHOLD: usize = 50;

/// Concurrency cap on child-row inserts during a batched write
/// (`TASK_RESULT_MAX_CONCURRENT`).
pub const DEFAULT_MAX_CONCURRENT_INSERTS: usize = 4;

/// Short pause between child-row insert submissions, matching the
/// original's `asyncio.sleep(0.1)` throttle.
pub const DEFAULT_INSERT_THROTTLE_MS: u64 = 100;

/// Default batch size for the entity batch processor (`batch_size`).
pub const DEFAULT_TASK_BATCH_SIZE: usize = 10;

/// Default per-batch concurrency for the entity batch processor
/// (`concurrent_requests`).
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;

/// Process-wide configuration, loaded once and handed to
/// [`crate::app::EnrichmentEngine`] at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub google_cloud_project: Option<String>,
    pub bigquery_dataset: Option<String>,
    pub task_result_batch_size: usize,
    pub task_result_batch_threshold: usize,
    pub task_result_max_concurrent: usize,
    pub enable_result_batching: bool,
    pub openai_api_key: Option<String>,
    pub gemini_api_token: Option<String>,
    pub builtwith_api_key: Option<String>,
    pub proxycurl_api_key: Option<String>,
    pub apify_api_key: Option<String>,
    pub rapid_api_key: Option<String>,
    pub jina_api_token: Option<String>,
}

impl EngineConfig {
    /// Load configuration from `.env` (if present) and the process
    /// environment, falling back to the crate's documented defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            google_cloud_project: env::var("GOOGLE_CLOUD_PROJECT").ok(),
            bigquery_dataset: env::var("BIGQUERY_DATASET").ok(),
            task_result_batch_size: parse_usize("TASK_RESULT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            task_result_batch_threshold: parse_usize(
                "TASK_RESULT_BATCH_THRESHOLD",
                DEFAULT_BATCH_THRESHOLD,
            ),
            task_result_max_concurrent: parse_usize(
                "TASK_RESULT_MAX_CONCURRENT",
                DEFAULT_MAX_CONCURRENT_INSERTS,
            ),
            enable_result_batching: parse_bool("ENABLE_RESULT_BATCHING", true),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            gemini_api_token: env::var("GEMINI_API_TOKEN").ok(),
            builtwith_api_key: env::var("BUILTWITH_API_KEY").ok(),
            proxycurl_api_key: env::var("PROXYCURL_API_KEY").ok(),
            apify_api_key: env::var("APIFY_API_KEY").ok(),
            rapid_api_key: env::var("RAPID_API_KEY").ok(),
            jina_api_token: env::var("JINA_API_TOKEN").ok(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            google_cloud_project: None,
            bigquery_dataset: None,
            task_result_batch_size: DEFAULT_BATCH_SIZE,
            task_result_batch_threshold: DEFAULT_BATCH_THRESHOLD,
            task_result_max_concurrent: DEFAULT_MAX_CONCURRENT_INSERTS,
            enable_result_batching: true,
            openai_api_key: None,
            gemini_api_token: None,
            builtwith_api_key: None,
            proxycurl_api_key: None,
            apify_api_key: None,
            rapid_api_key: None,
            jina_api_token: None,
        }
    }
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.task_result_batch_size, 100);
        assert_eq!(cfg.task_result_batch_threshold, 50);
        assert_eq!(cfg.task_result_max_concurrent, 4);
        assert!(cfg.enable_result_batching);
    }
}
