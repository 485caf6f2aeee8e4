//! Shared SQL-backed storage for the two caches and the result store.
//!
//! Uses `sqlx::AnyPool` so the same parameterised SQL and row-mapping
//! code serves both the `sqlite` and `postgres` features, mirroring the
//! teacher's `CheckpointerType::{InMemory, SQLite}` split but collapsed
//! to one implementation instead of a sqlite/postgres file pair, since
//! `sqlx::Any` already abstracts the wire differences for the simple
//! key-value shaped tables this crate needs.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{AnyPool, Row};

use crate::cache::api_cache::ApiCacheRecord;
use crate::cache::llm_cache::LlmCacheRecord;
use crate::error::EngineError;
use crate::result_store::ResultRow;

#[derive(Clone)]
pub struct SqlPool {
    pool: AnyPool,
}

fn backend_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

impl SqlPool {
    /// Connect and create the crate's tables if they don't already
    /// exist. Real deployments are expected to run migrations
    /// out-of-band; this inline DDL keeps the in-process dev/test path
    /// self-contained.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect(database_url)
            .await
            .map_err(backend_err)?;
        let this = Self { pool };
        this.migrate().await?;
        Ok(this)
    }

    async fn migrate(&self) -> Result<(), EngineError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS api_request_cache (\
                cache_key TEXT NOT NULL, method TEXT NOT NULL, url TEXT NOT NULL, \
                params_json TEXT NOT NULL, response_json TEXT NOT NULL, \
                response_status INTEGER NOT NULL, created_at TEXT NOT NULL, \
                expires_at TEXT NOT NULL, tenant_id TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS ai_prompt_cache (\
                cache_key TEXT NOT NULL, provider TEXT NOT NULL, model TEXT NOT NULL, \
                prompt TEXT NOT NULL, is_json INTEGER NOT NULL, operation_tag TEXT NOT NULL, \
                temperature REAL NOT NULL, response_json TEXT NOT NULL, \
                token_usage_json TEXT NOT NULL, created_at TEXT NOT NULL, \
                expires_at TEXT NOT NULL, tenant_id TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS enrichment_callbacks (\
                account_id TEXT NOT NULL, lead_id TEXT, enrichment_type TEXT NOT NULL, \
                status TEXT NOT NULL, callback_payload TEXT NOT NULL, \
                is_batched INTEGER NOT NULL, batch_info_json TEXT, \
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
        ];
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    // ---- api_request_cache -------------------------------------------------

    pub async fn get_api_cache(
        &self,
        key: &str,
        tenant_id: &str,
    ) -> Result<Option<(Value, u16)>, EngineError> {
        let row = sqlx::query(
            "SELECT response_json, response_status FROM api_request_cache \
             WHERE cache_key = ? AND tenant_id = ? AND expires_at > ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(key)
        .bind(tenant_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let body: String = row.try_get("response_json").map_err(backend_err)?;
                let status: i64 = row.try_get("response_status").map_err(backend_err)?;
                let value: Value = serde_json::from_str(&body)?;
                Ok(Some((value, status as u16)))
            }
        }
    }

    pub async fn put_api_cache(&self, record: ApiCacheRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO api_request_cache \
             (cache_key, method, url, params_json, response_json, response_status, \
              created_at, expires_at, tenant_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.cache_key)
        .bind(record.method)
        .bind(record.url)
        .bind(record.params.to_string())
        .bind(record.response_body.to_string())
        .bind(record.response_status as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.to_rfc3339())
        .bind(record.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    pub async fn sweep_api_cache(&self, max_age_days: i64) -> Result<usize, EngineError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(max_age_days);
        let result = sqlx::query(
            "DELETE FROM api_request_cache WHERE expires_at <= ? OR created_at <= ?",
        )
        .bind(now.to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(result.rows_affected() as usize)
    }

    // ---- ai_prompt_cache ----------------------------------------------------

    pub async fn get_llm_cache(
        &self,
        key: &str,
        tenant_id: &str,
    ) -> Result<Option<LlmCacheRecord>, EngineError> {
        let row = sqlx::query(
            "SELECT provider, model, prompt, is_json, operation_tag, temperature, \
                    response_json, token_usage_json, created_at, expires_at \
             FROM ai_prompt_cache WHERE cache_key = ? AND tenant_id = ? AND expires_at > ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(key)
        .bind(tenant_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        let Some(row) = row else { return Ok(None) };
        let response_json: String = row.try_get("response_json").map_err(backend_err)?;
        let token_usage_json: String = row.try_get("token_usage_json").map_err(backend_err)?;
        let created_at: String = row.try_get("created_at").map_err(backend_err)?;
        let expires_at: String = row.try_get("expires_at").map_err(backend_err)?;

        Ok(Some(LlmCacheRecord {
            cache_key: key.to_string(),
            provider: row.try_get("provider").map_err(backend_err)?,
            model: row.try_get("model").map_err(backend_err)?,
            prompt: row.try_get("prompt").map_err(backend_err)?,
            is_json: row.try_get::<i64, _>("is_json").map_err(backend_err)? != 0,
            operation_tag: row.try_get("operation_tag").map_err(backend_err)?,
            temperature: row.try_get::<f64, _>("temperature").map_err(backend_err)? as f32,
            response: serde_json::from_str(&response_json)?,
            token_usage: serde_json::from_str(&token_usage_json)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| EngineError::Storage(e.to_string()))?
                .with_timezone(&Utc),
            expires_at: DateTime::parse_from_rfc3339(&expires_at)
                .map_err(|e| EngineError::Storage(e.to_string()))?
                .with_timezone(&Utc),
            tenant_id: tenant_id.to_string(),
        }))
    }

    pub async fn put_llm_cache(&self, record: LlmCacheRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO ai_prompt_cache \
             (cache_key, provider, model, prompt, is_json, operation_tag, temperature, \
              response_json, token_usage_json, created_at, expires_at, tenant_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.cache_key)
        .bind(record.provider)
        .bind(record.model)
        .bind(record.prompt)
        .bind(record.is_json as i64)
        .bind(record.operation_tag)
        .bind(record.temperature as f64)
        .bind(record.response.to_string())
        .bind(record.token_usage.to_string())
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.to_rfc3339())
        .bind(record.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    // ---- enrichment_callbacks -----------------------------------------------

    pub async fn insert_result_row(&self, row: ResultRow) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO enrichment_callbacks \
             (account_id, lead_id, enrichment_type, status, callback_payload, \
              is_batched, batch_info_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.account_id)
        .bind(row.lead_id)
        .bind(row.enrichment_type)
        .bind(row.status)
        .bind(row.callback_payload.to_string())
        .bind(row.is_batched as i64)
        .bind(row.batch_info.map(|v| v.to_string()))
        .bind(row.created_at.to_rfc3339())
        .bind(row.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    pub async fn latest_result_row(
        &self,
        account_id: &str,
        enrichment_type: &str,
        lead_id: Option<&str>,
    ) -> Result<Option<ResultRow>, EngineError> {
        let row = sqlx::query(
            "SELECT account_id, lead_id, enrichment_type, status, callback_payload, \
                    is_batched, batch_info_json, created_at, updated_at \
             FROM enrichment_callbacks \
             WHERE account_id = ? AND enrichment_type = ? \
               AND (lead_id = ? OR (? IS NULL AND lead_id IS NULL)) \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(enrichment_type)
        .bind(lead_id)
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.map(row_to_result_row).transpose()
    }

    pub async fn result_rows_like(
        &self,
        account_id: &str,
        enrichment_type_prefix: &str,
    ) -> Result<Vec<ResultRow>, EngineError> {
        let pattern = format!("{enrichment_type_prefix}%");
        let rows = sqlx::query(
            "SELECT account_id, lead_id, enrichment_type, status, callback_payload, \
                    is_batched, batch_info_json, created_at, updated_at \
             FROM enrichment_callbacks \
             WHERE account_id = ? AND enrichment_type LIKE ? \
             ORDER BY created_at ASC",
        )
        .bind(account_id)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.into_iter().map(row_to_result_row).collect()
    }
}

fn row_to_result_row(row: sqlx::any::AnyRow) -> Result<ResultRow, EngineError> {
    let created_at: String = row.try_get("created_at").map_err(backend_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend_err)?;
    let payload: String = row.try_get("callback_payload").map_err(backend_err)?;
    let batch_info: Option<String> = row.try_get("batch_info_json").map_err(backend_err)?;
    Ok(ResultRow {
        account_id: row.try_get("account_id").map_err(backend_err)?,
        lead_id: row.try_get("lead_id").map_err(backend_err)?,
        enrichment_type: row.try_get("enrichment_type").map_err(backend_err)?,
        status: row.try_get("status").map_err(backend_err)?,
        callback_payload: serde_json::from_str(&payload)?,
        is_batched: row.try_get::<i64, _>("is_batched").map_err(backend_err)? != 0,
        batch_info: batch_info.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| EngineError::Storage(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| EngineError::Storage(e.to_string()))?
            .with_timezone(&Utc),
    })
}
