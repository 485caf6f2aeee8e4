//! Idempotent result store with transparent large-payload batching.
//!
//! Grounded on `task_result_manager.py`: terminal callback payloads are
//! persisted append-only, keyed by `(account_id, enrichment_type,
//! lead_id?)`; reads always return the most-recent row. Large arrays
//! (`structured_leads`, `qualified_leads`, `all_leads`) are transparently
//! split into batch rows above `batch_threshold` and reassembled on read.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::callback::{CallbackEvent, CallbackSink, CallbackStatus};
use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_THRESHOLD, DEFAULT_INSERT_THROTTLE_MS,
    DEFAULT_MAX_CONCURRENT_INSERTS,
};
use crate::error::{EngineError, NotFoundError};
use crate::types::EnrichmentType;

/// The array fields eligible for batching, in the priority order used to
/// compute `L = max(|structured|, |qualified|, |all|)`.
const BATCHABLE_ARRAYS: [&str; 3] = ["structured_leads", "qualified_leads", "all_leads"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTypeBatchInfo {
    pub count: usize,
    pub batches: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterBatchInfo {
    pub is_master: bool,
    pub job_id: String,
    pub data_types: HashMap<String, DataTypeBatchInfo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildBatchInfo {
    pub is_master: bool,
    pub job_id: String,
    pub data_type: String,
    pub batch_index: usize,
    pub total_batches: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub items_count: usize,
}

/// Untagged: a master row's `batch_info` has `data_types`/`created_at`
/// and no `batch_index`, a child row's has the reverse, so the two
/// shapes never parse ambiguously.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchInfo {
    Master(MasterBatchInfo),
    Child(ChildBatchInfo),
}

/// One persisted row (master, single, or batch-child).
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub account_id: String,
    pub lead_id: Option<String>,
    pub enrichment_type: String,
    pub status: String,
    pub callback_payload: Value,
    pub is_batched: bool,
    pub batch_info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResultStoreConfig {
    pub batch_size: usize,
    pub batch_threshold: usize,
    pub max_concurrent_inserts: usize,
    pub enable_batching: bool,
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            max_concurrent_inserts: DEFAULT_MAX_CONCURRENT_INSERTS,
            enable_batching: true,
        }
    }
}

enum Backend {
    InMemory(RwLock<Vec<ResultRow>>),
    #[cfg(feature = "sqlite")]
    Sql(crate::cache::sql_backend::SqlPool),
}

pub struct ResultStore {
    backend: Backend,
    config: ResultStoreConfig,
}

impl ResultStore {
    pub fn in_memory(config: ResultStoreConfig) -> Self {
        Self {
            backend: Backend::InMemory(RwLock::new(Vec::new())),
            config,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sql(pool: crate::cache::sql_backend::SqlPool, config: ResultStoreConfig) -> Self {
        Self {
            backend: Backend::Sql(pool),
            config,
        }
    }

    async fn insert(&self, row: ResultRow) -> Result<(), EngineError> {
        match &self.backend {
            Backend::InMemory(store) => {
                store.write().expect("lock poisoned").push(row);
                Ok(())
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.insert_result_row(row).await,
        }
    }

    async fn latest(
        &self,
        account_id: &str,
        enrichment_type: &str,
        lead_id: Option<&str>,
    ) -> Result<Option<ResultRow>, EngineError> {
        match &self.backend {
            Backend::InMemory(store) => {
                let guard = store.read().expect("lock poisoned");
                Ok(guard
                    .iter()
                    .filter(|r| {
                        r.account_id == account_id
                            && r.enrichment_type == enrichment_type
                            && r.lead_id.as_deref() == lead_id
                    })
                    .max_by_key(|r| r.updated_at)
                    .cloned())
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.latest_result_row(account_id, enrichment_type, lead_id).await,
        }
    }

    async fn children_for(
        &self,
        account_id: &str,
        prefix: &str,
    ) -> Result<Vec<ResultRow>, EngineError> {
        match &self.backend {
            Backend::InMemory(store) => {
                let guard = store.read().expect("lock poisoned");
                Ok(guard
                    .iter()
                    .filter(|r| r.account_id == account_id && r.enrichment_type.starts_with(prefix))
                    .cloned()
                    .collect())
            }
            #[cfg(feature = "sqlite")]
            Backend::Sql(pool) => pool.result_rows_like(account_id, prefix).await,
        }
    }

    /// Write path. Non-terminal payloads (`status != completed`) are
    /// silently ignored, per the store's "append on terminal callback
    /// only" contract.
    #[instrument(skip(self, event), fields(enrichment_type = %enrichment_type, account_id = %event.account_id))]
    pub async fn store(
        &self,
        enrichment_type: EnrichmentType,
        event: &CallbackEvent,
    ) -> Result<(), EngineError> {
        if event.status != CallbackStatus::Completed {
            return Ok(());
        }

        let arrays: HashMap<&str, Vec<Value>> = BATCHABLE_ARRAYS
            .iter()
            .filter_map(|name| {
                event
                    .processed_data
                    .get(name)
                    .and_then(Value::as_array)
                    .map(|arr| (*name, arr.clone()))
            })
            .collect();
        let max_len = arrays.values().map(Vec::len).max().unwrap_or(0);

        if !self.config.enable_batching || max_len < self.config.batch_threshold {
            return self.store_single(enrichment_type, event).await;
        }
        self.store_batched(enrichment_type, event, arrays).await
    }

    async fn store_single(
        &self,
        enrichment_type: EnrichmentType,
        event: &CallbackEvent,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        self.insert(ResultRow {
            account_id: event.account_id.clone(),
            lead_id: event.lead_id.clone(),
            enrichment_type: enrichment_type.as_str().to_string(),
            status: "completed".to_string(),
            callback_payload: serde_json::to_value(event)?,
            is_batched: false,
            batch_info: None,
            created_at: now,
            updated_at: now,
        })
        .await
    }

    async fn store_batched(
        &self,
        enrichment_type: EnrichmentType,
        event: &CallbackEvent,
        arrays: HashMap<&str, Vec<Value>>,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let job_id = event.job_id.clone();
        let batch_size = self.config.batch_size;

        let mut stripped = event.clone();
        if let Value::Object(map) = &mut stripped.processed_data {
            for name in BATCHABLE_ARRAYS {
                map.remove(name);
            }
        }

        let mut data_types = HashMap::new();
        for (name, items) in &arrays {
            let batches = items.len().div_ceil(batch_size).max(1);
            data_types.insert(
                (*name).to_string(),
                DataTypeBatchInfo {
                    count: items.len(),
                    batches,
                    batch_size,
                },
            );
        }

        let master_batch_info = BatchInfo::Master(MasterBatchInfo {
            is_master: true,
            job_id: job_id.clone(),
            data_types,
            created_at: now,
        });
        self.insert(ResultRow {
            account_id: event.account_id.clone(),
            lead_id: event.lead_id.clone(),
            enrichment_type: enrichment_type.as_str().to_string(),
            status: "completed".to_string(),
            callback_payload: serde_json::to_value(&stripped)?,
            is_batched: true,
            batch_info: Some(serde_json::to_value(&master_batch_info)?),
            created_at: now,
            updated_at: now,
        })
        .await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_inserts.max(1)));
        for (name, items) in arrays {
            let total_batches = items.len().div_ceil(batch_size).max(1);
            for (idx, chunk) in items.chunks(batch_size.max(1)).enumerate() {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                let start_index = idx * batch_size;
                let end_index = start_index + chunk.len();
                let child_info = BatchInfo::Child(ChildBatchInfo {
                    is_master: false,
                    job_id: job_id.clone(),
                    data_type: name.to_string(),
                    batch_index: idx,
                    total_batches,
                    start_index,
                    end_index,
                    items_count: chunk.len(),
                });
                let row = ResultRow {
                    account_id: event.account_id.clone(),
                    lead_id: event.lead_id.clone(),
                    enrichment_type: format!("{}_{}_batch_{}", enrichment_type.as_str(), name, idx),
                    status: "batch".to_string(),
                    callback_payload: json!({ name: chunk }),
                    is_batched: true,
                    batch_info: Some(serde_json::to_value(&child_info)?),
                    created_at: now,
                    updated_at: now,
                };
                self.insert(row).await?;
                drop(permit);
                tokio::time::sleep(Duration::from_millis(DEFAULT_INSERT_THROTTLE_MS)).await;
            }
        }
        Ok(())
    }

    /// Read path: the latest row for `(account_id, enrichment_type,
    /// lead_id?)`, with batched payloads transparently reassembled in
    /// original order.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        enrichment_type: EnrichmentType,
        account_id: &str,
        lead_id: Option<&str>,
    ) -> Result<Option<Value>, EngineError> {
        let Some(master) = self
            .latest(account_id, enrichment_type.as_str(), lead_id)
            .await?
        else {
            return Ok(None);
        };
        if !master.is_batched {
            return Ok(Some(master.callback_payload));
        }

        let Some(info_value) = &master.batch_info else {
            return Ok(Some(master.callback_payload));
        };
        let info: BatchInfo = serde_json::from_value(info_value.clone())?;
        let BatchInfo::Master(MasterBatchInfo { job_id, data_types, .. }) = info else {
            return Ok(Some(master.callback_payload));
        };

        let mut payload = master.callback_payload;
        for (data_type, _) in data_types {
            let prefix = format!("{}_{}_batch_", enrichment_type.as_str(), data_type);
            let mut children = self.children_for(account_id, &prefix).await?;
            children.retain(|row| {
                row.batch_info
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<BatchInfo>(v.clone()).ok())
                    .is_some_and(|info| matches!(info, BatchInfo::Child(c) if c.job_id == job_id))
            });
            children.sort_by_key(|row| {
                row.batch_info
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<BatchInfo>(v.clone()).ok())
                    .map(|info| match info {
                        BatchInfo::Child(c) => c.batch_index,
                        BatchInfo::Master(_) => 0,
                    })
                    .unwrap_or(0)
            });

            let mut items = Vec::new();
            for child in &children {
                if let Some(arr) = child.callback_payload.get(&data_type).and_then(Value::as_array) {
                    items.extend(arr.iter().cloned());
                }
            }
            if let Value::Object(map) = &mut payload {
                map.insert(
                    "processed_data".to_string(),
                    merge_array_into(map.get("processed_data").cloned().unwrap_or(json!({})), &data_type, items),
                );
            }
        }
        Ok(Some(payload))
    }

    /// Reconstruct and re-emit the stored terminal callback for replay,
    /// without recomputing anything.
    pub async fn resend(
        &self,
        sink: &dyn CallbackSink,
        enrichment_type: EnrichmentType,
        account_id: &str,
        lead_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let payload = self
            .get(enrichment_type, account_id, lead_id)
            .await?
            .ok_or_else(|| NotFoundError::Result {
                enrichment_type: enrichment_type.as_str().to_string(),
                account_id: account_id.to_string(),
            })?;
        let event: CallbackEvent = serde_json::from_value(payload)?;
        sink.emit(event).await
    }
}

fn merge_array_into(mut processed_data: Value, key: &str, items: Vec<Value>) -> Value {
    if let Value::Object(map) = &mut processed_data {
        map.insert(key.to_string(), Value::Array(items));
    }
    processed_data
}
