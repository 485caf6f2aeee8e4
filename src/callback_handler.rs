//! Paginated enrichment callback handler: the inbound-side counterpart to
//! [`crate::batch`]. Merges streamed pages produced by external
//! enrichment workers into account/lead state under a per-account lock,
//! applying the skip policy before dispatching to a per-enrichment-type
//! handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::callback::{CallbackEvent, CallbackStatus};
use crate::error::{EngineError, NotFoundError};
use crate::types::EnrichmentType;

/// Per-`(account, enrichment_type)` status row the skip policy reads and
/// the atomic update writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEnrichmentStatus {
    pub status: CallbackStatus,
    /// `{processed_pages: [u32], total_pages: u32, last_processed_page: u32}`.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub last_attempted_run: Option<DateTime<Utc>>,
    pub last_successful_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
}

impl Default for AccountEnrichmentStatus {
    fn default() -> Self {
        Self {
            status: CallbackStatus::Processing,
            metadata: serde_json::json!({"processed_pages": []}),
            last_attempted_run: None,
            last_successful_run: None,
            failure_count: 0,
        }
    }
}

impl AccountEnrichmentStatus {
    fn processed_pages(&self) -> Vec<u32> {
        self.metadata["processed_pages"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_u64()).map(|v| v as u32).collect())
            .unwrap_or_default()
    }

    fn record_page(&mut self, page: u32, total_pages: u32) {
        let mut pages = self.processed_pages();
        if !pages.contains(&page) {
            pages.push(page);
        }
        self.metadata = serde_json::json!({
            "processed_pages": pages,
            "total_pages": total_pages,
            "last_processed_page": page,
        });
    }
}

/// Outcome returned to the caller of [`CallbackHandler::handle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Skipped,
    Processing,
}

#[async_trait]
pub trait AccountStatusStore: Send + Sync {
    async fn get(
        &self,
        account_id: &str,
        enrichment_type: EnrichmentType,
    ) -> Result<Option<AccountEnrichmentStatus>, EngineError>;

    async fn upsert(
        &self,
        account_id: &str,
        enrichment_type: EnrichmentType,
        status: AccountEnrichmentStatus,
    ) -> Result<(), EngineError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn exists(&self, account_id: &str) -> Result<bool, EngineError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn exists(&self, account_id: &str, lead_id: &str) -> Result<bool, EngineError>;
}

/// The four per-`enrichment_type` merge handlers named in the dispatch
/// rule. Each receives the raw event; state-merge semantics (field
/// mapping, create-or-update by `linkedin_url`, and so on) are owned by
/// the implementor.
#[async_trait]
pub trait EnrichmentDispatch: Send + Sync {
    async fn handle_lead_generation_page(
        &self,
        event: &CallbackEvent,
        is_final_page: bool,
    ) -> Result<(), EngineError>;

    async fn handle_company_info(&self, event: &CallbackEvent) -> Result<(), EngineError>;

    async fn handle_lead_linkedin_research(&self, event: &CallbackEvent, lead_id: &str) -> Result<(), EngineError>;

    async fn handle_custom_column(&self, event: &CallbackEvent) -> Result<(), EngineError>;
}

type LockRegistry = Mutex<FxHashMap<String, Arc<Mutex<()>>>>;

pub struct CallbackHandler<Store, Accounts, Leads, Dispatch> {
    status_store: Store,
    accounts: Accounts,
    leads: Leads,
    dispatch: Dispatch,
    locks: LockRegistry,
}

impl<Store, Accounts, Leads, Dispatch> CallbackHandler<Store, Accounts, Leads, Dispatch>
where
    Store: AccountStatusStore,
    Accounts: AccountRepository,
    Leads: LeadRepository,
    Dispatch: EnrichmentDispatch,
{
    pub fn new(status_store: Store, accounts: Accounts, leads: Leads, dispatch: Dispatch) -> Self {
        Self {
            status_store,
            accounts,
            leads,
            dispatch,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[instrument(skip(self, event), fields(account_id = %event.account_id, enrichment_type = %event.enrichment_type))]
    pub async fn handle(&self, event: CallbackEvent) -> Result<DispatchOutcome, EngineError> {
        let account_lock = self.account_lock(&event.account_id).await;
        let _guard = account_lock.lock().await;

        if !self.accounts.exists(&event.account_id).await? {
            return Err(NotFoundError::Account {
                account_id: event.account_id.clone(),
            }
            .into());
        }
        if let Some(lead_id) = &event.lead_id {
            if !self.leads.exists(&event.account_id, lead_id).await? {
                return Err(NotFoundError::Lead {
                    lead_id: lead_id.clone(),
                }
                .into());
            }
        }

        let mut current = self
            .status_store
            .get(&event.account_id, event.enrichment_type)
            .await?
            .unwrap_or_default();

        if let Some(pagination) = event.pagination {
            if current.processed_pages().contains(&pagination.page) {
                return Ok(DispatchOutcome {
                    status: DispatchStatus::Skipped,
                    reason: Some(format!("Page {} already processed", pagination.page)),
                    page: Some(pagination.page),
                    total_pages: Some(pagination.total_pages),
                });
            }
        } else if current.status == CallbackStatus::Completed {
            return Ok(DispatchOutcome {
                status: DispatchStatus::Skipped,
                reason: Some("enrichment already completed".to_string()),
                page: None,
                total_pages: None,
            });
        }

        if current.status == CallbackStatus::Failed && event.status != CallbackStatus::Completed {
            return Ok(DispatchOutcome {
                status: DispatchStatus::Skipped,
                reason: Some("account is in a failed state; only a completed callback is accepted".to_string()),
                page: event.pagination.map(|p| p.page),
                total_pages: event.pagination.map(|p| p.total_pages),
            });
        }

        let is_final_page = event.pagination.map(|p| p.is_final()).unwrap_or(true);
        let effective_status = if event.pagination.is_some() && !is_final_page {
            CallbackStatus::Processing
        } else {
            event.status
        };

        current.last_attempted_run = Some(Utc::now());
        if effective_status == CallbackStatus::Completed {
            current.last_successful_run = Some(Utc::now());
        }
        if effective_status == CallbackStatus::Failed {
            current.failure_count += 1;
        }
        if let Some(pagination) = event.pagination {
            current.record_page(pagination.page, pagination.total_pages);
        }
        current.status = effective_status;
        self.status_store
            .upsert(&event.account_id, event.enrichment_type, current)
            .await?;

        match event.enrichment_type {
            EnrichmentType::GenerateLeads => {
                self.dispatch.handle_lead_generation_page(&event, is_final_page).await?;
            }
            EnrichmentType::CompanyInfo => {
                self.dispatch.handle_company_info(&event).await?;
            }
            EnrichmentType::LeadLinkedinResearch => {
                if let Some(lead_id) = &event.lead_id {
                    self.dispatch.handle_lead_linkedin_research(&event, lead_id).await?;
                }
            }
            EnrichmentType::CustomColumn => {
                self.dispatch.handle_custom_column(&event).await?;
            }
        }

        Ok(DispatchOutcome {
            status: DispatchStatus::Success,
            reason: None,
            page: event.pagination.map(|p| p.page),
            total_pages: event.pagination.map(|p| p.total_pages),
        })
    }
}
