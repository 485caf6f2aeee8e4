//! Column-generation orchestrator.
//!
//! Resolves a target column set, expands it with transitive dependencies,
//! topologically sorts it, and submits custom-column tasks one at a time,
//! threading the remaining order through `OrchestrationData` on the task
//! payload so no orchestrator-held mutable state is needed across task
//! boundaries.

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::callback::CallbackStatus;
use crate::column::Column;
use crate::error::EngineError;
use crate::graph::ColumnGraph;
use crate::task::{AiConfig, OrchestrationData, TaskPayload};
use crate::types::EntityKind;

/// Explicit column list, or "every active column for this entity type".
#[derive(Debug, Clone)]
pub enum ColumnSelection {
    Explicit(Vec<Column>),
    AllActiveFor(EntityKind),
}

/// Read-side seam onto the externally-owned column catalog: active
/// columns for an entity type, the dependency edges among a column set,
/// and the idempotency-tracking `last_refresh` bump.
#[async_trait]
pub trait ColumnCatalog: Send + Sync {
    async fn active_columns_for(&self, entity_type: EntityKind) -> Result<Vec<Column>, EngineError>;
    async fn dependency_edges(&self, entity_type: EntityKind) -> Result<Vec<(String, String)>, EngineError>;
    async fn bump_last_refresh(&self, column_ids: &[String]) -> Result<(), EngineError>;
    async fn get_column(&self, column_id: &str) -> Result<Column, EngineError>;
}

/// Write-side seam: submit one custom-column task. Matches the crate's
/// task-submission boundary (an external queue/executor is assumed).
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit_custom_column_task(&self, payload: TaskPayload) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub orchestration_order: Vec<String>,
    pub first_job_submitted: String,
}

#[derive(Debug, Clone)]
pub struct NextStepReceipt {
    pub submitted: Option<String>,
    pub finished: bool,
}

pub struct ColumnOrchestrator<Sub, Cat> {
    submitter: Sub,
    catalog: Cat,
}

impl<Sub, Cat> ColumnOrchestrator<Sub, Cat>
where
    Sub: TaskSubmitter,
    Cat: ColumnCatalog,
{
    pub fn new(submitter: Sub, catalog: Cat) -> Self {
        Self { submitter, catalog }
    }

    /// Union `cols` with their transitive dependencies, input order
    /// preserved and new dependencies appended after, deduplicated.
    fn expand_with_dependencies(cols: &[Column], graph: &ColumnGraph) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for col in cols {
            if seen.insert(col.id.clone()) {
                ordered.push(col.id.clone());
            }
        }
        for col in cols {
            for dep in graph.all_dependencies_ordered(&col.id) {
                if seen.insert(dep.clone()) {
                    ordered.push(dep);
                }
            }
        }
        ordered
    }

    #[instrument(skip(self, entity_ids), fields(tenant_id, request_id))]
    pub async fn start_orchestrated(
        &self,
        tenant_id: &str,
        request_id: &str,
        entity_ids: Vec<String>,
        selection: ColumnSelection,
        batch_size: usize,
    ) -> Result<StartReceipt, EngineError> {
        let (entity_type, columns) = match selection {
            ColumnSelection::Explicit(cols) => {
                let entity_type = cols
                    .first()
                    .map(|c| c.entity_type)
                    .unwrap_or(EntityKind::Account);
                (entity_type, cols)
            }
            ColumnSelection::AllActiveFor(entity_type) => {
                let cols = self.catalog.active_columns_for(entity_type).await?;
                (entity_type, cols)
            }
        };

        let edges = self.catalog.dependency_edges(entity_type).await?;
        let graph = ColumnGraph::from_edges(edges);
        let expanded = Self::expand_with_dependencies(&columns, &graph);

        let order = match graph.topological_sort(&expanded) {
            Ok(sorted) => sorted,
            Err(err) => {
                warn!(error = %err, "dependency cycle detected, falling back to input order");
                expanded
            }
        };

        self.catalog.bump_last_refresh(&order).await?;

        let Some((head, tail)) = order.split_first() else {
            return Ok(StartReceipt {
                orchestration_order: Vec::new(),
                first_job_submitted: String::new(),
            });
        };

        let head_column = columns
            .iter()
            .find(|c| &c.id == head)
            .cloned();
        let head_column = match head_column {
            Some(c) => c,
            None => self.catalog.get_column(head).await?,
        };

        let job_id = uuid::Uuid::new_v4().to_string();
        let payload = TaskPayload {
            job_id: job_id.clone(),
            enrichment_type: crate::types::EnrichmentType::CustomColumn,
            entity_ids: entity_ids.clone(),
            context_data: Default::default(),
            tenant_id: tenant_id.to_string(),
            batch_size,
            concurrent_requests: crate::config::DEFAULT_CONCURRENT_REQUESTS,
            ai_config: head_column.ai_config.clone(),
            column: Some(head_column),
            orchestration_data: Some(OrchestrationData {
                next_columns: tail.to_vec(),
                entity_ids,
                batch_size,
                tenant_id: tenant_id.to_string(),
                request_id: request_id.to_string(),
            }),
            attempt_number: 0,
            max_retries: 3,
        };
        self.submitter.submit_custom_column_task(payload).await?;

        Ok(StartReceipt {
            orchestration_order: order,
            first_job_submitted: job_id,
        })
    }

    /// Advance the orchestration after one column's task reached a
    /// terminal callback. `completed` columns with a nonempty
    /// `next_columns` submit the next task; `failed` columns stop the
    /// chain and surface the failure to the caller.
    #[instrument(skip(self, orchestration_data))]
    pub async fn handle_column_completion(
        &self,
        orchestration_data: OrchestrationData,
        status: CallbackStatus,
    ) -> Result<NextStepReceipt, EngineError> {
        if status == CallbackStatus::Failed {
            warn!("column task failed, halting orchestration chain");
            return Ok(NextStepReceipt {
                submitted: None,
                finished: true,
            });
        }
        if status != CallbackStatus::Completed {
            return Ok(NextStepReceipt {
                submitted: None,
                finished: false,
            });
        }

        let Some((head, tail)) = orchestration_data.next_columns.split_first() else {
            return Ok(NextStepReceipt {
                submitted: None,
                finished: true,
            });
        };
        let head_column = self.catalog.get_column(head).await?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let payload = TaskPayload {
            job_id: job_id.clone(),
            enrichment_type: crate::types::EnrichmentType::CustomColumn,
            entity_ids: orchestration_data.entity_ids.clone(),
            context_data: Default::default(),
            tenant_id: orchestration_data.tenant_id.clone(),
            batch_size: orchestration_data.batch_size,
            concurrent_requests: crate::config::DEFAULT_CONCURRENT_REQUESTS,
            ai_config: head_column.ai_config.clone(),
            column: Some(head_column),
            orchestration_data: Some(OrchestrationData {
                next_columns: tail.to_vec(),
                entity_ids: orchestration_data.entity_ids,
                batch_size: orchestration_data.batch_size,
                tenant_id: orchestration_data.tenant_id,
                request_id: orchestration_data.request_id,
            }),
            attempt_number: 0,
            max_retries: 3,
        };
        self.submitter.submit_custom_column_task(payload).await?;

        Ok(NextStepReceipt {
            submitted: Some(job_id),
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::types::EntityKind;

    struct RecordingSubmitter {
        submitted: Mutex<Vec<TaskPayload>>,
    }

    #[async_trait]
    impl TaskSubmitter for RecordingSubmitter {
        async fn submit_custom_column_task(&self, payload: TaskPayload) -> Result<(), EngineError> {
            self.submitted.lock().unwrap().push(payload);
            Ok(())
        }
    }

    struct StaticCatalog {
        edges: Vec<(String, String)>,
    }

    #[async_trait]
    impl ColumnCatalog for StaticCatalog {
        async fn active_columns_for(&self, _entity_type: EntityKind) -> Result<Vec<Column>, EngineError> {
            Ok(Vec::new())
        }

        async fn dependency_edges(&self, _entity_type: EntityKind) -> Result<Vec<(String, String)>, EngineError> {
            Ok(self.edges.clone())
        }

        async fn bump_last_refresh(&self, _column_ids: &[String]) -> Result<(), EngineError> {
            Ok(())
        }

        async fn get_column(&self, column_id: &str) -> Result<Column, EngineError> {
            Ok(column(column_id))
        }
    }

    fn column(id: &str) -> Column {
        Column {
            id: id.to_string(),
            entity_type: EntityKind::Account,
            response_type: crate::column::ResponseType::String,
            response_config: Default::default(),
            question: "q".to_string(),
            description: String::new(),
            ai_config: AiConfig::default(),
            uses_linkedin_activity: false,
            last_refresh: None,
        }
    }

    #[tokio::test]
    async fn expands_and_orders_dependencies_before_submitting() {
        // c depends on b depends on a
        let catalog = StaticCatalog {
            edges: vec![("c".to_string(), "b".to_string()), ("b".to_string(), "a".to_string())],
        };
        let submitter = RecordingSubmitter {
            submitted: Mutex::new(Vec::new()),
        };
        let orchestrator = ColumnOrchestrator::new(submitter, catalog);

        let receipt = orchestrator
            .start_orchestrated(
                "tenant-1",
                "req-1",
                vec!["acct-1".to_string()],
                ColumnSelection::Explicit(vec![column("c")]),
                10,
            )
            .await
            .unwrap();

        assert_eq!(receipt.orchestration_order, vec!["a", "b", "c"]);
        let submitted = orchestrator.submitter.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let orch = submitted[0].orchestration_data.as_ref().unwrap();
        assert_eq!(orch.next_columns, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn completion_submits_next_column_until_exhausted() {
        let catalog = StaticCatalog { edges: vec![] };
        let submitter = RecordingSubmitter {
            submitted: Mutex::new(Vec::new()),
        };
        let orchestrator = ColumnOrchestrator::new(submitter, catalog);

        let data = OrchestrationData {
            next_columns: vec!["b".to_string(), "c".to_string()],
            entity_ids: vec!["acct-1".to_string()],
            batch_size: 10,
            tenant_id: "tenant-1".to_string(),
            request_id: "req-1".to_string(),
        };
        let receipt = orchestrator
            .handle_column_completion(data, CallbackStatus::Completed)
            .await
            .unwrap();
        assert!(receipt.submitted.is_some());
        assert!(!receipt.finished);

        let data = OrchestrationData {
            next_columns: Vec::new(),
            entity_ids: vec!["acct-1".to_string()],
            batch_size: 10,
            tenant_id: "tenant-1".to_string(),
            request_id: "req-1".to_string(),
        };
        let receipt = orchestrator
            .handle_column_completion(data, CallbackStatus::Completed)
            .await
            .unwrap();
        assert!(receipt.submitted.is_none());
        assert!(receipt.finished);
    }

    #[tokio::test]
    async fn failed_status_halts_chain() {
        let catalog = StaticCatalog { edges: vec![] };
        let submitter = RecordingSubmitter {
            submitted: Mutex::new(Vec::new()),
        };
        let orchestrator = ColumnOrchestrator::new(submitter, catalog);
        let data = OrchestrationData {
            next_columns: vec!["b".to_string()],
            entity_ids: vec!["acct-1".to_string()],
            batch_size: 10,
            tenant_id: "tenant-1".to_string(),
            request_id: "req-1".to_string(),
        };
        let receipt = orchestrator
            .handle_column_completion(data, CallbackStatus::Failed)
            .await
            .unwrap();
        assert!(receipt.finished);
        assert!(receipt.submitted.is_none());
        assert!(orchestrator.submitter.submitted.lock().unwrap().is_empty());
    }
}
