//! Scenario D: columns submitted in reverse dependency order (C, B, A)
//! still execute in dependency order (A, then B, then C), advancing one
//! task at a time via `orchestration_data.next_columns`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use enrichment_engine::callback::CallbackStatus;
use enrichment_engine::column::{Column, ResponseConfig, ResponseType};
use enrichment_engine::error::EngineError;
use enrichment_engine::orchestrator::{ColumnCatalog, ColumnOrchestrator, ColumnSelection, TaskSubmitter};
use enrichment_engine::task::{AiConfig, TaskPayload};
use enrichment_engine::types::EntityKind;

struct RecordingSubmitter {
    log: Arc<Mutex<Vec<TaskPayload>>>,
}

#[async_trait]
impl TaskSubmitter for RecordingSubmitter {
    async fn submit_custom_column_task(&self, payload: TaskPayload) -> Result<(), EngineError> {
        self.log.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Chain A -> B -> C: B requires A, C requires B, so the dependency
/// order (dependencies first) is A, then B, then C.
struct ChainCatalog;

#[async_trait]
impl ColumnCatalog for ChainCatalog {
    async fn active_columns_for(&self, _entity_type: EntityKind) -> Result<Vec<Column>, EngineError> {
        Ok(Vec::new())
    }

    async fn dependency_edges(&self, _entity_type: EntityKind) -> Result<Vec<(String, String)>, EngineError> {
        Ok(vec![("b".to_string(), "a".to_string()), ("c".to_string(), "b".to_string())])
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
        response_type: ResponseType::String,
        response_config: ResponseConfig::default(),
        question: format!("question for {id}"),
        description: String::new(),
        ai_config: AiConfig::default(),
        uses_linkedin_activity: false,
        last_refresh: None,
    }
}

#[tokio::test]
async fn scenario_d_reverse_submission_executes_in_dependency_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let submitter = RecordingSubmitter { log: log.clone() };
    let orchestrator = ColumnOrchestrator::new(submitter, ChainCatalog);

    // Submitted as column_ids=["c", "b", "a"] (reverse of execution order).
    let selection = ColumnSelection::Explicit(vec![column("c"), column("b"), column("a")]);
    let receipt = orchestrator
        .start_orchestrated("tenant-1", "req-1", vec!["X".to_string()], selection, 10)
        .await
        .unwrap();

    assert_eq!(receipt.orchestration_order, vec!["a", "b", "c"]);

    let first = log.lock().unwrap()[0].clone();
    assert_eq!(first.column.as_ref().unwrap().id, "a");
    let orch = first.orchestration_data.clone().unwrap();
    assert_eq!(orch.next_columns, vec!["b", "c"]);

    // Simulate the first task's completed callback; the orchestrator
    // submits the next column only now, never eagerly.
    let next = orchestrator
        .handle_column_completion(orch, CallbackStatus::Completed)
        .await
        .unwrap();
    assert!(next.submitted.is_some());
    assert_eq!(log.lock().unwrap().len(), 2);
    let second = log.lock().unwrap()[1].clone();
    assert_eq!(second.column.as_ref().unwrap().id, "b");

    let orch = second.orchestration_data.clone().unwrap();
    let last = orchestrator
        .handle_column_completion(orch, CallbackStatus::Completed)
        .await
        .unwrap();
    assert!(last.submitted.is_some());
    assert_eq!(log.lock().unwrap().len(), 3);
    let third = log.lock().unwrap()[2].clone();
    assert_eq!(third.column.as_ref().unwrap().id, "c");

    let orch = third.orchestration_data.clone().unwrap();
    let finished = orchestrator
        .handle_column_completion(orch, CallbackStatus::Completed)
        .await
        .unwrap();
    assert!(finished.finished);
    assert!(finished.submitted.is_none());
}
