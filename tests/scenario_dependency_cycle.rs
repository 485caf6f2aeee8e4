//! Scenario C: a proposed edge that would close a cycle is rejected by
//! `would_create_cycle` and `topological_sort` surfaces the same cycle
//! as a `ValidationError`.

use enrichment_engine::error::ValidationError;
use enrichment_engine::graph::ColumnGraph;

#[test]
fn scenario_c_dependency_cycle_rejected() {
    // Existing edges A -> B, B -> C (A depends on B, B depends on C).
    let graph = ColumnGraph::from_edges(vec![
        ("A".to_string(), "B".to_string()),
        ("B".to_string(), "C".to_string()),
    ]);

    // Attempting C -> A would close A -> B -> C -> A.
    assert!(graph.would_create_cycle("C", "A"));

    let mut with_bad_edge = graph.clone();
    with_bad_edge.add_edge("C", "A");
    let err = with_bad_edge
        .topological_sort(&["a".to_string(), "b".to_string(), "c".to_string()])
        .unwrap_err();
    assert!(matches!(err, ValidationError::DependencyCycle { .. }));
    assert_eq!(err.to_string(), "this dependency would create a circular reference");
}
