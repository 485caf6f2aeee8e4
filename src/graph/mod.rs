//! Dependency graph over custom columns: direct/transitive lookups,
//! cycle detection, and topological ordering for the column-generation
//! orchestrator.

pub mod dependency;

pub use dependency::ColumnGraph;
