//! # enrichment-engine: lead and account enrichment orchestration
//!
//! Fetches third-party data about accounts and leads, normalises and
//! merges it, invokes LLM providers for structured extraction and
//! tenant-defined custom-column Q&A (optionally web-grounded), streams
//! progress back to a control plane via idempotent HTTP callbacks, and
//! persists intermediate and final results for replay.
//!
//! ## Module guide
//!
//! - [`retry`] / [`error`] — the crate's retry-with-backoff primitive and
//!   error taxonomy every other module builds on.
//! - [`config`] — environment-driven [`config::EngineConfig`].
//! - [`telemetry`] — `tracing` subscriber initialisation.
//! - [`types`] / [`task`] / [`column`] / [`callback`] — the shared
//!   vocabulary: entity/enrichment identifiers, task payloads, the
//!   custom-column schema, and the callback protocol.
//! - [`cache`] — the external-API and LLM prompt/response cache tiers.
//! - [`llm`] — the [`llm::LlmProvider`] abstraction and its Gemini-like,
//!   OpenAI-like, and fallback implementations.
//! - [`batch`] — concurrency-bounded fan-out over a batch of entities.
//! - [`graph`] — the custom-column dependency graph.
//! - [`result_store`] — idempotent, batched result persistence.
//! - [`callback_handler`] — the inbound, paginated callback merge path.
//! - [`adapters`] — typed seams onto third-party data providers.
//! - [`tasks`] — the task pipelines: custom column, account enhancement,
//!   LinkedIn activity.
//! - [`orchestrator`] — multi-column dependency-ordered task chaining.
//! - [`app`] — [`app::EnrichmentEngine`], the builder-constructed struct
//!   wiring every piece above together for one process.
//!
//! ## Quick start
//!
//! ```
//! use enrichment_engine::app::EnrichmentEngine;
//!
//! let engine = EnrichmentEngine::builder().build();
//! let _custom_column_runner = engine.custom_column_runner();
//! let _account_enhancement_runner = engine.account_enhancement_runner();
//! let _linkedin_activity_runner = engine.linkedin_activity_runner();
//! ```

pub mod adapters;
pub mod app;
pub mod batch;
pub mod cache;
pub mod callback;
pub mod callback_handler;
pub mod column;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod result_store;
pub mod retry;
pub mod task;
pub mod tasks;
pub mod telemetry;
pub mod types;
