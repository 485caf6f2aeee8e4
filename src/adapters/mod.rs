//! Typed external adapters.
//!
//! The engine treats the exact wire format of every third-party provider
//! (web search, technographic data, generic web-profile fetches, LinkedIn
//! activity) as an adapter concern: each submodule owns request shaping
//! and response parsing for one provider family behind a small trait, so
//! the task pipeline in [`crate::tasks`] only ever depends on the typed
//! result. All adapters route outbound HTTP through [`crate::cache::api_cache::ApiCache`]
//! so retries, caching, and tenant scoping are uniform.

pub mod linkedin;
pub mod profile;
pub mod search;
pub mod technographic;

pub use linkedin::{HttpLinkedinAdapter, LinkedinAdapter, RawLinkedinActivity};
pub use profile::{HttpProfileAdapter, ProfileAdapter, WebProfile};
pub use search::{HttpSearchAdapter, SearchAdapter, SearchResult};
pub use technographic::{
    BuiltWithAdapter, QualityMetrics, TechnographicAdapter, TechnologyDetail, TechnologyProfile,
    WebsiteParserAdapter, quality_metrics,
};
