//! Task pipelines built on the shared batch processor (§4.4), each
//! wiring one `enrichment_type` to the primitives in [`crate::adapters`]
//! and [`crate::llm`].

pub mod account_enhancement;
pub mod custom_column;
pub mod linkedin_activity;

pub use account_enhancement::{AccountEnhancementRunner, AccountInfo};
pub use custom_column::{CustomColumnRunner, ProviderRegistry, coerce_value};
pub use linkedin_activity::{Insights, LinkedInActivity, LinkedinActivityRunner};
