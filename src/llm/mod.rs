//! LLM provider abstraction: a uniform capability set over multiple
//! providers, owning caching, keying, retries, and provider fallback.

pub mod fallback;
pub mod gemini_like;
pub mod json_repair;
pub mod openai_like;
pub mod provider;

pub use fallback::FallbackProvider;
pub use gemini_like::GeminiLikeProvider;
pub use openai_like::OpenAiLikeProvider;
pub use provider::{
    GenerateContentRequest, GenerateSearchRequest, LlmProvider, Prompt, SearchMetadata,
    SearchSource, StructuredSearchRequest, TokenUsage,
};
