//! Outbound HTTP adapters for flowdispatch.
//!
//! Implements two [`pipeline::ports`] traits:
//!
//! - [`GeminiClient`] implements [`pipeline::ModelClient`] against the Gemini
//!   `generateContent` REST endpoint, with optional video attachment.
//! - [`HttpContentFetcher`] implements [`pipeline::ContentFetcher`] by
//!   downloading a page and reducing it to its title and visible text.
//!
//! ## Architectural Layer
//!
//! **Infrastructure adapter.** Translates HTTP status codes and provider error
//! bodies into [`pipeline::ModelError`] / [`pipeline::FetchError`] variants.
//! No retries and no domain rules live here.

mod fetcher;
mod gemini;

pub use fetcher::{FetcherConfig, HttpContentFetcher};
pub use gemini::{GeminiClient, GeminiConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

/// Tracing target for generative backend calls.
pub const TRACING_TARGET_GEMINI: &str = "flowdispatch::llm::gemini";

/// Tracing target for content fetching.
pub const TRACING_TARGET_FETCH: &str = "flowdispatch::llm::fetch";
