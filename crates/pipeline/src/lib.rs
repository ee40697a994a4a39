//! Dispatch domain for flowdispatch.
//!
//! This crate holds everything that decides *what* happens to a submitted
//! workflow graph: the graph model, archetype classification, prompt
//! composition, response parsing, quota arithmetic and the execution records
//! that get persisted. Infrastructure crates implement the [`ports`] traits;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; `llm` and `store` define *how* to supply it,
//! and `dispatcher` sequences the calls.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`NodeId`, `UserId`, `ExecutionId`, ...) |
//! | [`types`] | Shared value types (`Timestamp`, `QuotaWindow`, `Credits`, ...) |
//! | [`errors`] | Port error enums |
//! | [`graph`] | Workflow graph, node vocabulary, node manifest |
//! | [`media`] | Video references and fetched content |
//! | [`classifier`] | Archetype selection |
//! | [`composer`] | Prompt composition per archetype |
//! | [`parser`] | Tolerant extraction of the model's JSON payload |
//! | [`quota`] | Subscription tiers, limits and quota decisions |
//! | [`execution`] | Execution records and per-node results |
//! | [`ports`] | Traits for the model, store, sessions and content fetching |

pub mod classifier;
pub mod composer;
pub mod errors;
pub mod execution;
pub mod graph;
pub mod identifiers;
pub mod media;
pub mod parser;
pub mod ports;
pub mod quota;
pub mod types;

/// Tracing target for response parsing.
pub const TRACING_TARGET_PARSER: &str = "flowdispatch::parser";

/// Tracing target for prompt composition.
pub const TRACING_TARGET_COMPOSER: &str = "flowdispatch::composer";

pub use classifier::{classify, Archetype, GraphProfile, NodeBuckets, SimulationMode};
pub use composer::{compose, ComposeInput, PromptSpec};
pub use errors::{FetchError, ModelError, SessionError, StoreError};
pub use execution::{ExecutionRecord, ExecutionStatus, NodeResult, RESULT_SUMMARY_MAX_CHARS};
pub use graph::{
    Edge, ManifestAudit, ManifestEntry, Node, NodeCapability, NodeKind, NodeManifest,
    WorkflowGraph,
};
pub use identifiers::{ExecutionId, NodeId, ReservationId, UserId, WorkflowId};
pub use media::{ExternalContent, MediaReference, DEFAULT_CONTENT_BUDGET};
pub use parser::{parse_response, ParsedResponse, PayloadSource};
pub use ports::{
    AccountDirectory, ContentFetcher, ExecutionStore, GenerationRequest, ModelClient,
    SessionResolver, SlotReservation,
};
pub use quota::{ExecutionLimit, QuotaDecision, QuotaPolicy, SubscriptionTier};
pub use types::{Credits, GenerationParameters, QuotaWindow, Temperature, Timestamp};
