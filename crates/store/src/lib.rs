//! Persistence and session adapters for flowdispatch.
//!
//! Implements the storage-facing [`pipeline::ports`] traits twice:
//!
//! - [`MemoryStore`]: process-local state behind one mutex. Used when no
//!   datastore is configured and as the fake in orchestrator tests.
//! - [`RestStore`]: a PostgREST datastore. Tables `executions`,
//!   `node_results`, `subscriptions`, `profiles`; RPC functions
//!   `reserve_execution_slot`, `release_execution_slot`, `deduct_credits`.
//!
//! Sessions are resolved by [`GoTrueSessionResolver`] against the datastore's
//! auth service, or by [`BearerIdentityResolver`] for local development.
//!
//! ## Architectural Layer
//!
//! **Infrastructure adapter.** Row shapes, HTTP headers and RPC payloads live
//! here; quota arithmetic and tier fallback rules stay in `pipeline` and
//! `dispatcher`.

mod memory;
mod rest;
mod session;

pub use memory::MemoryStore;
pub use rest::{RestConfig, RestStore};
pub use session::{BearerIdentityResolver, GoTrueSessionResolver};

/// Tracing target for datastore calls.
pub const TRACING_TARGET_STORE: &str = "flowdispatch::store";

/// Tracing target for session resolution.
pub const TRACING_TARGET_SESSION: &str = "flowdispatch::session";
