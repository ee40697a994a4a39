//! Execution orchestration for flowdispatch.
//!
//! [`ExecutionOrchestrator`] drives one submitted graph through
//! `received → quota-checked → classified → prompted → invoked → parsed →
//! persisted → responded`. [`QuotaGuard`] and [`ModelInvoker`] are the two
//! collaborators with policy of their own; everything else is reached through
//! the [`pipeline::ports`] traits.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Sequences calls between business logic in the
//! [`pipeline`] crate and the injected infrastructure adapters. Holds no
//! domain rules of its own and performs no I/O directly.

mod error;
mod invoker;
mod orchestrator;
mod quota;

pub use error::DispatchError;
pub use invoker::{Invocation, ModelInvoker};
pub use orchestrator::{
    BackendHealth, Collaborators, DispatchSettings, ExecutionMetadata, ExecutionOrchestrator,
    ExecutionOutcome, ExecutionRequest, ExecutionStage,
};
pub use quota::{Admission, QuotaGuard, SlotHold};

/// Tracing target for the execution state machine.
pub const TRACING_TARGET_ORCHESTRATOR: &str = "flowdispatch::orchestrator";

/// Tracing target for quota decisions and credit charges.
pub const TRACING_TARGET_QUOTA: &str = "flowdispatch::quota";

/// Tracing target for model invocation.
pub const TRACING_TARGET_INVOKER: &str = "flowdispatch::invoker";
