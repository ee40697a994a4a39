//! Port traits implemented by infrastructure crates.
//!
//! The dispatch domain defines *what* it needs from the outside world here;
//! `llm` and `store` supply *how*. Every trait is object-safe so the
//! orchestrator can hold `Arc<dyn Trait>` and tests can substitute fakes.

use async_trait::async_trait;

use crate::errors::{FetchError, ModelError, SessionError, StoreError};
use crate::execution::{ExecutionRecord, NodeResult};
use crate::media::{ExternalContent, MediaReference};
use crate::quota::SubscriptionTier;
use crate::types::{Credits, GenerationParameters, QuotaWindow};
use crate::{ReservationId, UserId};

// ---------------------------------------------------------------------------
// Generative backend
// ---------------------------------------------------------------------------

/// One call to the generative backend.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Full instruction text.
    pub instructions: &'a str,
    /// Sampling settings.
    pub parameters: GenerationParameters,
    /// Media to attach alongside the text, for multimodal calls.
    pub media: Option<&'a MediaReference>,
}

/// A generative text model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier reported by the health endpoint.
    fn model_name(&self) -> &str;

    /// Generates text for `request`. A single attempt; no retries.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, ModelError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Outcome of an atomic reserve-if-under-limit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReservation {
    /// A slot is held for this run.
    Granted {
        /// Reservation to consume on success or release on failure.
        id: ReservationId,
        /// Executions and reservations counted before this one.
        used: u32,
    },
    /// The limit was already reached.
    Denied {
        /// Executions and reservations counted.
        used: u32,
    },
}

/// Execution records, node results and the monthly counter behind the quota.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Counts the user's execution records created within `window`.
    async fn count_executions(&self, user: &UserId, window: QuotaWindow) -> Result<u32, StoreError>;

    /// Atomically counts executions plus outstanding reservations in `window`
    /// and, if the total is below `limit`, reserves one more slot.
    async fn reserve_slot(
        &self,
        user: &UserId,
        window: QuotaWindow,
        limit: u32,
    ) -> Result<SlotReservation, StoreError>;

    /// Frees a reservation whose run did not produce a record.
    async fn release_slot(&self, reservation: ReservationId) -> Result<(), StoreError>;

    /// Writes the execution record, consuming `reservation` if one was held.
    async fn create_execution(
        &self,
        record: &ExecutionRecord,
        reservation: Option<ReservationId>,
    ) -> Result<(), StoreError>;

    /// Bulk-inserts node results for one execution.
    async fn insert_node_results(&self, results: &[NodeResult]) -> Result<(), StoreError>;
}

/// Subscription and credit balance lookups.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Tier of the user's active subscription record, if any.
    async fn active_subscription_tier(
        &self,
        user: &UserId,
    ) -> Result<Option<SubscriptionTier>, StoreError>;

    /// Tier recorded on the user's profile, if any.
    async fn profile_tier(&self, user: &UserId) -> Result<Option<SubscriptionTier>, StoreError>;

    /// Deducts `credits` from the user's balance.
    async fn deduct_credits(&self, user: &UserId, credits: Credits) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Sessions and content
// ---------------------------------------------------------------------------

/// Maps request credentials to a user.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolves the bearer token sent with a request.
    async fn resolve(&self, bearer_token: Option<&str>) -> Result<UserId, SessionError>;
}

/// Retrieves the text behind a content node's URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches `url` and returns its title and plain text.
    async fn fetch(&self, url: &str) -> Result<ExternalContent, FetchError>;
}
