//! Process-local store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use pipeline::{
    AccountDirectory, Credits, ExecutionId, ExecutionRecord, ExecutionStore, NodeResult,
    QuotaWindow, ReservationId, SlotReservation, StoreError, SubscriptionTier, Timestamp, UserId,
};

use crate::TRACING_TARGET_STORE;

#[derive(Debug, Default)]
struct State {
    executions: Vec<ExecutionRecord>,
    node_results: Vec<NodeResult>,
    reservations: HashMap<ReservationId, Reservation>,
    subscriptions: HashMap<UserId, SubscriptionTier>,
    profiles: HashMap<UserId, SubscriptionTier>,
    credits: HashMap<UserId, u32>,
}

#[derive(Debug, Clone)]
struct Reservation {
    user: UserId,
    reserved_at: Timestamp,
}

impl State {
    fn used_in(&self, user: &UserId, window: QuotaWindow) -> u32 {
        let executions = self
            .executions
            .iter()
            .filter(|record| &record.user_id == user && window.contains(record.started_at))
            .count();
        let reserved = self
            .reservations
            .values()
            .filter(|reservation| {
                &reservation.user == user && window.contains(reservation.reserved_at)
            })
            .count();
        u32::try_from(executions + reserved).unwrap_or(u32::MAX)
    }
}

/// In-memory [`ExecutionStore`] and [`AccountDirectory`].
///
/// All state sits behind one mutex, so `reserve_slot` is atomic with respect
/// to every other call on the same instance. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an active subscription for `user`.
    #[must_use]
    pub fn with_subscription(self, user: UserId, tier: SubscriptionTier) -> Self {
        self.lock().subscriptions.insert(user, tier);
        self
    }

    /// Records a profile tier for `user`.
    #[must_use]
    pub fn with_profile_tier(self, user: UserId, tier: SubscriptionTier) -> Self {
        self.lock().profiles.insert(user, tier);
        self
    }

    /// Sets the credit balance of `user`.
    #[must_use]
    pub fn with_credits(self, user: UserId, balance: u32) -> Self {
        self.lock().credits.insert(user, balance);
        self
    }

    /// Inserts a completed execution as if an earlier run had produced it.
    #[must_use]
    pub fn with_execution(self, record: ExecutionRecord) -> Self {
        self.lock().executions.push(record);
        self
    }

    /// Snapshot of every stored execution record.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }

    /// Snapshot of the node results stored for `execution`.
    pub fn node_results(&self, execution: ExecutionId) -> Vec<NodeResult> {
        self.lock()
            .node_results
            .iter()
            .filter(|result| result.execution_id == execution)
            .cloned()
            .collect()
    }

    /// Current credit balance of `user`; zero when never set.
    pub fn credit_balance(&self, user: &UserId) -> u32 {
        self.lock().credits.get(user).copied().unwrap_or_default()
    }

    /// Reservations not yet consumed or released.
    pub fn outstanding_reservations(&self) -> usize {
        self.lock().reservations.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn count_executions(&self, user: &UserId, window: QuotaWindow) -> Result<u32, StoreError> {
        let state = self.lock();
        let count = state
            .executions
            .iter()
            .filter(|record| &record.user_id == user && window.contains(record.started_at))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn reserve_slot(
        &self,
        user: &UserId,
        window: QuotaWindow,
        limit: u32,
    ) -> Result<SlotReservation, StoreError> {
        let mut state = self.lock();
        let used = state.used_in(user, window);
        if used >= limit {
            return Ok(SlotReservation::Denied { used });
        }

        let id = ReservationId::new_random();
        state.reservations.insert(
            id,
            Reservation {
                user: user.clone(),
                reserved_at: Timestamp::now(),
            },
        );
        tracing::trace!(target: TRACING_TARGET_STORE, %user, %id, used, limit, "slot reserved");
        Ok(SlotReservation::Granted { id, used })
    }

    async fn release_slot(&self, reservation: ReservationId) -> Result<(), StoreError> {
        self.lock()
            .reservations
            .remove(&reservation)
            .map(|_| ())
            .ok_or(StoreError::UnknownReservation)
    }

    async fn create_execution(
        &self,
        record: &ExecutionRecord,
        reservation: Option<ReservationId>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(id) = reservation {
            state
                .reservations
                .remove(&id)
                .ok_or(StoreError::UnknownReservation)?;
        }
        state.executions.push(record.clone());
        Ok(())
    }

    async fn insert_node_results(&self, results: &[NodeResult]) -> Result<(), StoreError> {
        self.lock().node_results.extend_from_slice(results);
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn active_subscription_tier(
        &self,
        user: &UserId,
    ) -> Result<Option<SubscriptionTier>, StoreError> {
        Ok(self.lock().subscriptions.get(user).copied())
    }

    async fn profile_tier(&self, user: &UserId) -> Result<Option<SubscriptionTier>, StoreError> {
        Ok(self.lock().profiles.get(user).copied())
    }

    async fn deduct_credits(&self, user: &UserId, credits: Credits) -> Result<(), StoreError> {
        let mut state = self.lock();
        let balance = state.credits.entry(user.clone()).or_default();
        *balance = balance.saturating_sub(credits.as_u32());
        Ok(())
    }
}
