//! Monthly execution quota and credit charging.

use std::sync::Arc;

use tokio::runtime::Handle;

use pipeline::{
    AccountDirectory, Credits, ExecutionLimit, ExecutionStore, QuotaDecision, QuotaPolicy,
    QuotaWindow, ReservationId, SlotReservation, SubscriptionTier, Timestamp, UserId,
};

use crate::TRACING_TARGET_QUOTA;

/// Outcome of [`QuotaGuard::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The decision, with `used` counted before this run.
    pub decision: QuotaDecision,
    /// Slot held for this run. `None` for unlimited tiers, for denials, and
    /// when the store could not be asked.
    pub reservation: Option<ReservationId>,
}

/// Decides whether a user may start another execution this month.
///
/// Tier lookup falls back from the active subscription to the profile to
/// [`SubscriptionTier::Free`]; any lookup failure also lands on the free tier.
/// Store failures while counting fail open and are logged.
pub struct QuotaGuard {
    store: Arc<dyn ExecutionStore>,
    accounts: Arc<dyn AccountDirectory>,
    policy: QuotaPolicy,
}

impl QuotaGuard {
    /// Creates a guard over `store` and `accounts`.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        accounts: Arc<dyn AccountDirectory>,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            store,
            accounts,
            policy,
        }
    }

    /// The tier → limit table in force.
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Resolves the user's subscription tier.
    pub async fn resolve_tier(&self, user: &UserId) -> SubscriptionTier {
        match self.accounts.active_subscription_tier(user).await {
            Ok(Some(tier)) => return tier,
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_QUOTA,
                    %user,
                    %error,
                    "subscription lookup failed; using lowest tier"
                );
                return SubscriptionTier::Free;
            }
        }
        match self.accounts.profile_tier(user).await {
            Ok(tier) => tier.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_QUOTA,
                    %user,
                    %error,
                    "profile lookup failed; using lowest tier"
                );
                SubscriptionTier::Free
            }
        }
    }

    /// Reports the user's standing without reserving anything.
    pub async fn check(&self, user: &UserId, now: Timestamp) -> QuotaDecision {
        let tier = self.resolve_tier(user).await;
        let limit = self.policy.limit_for(tier);
        let used = match limit {
            ExecutionLimit::Unlimited => 0,
            ExecutionLimit::Limited(_) => self
                .store
                .count_executions(user, QuotaWindow::month_of(now))
                .await
                .unwrap_or_else(|error| {
                    tracing::warn!(
                        target: TRACING_TARGET_QUOTA,
                        %user,
                        %error,
                        "execution count failed"
                    );
                    0
                }),
        };
        QuotaDecision::evaluate(tier, limit, used)
    }

    /// Admits one execution, holding a slot until the run is recorded or released.
    pub async fn admit(&self, user: &UserId, now: Timestamp) -> Admission {
        let tier = self.resolve_tier(user).await;
        let limit = self.policy.limit_for(tier);

        let ExecutionLimit::Limited(max) = limit else {
            return Admission {
                decision: QuotaDecision::evaluate(tier, limit, 0),
                reservation: None,
            };
        };

        let admission = match self.store.reserve_slot(user, QuotaWindow::month_of(now), max).await {
            Ok(SlotReservation::Granted { id, used }) => Admission {
                decision: QuotaDecision::evaluate(tier, limit, used),
                reservation: Some(id),
            },
            Ok(SlotReservation::Denied { used }) => Admission {
                decision: QuotaDecision::evaluate(tier, limit, used.max(max)),
                reservation: None,
            },
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_QUOTA,
                    %user,
                    %error,
                    "slot reservation failed; admitting without a slot"
                );
                Admission {
                    decision: QuotaDecision::evaluate(tier, limit, 0),
                    reservation: None,
                }
            }
        };

        tracing::debug!(
            target: TRACING_TARGET_QUOTA,
            %user,
            %tier,
            limit = i64::from(limit),
            used = admission.decision.used,
            allowed = admission.decision.allowed,
            "quota evaluated"
        );
        admission
    }

    /// Holds `reservation` for one run. The slot is freed when the hold is
    /// dropped without [`SlotHold::recorded`] being called.
    pub fn hold(&self, reservation: Option<ReservationId>) -> SlotHold {
        SlotHold {
            store: self.store.clone(),
            reservation,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Deducts `max(1, node_count)` credits. Failures are logged and never
    /// affect the execution.
    pub async fn charge(&self, user: &UserId, node_count: usize) {
        let credits = Credits::for_nodes(node_count);
        match self.accounts.deduct_credits(user, credits).await {
            Ok(()) => {
                tracing::debug!(target: TRACING_TARGET_QUOTA, %user, %credits, "credits deducted");
            }
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_QUOTA,
                    %user,
                    %credits,
                    %error,
                    "credit deduction failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for QuotaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGuard")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SlotHold
// ---------------------------------------------------------------------------

/// A quota slot held by a run in flight.
///
/// Dropping an unrecorded hold releases the slot on a spawned task, so a run
/// abandoned mid-flight (client disconnect, timeout) does not keep it.
pub struct SlotHold {
    store: Arc<dyn ExecutionStore>,
    reservation: Option<ReservationId>,
    runtime: Option<Handle>,
}

impl SlotHold {
    /// The held reservation, if any.
    pub fn reservation(&self) -> Option<ReservationId> {
        self.reservation
    }

    /// Marks the slot as consumed by a stored execution record.
    pub fn recorded(mut self) {
        self.reservation = None;
    }

    /// Frees the slot now. Failures are logged.
    pub async fn release(mut self) {
        if let Some(reservation) = self.reservation.take() {
            release_slot(self.store.as_ref(), reservation).await;
        }
    }
}

impl Drop for SlotHold {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        let Some(runtime) = &self.runtime else {
            tracing::warn!(
                target: TRACING_TARGET_QUOTA,
                %reservation,
                "abandoned quota slot outside a runtime; not released"
            );
            return;
        };

        let store = self.store.clone();
        runtime.spawn(async move {
            tracing::debug!(
                target: TRACING_TARGET_QUOTA,
                %reservation,
                "releasing abandoned quota slot"
            );
            release_slot(store.as_ref(), reservation).await;
        });
    }
}

impl std::fmt::Debug for SlotHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHold")
            .field("reservation", &self.reservation)
            .finish_non_exhaustive()
    }
}

async fn release_slot(store: &dyn ExecutionStore, reservation: ReservationId) {
    if let Err(error) = store.release_slot(reservation).await {
        tracing::warn!(
            target: TRACING_TARGET_QUOTA,
            %reservation,
            %error,
            "failed to release quota slot"
        );
    }
}

#[cfg(test)]
mod tests {
    use store::MemoryStore;

    use super::*;
    use pipeline::{ExecutionId, ExecutionRecord};

    fn user() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn prior_runs(store: MemoryStore, count: usize) -> MemoryStore {
        (0..count).fold(store, |store, _| {
            store.with_execution(ExecutionRecord::completed(
                ExecutionId::new_random(),
                user(),
                None,
                Timestamp::now(),
                "earlier",
                2,
            ))
        })
    }

    fn guard(store: MemoryStore) -> (QuotaGuard, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (
            QuotaGuard::new(store.clone(), store.clone(), QuotaPolicy::default()),
            store,
        )
    }

    #[tokio::test]
    async fn free_tier_with_three_runs_is_denied_with_nothing_remaining() {
        let (guard, _) = guard(prior_runs(MemoryStore::new(), 3));
        let admission = guard.admit(&user(), Timestamp::now()).await;
        assert!(!admission.decision.allowed);
        assert_eq!(admission.decision.remaining(), Some(0));
        assert_eq!(admission.reservation, None);
    }

    #[tokio::test]
    async fn third_free_run_is_admitted_with_a_slot() {
        let (guard, store) = guard(prior_runs(MemoryStore::new(), 2));
        let admission = guard.admit(&user(), Timestamp::now()).await;
        assert!(admission.decision.allowed);
        assert_eq!(admission.decision.remaining(), Some(1));
        assert!(admission.reservation.is_some());
        assert_eq!(store.outstanding_reservations(), 1);

        guard.hold(admission.reservation).release().await;
        assert_eq!(store.outstanding_reservations(), 0);
    }

    #[tokio::test]
    async fn dropped_hold_frees_its_slot() {
        let (guard, store) = guard(MemoryStore::new());
        let admission = guard.admit(&user(), Timestamp::now()).await;
        drop(guard.hold(admission.reservation));

        for _ in 0..10 {
            if store.outstanding_reservations() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.outstanding_reservations(), 0);
    }

    #[tokio::test]
    async fn recorded_hold_keeps_the_reservation_with_the_store() {
        let (guard, store) = guard(MemoryStore::new());
        let admission = guard.admit(&user(), Timestamp::now()).await;
        guard.hold(admission.reservation).recorded();

        tokio::task::yield_now().await;
        assert_eq!(store.outstanding_reservations(), 1);
    }

    #[tokio::test]
    async fn subscription_outranks_profile() {
        let (guard, _) = guard(
            MemoryStore::new()
                .with_profile_tier(user(), SubscriptionTier::Starter)
                .with_subscription(user(), SubscriptionTier::Pro),
        );
        assert_eq!(guard.resolve_tier(&user()).await, SubscriptionTier::Pro);
    }

    #[tokio::test]
    async fn profile_is_used_without_subscription() {
        let (guard, _) = guard(MemoryStore::new().with_profile_tier(user(), SubscriptionTier::Starter));
        assert_eq!(guard.resolve_tier(&user()).await, SubscriptionTier::Starter);
    }

    #[tokio::test]
    async fn unlimited_tier_skips_reservation() {
        let (guard, store) = guard(prior_runs(
            MemoryStore::new().with_subscription(user(), SubscriptionTier::Enterprise),
            50,
        ));
        let admission = guard.admit(&user(), Timestamp::now()).await;
        assert!(admission.decision.allowed);
        assert_eq!(admission.decision.remaining_or_sentinel(), -1);
        assert_eq!(admission.reservation, None);
        assert_eq!(store.outstanding_reservations(), 0);
    }

    #[tokio::test]
    async fn check_does_not_reserve() {
        let (guard, store) = guard(prior_runs(MemoryStore::new(), 1));
        let decision = guard.check(&user(), Timestamp::now()).await;
        assert_eq!(decision.used, 1);
        assert_eq!(decision.remaining(), Some(2));
        assert_eq!(store.outstanding_reservations(), 0);
    }

    #[tokio::test]
    async fn charge_deducts_at_least_one_credit() {
        let (guard, store) = guard(MemoryStore::new().with_credits(user(), 10));
        guard.charge(&user(), 0).await;
        assert_eq!(store.credit_balance(&user()), 9);
        guard.charge(&user(), 4).await;
        assert_eq!(store.credit_balance(&user()), 5);
    }
}
