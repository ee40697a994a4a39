//! Monthly execution quota policy.
//!
//! The policy half of the quota guard: tiers, the tier → limit table, and the
//! admission decision. Reading counts and reserving slots is done through
//! [`crate::ExecutionStore`] by the orchestration layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tiers and limits
// ---------------------------------------------------------------------------

/// A subscription tier, lowest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// No paid subscription.
    #[default]
    Free,
    /// Entry paid tier.
    Starter,
    /// Professional tier.
    Pro,
    /// Negotiated enterprise contract.
    Enterprise,
}

impl SubscriptionTier {
    /// Parses a tier name as stored by the billing system, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        let tier = match name.trim().to_ascii_lowercase().as_str() {
            "free" | "trial" => Self::Free,
            "starter" | "basic" => Self::Starter,
            "pro" | "professional" => Self::Pro,
            "enterprise" | "business" => Self::Enterprise,
            _ => return None,
        };
        Some(tier)
    }

    /// Returns the lowercase tier name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monthly execution allowance. Serialised as an integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ExecutionLimit {
    /// At most this many executions per calendar month.
    Limited(u32),
    /// No monthly cap.
    Unlimited,
}

impl TryFrom<i64> for ExecutionLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unlimited),
            n => u32::try_from(n)
                .map(Self::Limited)
                .map_err(|_| format!("execution limit must be -1 or a non-negative integer, got {n}")),
        }
    }
}

impl From<ExecutionLimit> for i64 {
    fn from(limit: ExecutionLimit) -> Self {
        match limit {
            ExecutionLimit::Limited(n) => i64::from(n),
            ExecutionLimit::Unlimited => -1,
        }
    }
}

/// Tier → monthly limit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Limit per tier. Tiers missing from the table fall back to the lowest tier's limit.
    pub limits: BTreeMap<SubscriptionTier, ExecutionLimit>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            limits: BTreeMap::from([
                (SubscriptionTier::Free, ExecutionLimit::Limited(3)),
                (SubscriptionTier::Starter, ExecutionLimit::Limited(25)),
                (SubscriptionTier::Pro, ExecutionLimit::Limited(100)),
                (SubscriptionTier::Enterprise, ExecutionLimit::Unlimited),
            ]),
        }
    }
}

impl QuotaPolicy {
    /// Returns the monthly limit for `tier`.
    pub fn limit_for(&self, tier: SubscriptionTier) -> ExecutionLimit {
        self.limits
            .get(&tier)
            .or_else(|| self.limits.get(&SubscriptionTier::Free))
            .copied()
            .unwrap_or(ExecutionLimit::Limited(0))
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Result of a quota check for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    /// Tier the limit was resolved from.
    pub tier: SubscriptionTier,
    /// Monthly limit in force.
    pub limit: ExecutionLimit,
    /// Executions already counted in the current window.
    pub used: u32,
    /// Whether another execution may start.
    pub allowed: bool,
}

impl QuotaDecision {
    /// Decides admission: allowed iff the tier is unlimited or `used < limit`.
    pub fn evaluate(tier: SubscriptionTier, limit: ExecutionLimit, used: u32) -> Self {
        let allowed = match limit {
            ExecutionLimit::Unlimited => true,
            ExecutionLimit::Limited(max) => used < max,
        };
        Self {
            tier,
            limit,
            used,
            allowed,
        }
    }

    /// Executions left in the window, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        match self.limit {
            ExecutionLimit::Unlimited => None,
            ExecutionLimit::Limited(max) => Some(max.saturating_sub(self.used)),
        }
    }

    /// Executions left using the wire convention where `-1` means unlimited.
    pub fn remaining_or_sentinel(&self) -> i64 {
        self.remaining().map_or(-1, i64::from)
    }
}
