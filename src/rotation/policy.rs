// Keyward — Rotation policy
//
// Tier assignment by name glob and per-tier cadence. Loaded once at startup
// and immutable for the life of the process.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::PatternList;
use crate::store::SecurityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub cadence_days: u32,
    pub notice_days: u32,
    pub approval_required: bool,
}

impl TierPolicy {
    pub fn defaults_for(tier: SecurityTier) -> Self {
        match tier {
            SecurityTier::High => Self {
                cadence_days: 30,
                notice_days: 7,
                approval_required: true,
            },
            SecurityTier::Standard => Self {
                cadence_days: 90,
                notice_days: 14,
                approval_required: false,
            },
            SecurityTier::Low => Self {
                cadence_days: 180,
                notice_days: 30,
                approval_required: false,
            },
        }
    }
}

/// Where a credential stands relative to its cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    NotDue,
    /// Inside the notice window.
    Upcoming { due_at: DateTime<Utc> },
    Due { due_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct TierAssignment {
    pattern: PatternList,
    pub tier: SecurityTier,
}

impl TierAssignment {
    pub fn new(pattern: PatternList, tier: SecurityTier) -> Self {
        Self { pattern, tier }
    }
}

#[derive(Debug, Clone)]
pub struct RotationPolicy {
    tiers: HashMap<SecurityTier, TierPolicy>,
    assignments: Vec<TierAssignment>,
    default_tier: SecurityTier,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(HashMap::new(), Vec::new(), SecurityTier::Standard)
    }
}

impl RotationPolicy {
    /// Tiers missing from `tiers` fall back to [`TierPolicy::defaults_for`].
    pub fn new(
        tiers: HashMap<SecurityTier, TierPolicy>,
        assignments: Vec<TierAssignment>,
        default_tier: SecurityTier,
    ) -> Self {
        let mut tiers = tiers;
        for tier in [SecurityTier::High, SecurityTier::Standard, SecurityTier::Low] {
            tiers.entry(tier).or_insert_with(|| TierPolicy::defaults_for(tier));
        }
        Self {
            tiers,
            assignments,
            default_tier,
        }
    }

    /// First matching assignment wins.
    pub fn tier_for(&self, name: &str) -> SecurityTier {
        self.assignments
            .iter()
            .find(|a| a.pattern.matches(name))
            .map(|a| a.tier)
            .unwrap_or(self.default_tier)
    }

    pub fn tier_policy(&self, tier: SecurityTier) -> TierPolicy {
        self.tiers
            .get(&tier)
            .copied()
            .unwrap_or_else(|| TierPolicy::defaults_for(tier))
    }

    pub fn due_at(&self, tier: SecurityTier, baseline: DateTime<Utc>) -> DateTime<Utc> {
        baseline + Duration::days(i64::from(self.tier_policy(tier).cadence_days))
    }

    /// `baseline` is the last rotation, or first sighting for a credential
    /// that was never rotated.
    pub fn evaluate(&self, tier: SecurityTier, baseline: DateTime<Utc>, now: DateTime<Utc>) -> PolicyVerdict {
        let policy = self.tier_policy(tier);
        let due_at = self.due_at(tier, baseline);

        if now >= due_at {
            PolicyVerdict::Due { due_at }
        } else if now >= due_at - Duration::days(i64::from(policy.notice_days)) {
            PolicyVerdict::Upcoming { due_at }
        } else {
            PolicyVerdict::NotDue
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
