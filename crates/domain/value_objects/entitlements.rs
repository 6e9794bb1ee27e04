use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{
    enums::{plan_features::PlanFeature, plan_tiers::PlanTier, usage_counters::UsageCounter},
    plans::{PlanFeatures, PlanLimits, UsageLimit},
};

/// Counter-key → units consumed in the current period. Stored as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct UsageCounters(BTreeMap<String, i64>);

impl UsageCounters {
    pub fn used(&self, counter: UsageCounter) -> i64 {
        self.0.get(counter.as_str()).copied().unwrap_or(0)
    }

    pub fn set(&mut self, counter: UsageCounter, used: i64) {
        self.0.insert(counter.as_str().to_string(), used);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|used| *used == 0)
    }
}

/// Whether the actor's plan comes from a stored subscription or the FREE fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    Explicit,
    Implicit,
}

/// Immutable view of what an actor may do this period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementSnapshot {
    pub actor_id: Uuid,
    pub plan_id: Uuid,
    pub tier: PlanTier,
    pub source: SubscriptionSource,
    pub subscription_id: Option<Uuid>,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
    pub usage: UsageCounters,
    pub period_reset_date: Option<DateTime<Utc>>,
}

impl EntitlementSnapshot {
    pub fn limit(&self, counter: UsageCounter) -> UsageLimit {
        self.limits.limit_for(counter)
    }

    pub fn used(&self, counter: UsageCounter) -> i64 {
        self.usage.used(counter)
    }

    pub fn has_feature(&self, feature: PlanFeature) -> bool {
        self.features.enabled(feature)
    }

    pub fn progress(&self, counter: UsageCounter) -> UsageProgress {
        let used = self.used(counter);
        let limit = self.limit(counter);
        let percent = match limit {
            UsageLimit::Unlimited => None,
            UsageLimit::Capped(0) => Some(100),
            UsageLimit::Capped(cap) => Some(((used.min(cap) * 100) / cap) as u8),
        };

        UsageProgress {
            counter,
            used,
            limit,
            remaining: limit.remaining(used),
            percent,
        }
    }

    pub fn progress_all(&self) -> Vec<UsageProgress> {
        UsageCounter::ALL
            .into_iter()
            .map(|counter| self.progress(counter))
            .collect()
    }
}

/// Usage of one counter as shown next to an upgrade prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageProgress {
    pub counter: UsageCounter,
    pub used: i64,
    pub limit: UsageLimit,
    pub remaining: Option<i64>,
    pub percent: Option<u8>,
}

/// Outcome of a check-and-consume. A denial is a normal value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumeResult {
    pub allowed: bool,
    pub counter: UsageCounter,
    pub used: i64,
    pub limit: UsageLimit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::plans::FREE_PLAN_ID;

    fn snapshot(limits: PlanLimits, usage: UsageCounters) -> EntitlementSnapshot {
        EntitlementSnapshot {
            actor_id: Uuid::new_v4(),
            plan_id: FREE_PLAN_ID,
            tier: PlanTier::Free,
            source: SubscriptionSource::Implicit,
            subscription_id: None,
            limits,
            features: PlanFeatures::default(),
            usage,
            period_reset_date: None,
        }
    }

    #[test]
    fn progress_reports_remaining_and_percent() {
        let mut usage = UsageCounters::default();
        usage.set(UsageCounter::Applications, 9);
        let snapshot = snapshot(
            PlanLimits::from_pairs([("application_limit", 10), ("skill_limit", -1)]),
            usage,
        );

        let applications = snapshot.progress(UsageCounter::Applications);
        assert_eq!(applications.remaining, Some(1));
        assert_eq!(applications.percent, Some(90));

        let skills = snapshot.progress(UsageCounter::Skills);
        assert_eq!(skills.remaining, None);
        assert_eq!(skills.percent, None);

        let ai = snapshot.progress(UsageCounter::AiMatches);
        assert_eq!(ai.limit, UsageLimit::Capped(0));
        assert_eq!(ai.percent, Some(100));
    }

    #[test]
    fn empty_counters_report_zero() {
        let usage = UsageCounters::default();
        assert!(usage.is_empty());
        assert_eq!(usage.used(UsageCounter::CvUploads), 0);
    }
}
