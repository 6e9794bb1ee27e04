use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::plans::PlanEntity;
use crate::domain::value_objects::enums::{
    audiences::Audience, plan_features::PlanFeature, plan_tiers::PlanTier,
    usage_counters::UsageCounter,
};

/// Fixed UUID representing the free plan.
pub const FREE_PLAN_ID: Uuid = Uuid::nil();

/// Raw limit value meaning "no cap".
pub const UNLIMITED: i64 = -1;

/// Cap on one counter for one period. Serialized as the raw integer (`-1` for unlimited).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum UsageLimit {
    Unlimited,
    Capped(i64),
}

impl From<i64> for UsageLimit {
    fn from(raw: i64) -> Self {
        if raw == UNLIMITED {
            UsageLimit::Unlimited
        } else {
            UsageLimit::Capped(raw.max(0))
        }
    }
}

impl From<UsageLimit> for i64 {
    fn from(limit: UsageLimit) -> Self {
        match limit {
            UsageLimit::Unlimited => UNLIMITED,
            UsageLimit::Capped(value) => value,
        }
    }
}

impl UsageLimit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, UsageLimit::Unlimited)
    }

    /// Whether `amount` more units fit on top of `used`.
    pub fn admits(&self, used: i64, amount: i64) -> bool {
        match self {
            UsageLimit::Unlimited => used.checked_add(amount).is_some(),
            UsageLimit::Capped(limit) => used
                .checked_add(amount)
                .is_some_and(|total| total <= *limit),
        }
    }

    pub fn remaining(&self, used: i64) -> Option<i64> {
        match self {
            UsageLimit::Unlimited => None,
            UsageLimit::Capped(limit) => Some((limit - used).max(0)),
        }
    }
}

/// Limit-key → integer mapping attached to a plan. Stored as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct PlanLimits(BTreeMap<String, i64>);

impl PlanLimits {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    /// A key the plan does not mention is treated as a zero cap.
    pub fn limit_for(&self, counter: UsageCounter) -> UsageLimit {
        self.0
            .get(counter.limit_key())
            .copied()
            .map(UsageLimit::from)
            .unwrap_or(UsageLimit::Capped(0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

/// Feature-key → flag mapping attached to a plan. Stored as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct PlanFeatures(BTreeMap<String, bool>);

impl PlanFeatures {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    pub fn enabled(&self, feature: PlanFeature) -> bool {
        self.0.get(feature.as_str()).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanDto {
    pub id: Uuid,
    pub tier: PlanTier,
    pub audience: Audience,
    pub name: String,
    pub price_minor: i32,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
}

impl From<PlanEntity> for PlanDto {
    fn from(value: PlanEntity) -> Self {
        Self {
            id: value.id,
            tier: value.tier,
            audience: value.audience,
            name: value.name,
            price_minor: value.price_minor,
            limits: value.limits,
            features: value.features,
        }
    }
}
