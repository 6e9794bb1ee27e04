use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::{
    plans::PlanEntity,
    subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
};
use crate::domain::value_objects::entitlements::{
    EntitlementSnapshot, SubscriptionSource, UsageCounters,
};

/// Normalized view of an actor's subscription: a stored record or the FREE fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSubscription {
    Explicit {
        subscription: SubscriptionEntity,
        plan: PlanEntity,
    },
    Implicit {
        plan: PlanEntity,
    },
}

impl ResolvedSubscription {
    pub fn plan(&self) -> &PlanEntity {
        match self {
            ResolvedSubscription::Explicit { plan, .. } => plan,
            ResolvedSubscription::Implicit { plan } => plan,
        }
    }

    pub fn into_snapshot(self, actor_id: Uuid) -> EntitlementSnapshot {
        match self {
            ResolvedSubscription::Explicit { subscription, plan } => EntitlementSnapshot {
                actor_id,
                plan_id: plan.id,
                tier: plan.tier,
                source: SubscriptionSource::Explicit,
                subscription_id: Some(subscription.id),
                limits: plan.limits,
                features: plan.features,
                usage: subscription.period_usage,
                period_reset_date: Some(subscription.period_reset_date),
            },
            ResolvedSubscription::Implicit { plan } => EntitlementSnapshot {
                actor_id,
                plan_id: plan.id,
                tier: plan.tier,
                source: SubscriptionSource::Implicit,
                subscription_id: None,
                limits: plan.limits,
                features: plan.features,
                usage: UsageCounters::default(),
                period_reset_date: None,
            },
        }
    }
}

/// Write applied atomically to an actor's active subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanChange {
    /// Replace the active row with `subscription`, unless the actor's history
    /// already supersedes it.
    Activate {
        subscription: InsertSubscriptionEntity,
        free_plan_id: Uuid,
    },
    /// Deactivate the active row, unless it is already on `free_plan_id`.
    Cancel { free_plan_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanChangeOutcome {
    Activated {
        subscription_id: Uuid,
        replaced_subscription_id: Option<Uuid>,
    },
    Canceled {
        subscription_id: Uuid,
    },
    Unchanged,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    pub checkout_url: String,
}
