use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::usage_events::InsertUsageEventEntity;
use crate::domain::value_objects::{
    enums::usage_counters::UsageCounter, plans::UsageLimit, usage_pricing::MeteredPricing,
};

/// Conditional increment of one counter on one subscription row.
///
/// The store applies it as a single atomic step: the row must still be active
/// and `used + amount` must fit `limit`, otherwise nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeUsage {
    pub subscription_id: Uuid,
    pub counter: UsageCounter,
    pub amount: i64,
    pub limit: UsageLimit,
    pub now: DateTime<Utc>,
    /// When set, a usage event is written in the same atomic step.
    pub event: Option<UsageEventDraft>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageEventDraft {
    pub actor_id: Uuid,
    pub pricing: MeteredPricing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed { used: i64 },
    LimitReached { used: i64 },
    /// The row stopped being active between resolution and the write.
    Inactive,
}

impl UsageEventDraft {
    /// Builds the event row for `amount` units consumed on top of `used_before`.
    pub fn to_insert(
        &self,
        subscription_id: Uuid,
        counter: UsageCounter,
        used_before: i64,
        amount: i64,
        occurred_at: DateTime<Utc>,
    ) -> InsertUsageEventEntity {
        let charge = self.pricing.charge(used_before, amount);
        InsertUsageEventEntity {
            actor_id: self.actor_id,
            subscription_id,
            counter_key: counter.as_str().to_string(),
            amount,
            occurred_at,
            cost_estimate_minor: charge.cost_minor,
            was_free: charge.was_free,
        }
    }
}
