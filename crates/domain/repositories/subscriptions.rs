use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity};
use crate::domain::value_objects::{
    subscriptions::{PlanChange, PlanChangeOutcome},
    usage::{ConsumeOutcome, ConsumeUsage},
};

/// Persistent store of subscriptions. Every mutating method is a single
/// atomic operation scoped to one actor's row.
#[async_trait]
#[automock]
pub trait SubscriptionRepository {
    async fn find_active_by_actor(&self, actor_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_active_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Deactivates the row as expired if it is still active and its end date has passed.
    async fn expire_if_ended(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Clears usage and moves the reset date to `next_reset_date`, only if the
    /// stored reset date still equals `expected_reset_date` and is not after `now`.
    async fn reset_period_if_due(
        &self,
        subscription_id: Uuid,
        expected_reset_date: DateTime<Utc>,
        next_reset_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Inserts `subscription` unless the actor already has an active row; returns the active row.
    async fn insert_if_no_active(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<SubscriptionEntity>;

    async fn consume(&self, consume: ConsumeUsage) -> Result<ConsumeOutcome>;

    async fn change_active_subscription(
        &self,
        actor_id: Uuid,
        change: PlanChange,
        now: DateTime<Utc>,
    ) -> Result<PlanChangeOutcome>;
}
