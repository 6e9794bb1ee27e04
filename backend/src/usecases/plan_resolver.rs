use anyhow::anyhow;
use chrono::{DateTime, Utc};
use entitlements::domain::{
    entities::{plans::PlanEntity, subscriptions::SubscriptionEntity},
    repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
    value_objects::{
        billing_periods, entitlements::UsageCounters, subscriptions::ResolvedSubscription,
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Reads of the active row that may be redone after losing a conditional update.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("plan {0} not found")]
    PlanNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Resolves the effective subscription for an actor: the active stored row or the FREE fallback.
///
/// Expiry and period resets are applied lazily here, each as one conditional
/// store update, so concurrent readers never double-apply them.
pub struct PlanResolver<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    free_plan_id: Uuid,
}

impl<P, S> PlanResolver<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(plan_repo: Arc<P>, subscription_repo: Arc<S>, free_plan_id: Uuid) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            free_plan_id,
        }
    }

    pub fn free_plan_id(&self) -> Uuid {
        self.free_plan_id
    }

    pub async fn resolve(
        &self,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSubscription, ResolveError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let Some(subscription) = self.subscription_repo.find_active_by_actor(actor_id).await?
            else {
                debug!(%actor_id, "plan_resolver: no active subscription, using free plan");
                return self.implicit_free().await;
            };

            if subscription.has_ended(now) {
                let expired = self
                    .subscription_repo
                    .expire_if_ended(subscription.id, now)
                    .await?;
                if expired {
                    info!(
                        %actor_id,
                        subscription_id = %subscription.id,
                        "plan_resolver: subscription expired"
                    );
                }
                continue;
            }

            let subscription = if subscription.reset_due(now) {
                match self.reset_period(subscription, now).await? {
                    Some(subscription) => subscription,
                    // Another request changed the row first; read it again.
                    None => continue,
                }
            } else {
                subscription
            };

            let plan = self.plan_by_id(subscription.plan_id).await?;
            debug!(
                %actor_id,
                plan_id = %plan.id,
                "plan_resolver: using active subscription plan"
            );
            return Ok(ResolvedSubscription::Explicit { subscription, plan });
        }

        Err(ResolveError::Store(anyhow!(
            "subscription for actor {actor_id} kept changing during resolution"
        )))
    }

    /// The FREE plan with nothing stored for the actor.
    pub async fn implicit_free(&self) -> Result<ResolvedSubscription, ResolveError> {
        let plan = self.plan_by_id(self.free_plan_id).await?;
        Ok(ResolvedSubscription::Implicit { plan })
    }

    /// Active plan that can be purchased or switched to.
    pub async fn active_plan(&self, plan_id: Uuid) -> Result<PlanEntity, ResolveError> {
        self.plan_repo
            .find_active_plan_by_id(plan_id)
            .await?
            .ok_or(ResolveError::PlanNotFound(plan_id))
    }

    async fn plan_by_id(&self, plan_id: Uuid) -> Result<PlanEntity, ResolveError> {
        self.plan_repo
            .find_by_id(plan_id)
            .await?
            .ok_or(ResolveError::PlanNotFound(plan_id))
    }

    /// Returns the row as it is after the reset, or `None` when the conditional update lost.
    async fn reset_period(
        &self,
        mut subscription: SubscriptionEntity,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionEntity>, ResolveError> {
        let next_reset_date = billing_periods::next_reset_date(subscription.start_date, now)
            .ok_or_else(|| anyhow!("failed to compute next period reset date"))?;

        let reset = self
            .subscription_repo
            .reset_period_if_due(
                subscription.id,
                subscription.period_reset_date,
                next_reset_date,
                now,
            )
            .await?;

        if !reset {
            return Ok(None);
        }

        info!(
            actor_id = %subscription.actor_id,
            subscription_id = %subscription.id,
            %next_reset_date,
            "plan_resolver: usage period reset"
        );
        subscription.period_usage = UsageCounters::default();
        subscription.period_reset_date = next_reset_date;
        subscription.updated_at = now;
        Ok(Some(subscription))
    }
}
