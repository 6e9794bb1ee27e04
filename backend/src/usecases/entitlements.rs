use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use entitlements::domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
    value_objects::{
        entitlements::{ConsumeResult, EntitlementSnapshot},
        enums::{plan_features::PlanFeature, usage_counters::UsageCounter},
        subscriptions::{PlanChange, PlanChangeOutcome, ResolvedSubscription},
        usage::{ConsumeOutcome, ConsumeUsage, UsageEventDraft},
        usage_pricing::MeteredPricing,
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    clock::Clock,
    plan_resolver::{PlanResolver, ResolveError},
};

/// Passes through resolution and the conditional write before giving up.
/// A second pass only happens when a plan change deactivated the row in between.
const MAX_CONSUME_ATTEMPTS: usize = 2;

/// Largest amount a single consume call may request.
pub const MAX_CONSUME_AMOUNT: i64 = 1_000;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("plan {0} not found")]
    PlanNotFound(Uuid),
    #[error("amount must be between 1 and {}", MAX_CONSUME_AMOUNT)]
    InvalidAmount,
    #[error("unknown counter: {0}")]
    UnknownCounter(String),
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("temporarily unavailable, please try again")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl EntitlementError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EntitlementError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            EntitlementError::PlanNotFound(_) => StatusCode::NOT_FOUND,
            EntitlementError::InvalidAmount
            | EntitlementError::UnknownCounter(_)
            | EntitlementError::UnknownFeature(_) => StatusCode::BAD_REQUEST,
            EntitlementError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ResolveError> for EntitlementError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::PlanNotFound(plan_id) => EntitlementError::PlanNotFound(plan_id),
            ResolveError::Store(err) => EntitlementError::StoreUnavailable(err),
        }
    }
}

pub type EntitlementResult<T> = std::result::Result<T, EntitlementError>;

#[derive(Debug, Clone)]
pub struct EntitlementSettings {
    pub free_plan_id: Uuid,
    /// Counters whose consumption is priced and recorded as usage events.
    pub metered: HashMap<UsageCounter, MeteredPricing>,
}

/// Decides whether an actor may perform a counted action and records it.
pub struct EntitlementEngine<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    resolver: PlanResolver<P, S>,
    subscription_repo: Arc<S>,
    settings: EntitlementSettings,
    clock: Arc<dyn Clock>,
}

impl<P, S> EntitlementEngine<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(
        plan_repo: Arc<P>,
        subscription_repo: Arc<S>,
        settings: EntitlementSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver: PlanResolver::new(
                plan_repo,
                Arc::clone(&subscription_repo),
                settings.free_plan_id,
            ),
            subscription_repo,
            settings,
            clock,
        }
    }

    pub fn free_plan_id(&self) -> Uuid {
        self.settings.free_plan_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc_now()
    }

    pub async fn resolve_entitlement(&self, actor_id: Uuid) -> EntitlementResult<EntitlementSnapshot> {
        ensure_authenticated(actor_id)?;

        let resolved = self.resolve(actor_id, self.clock.utc_now()).await?;
        Ok(resolved.into_snapshot(actor_id))
    }

    pub async fn has_feature(&self, actor_id: Uuid, feature: PlanFeature) -> EntitlementResult<bool> {
        let snapshot = self.resolve_entitlement(actor_id).await?;
        Ok(snapshot.has_feature(feature))
    }

    pub async fn check_and_consume(
        &self,
        actor_id: Uuid,
        counter: UsageCounter,
        amount: i64,
    ) -> EntitlementResult<ConsumeResult> {
        ensure_authenticated(actor_id)?;
        if !(1..=MAX_CONSUME_AMOUNT).contains(&amount) {
            return Err(EntitlementError::InvalidAmount);
        }

        let event = self
            .settings
            .metered
            .get(&counter)
            .map(|pricing| UsageEventDraft {
                actor_id,
                pricing: *pricing,
            });

        for attempt in 1..=MAX_CONSUME_ATTEMPTS {
            let now = self.clock.utc_now();
            let resolved = self.resolve(actor_id, now).await?;
            let limit = resolved.plan().limits.limit_for(counter);

            let subscription_id = match resolved {
                ResolvedSubscription::Explicit { subscription, .. } => subscription.id,
                ResolvedSubscription::Implicit { plan } => {
                    if !limit.admits(0, amount) {
                        debug!(
                            %actor_id,
                            counter = %counter,
                            amount,
                            "entitlements: free plan limit reached without stored usage"
                        );
                        return Ok(ConsumeResult {
                            allowed: false,
                            counter,
                            used: 0,
                            limit,
                        });
                    }

                    let subscription = self.materialize(actor_id, plan.id, now).await?;
                    if subscription.plan_id != plan.id {
                        // A paid plan became active concurrently; resolve against it.
                        continue;
                    }
                    subscription.id
                }
            };

            let outcome = self
                .subscription_repo
                .consume(ConsumeUsage {
                    subscription_id,
                    counter,
                    amount,
                    limit,
                    now,
                    event,
                })
                .await
                .map_err(|err| {
                    error!(
                        %actor_id,
                        counter = %counter,
                        db_error = ?err,
                        "entitlements: failed to consume usage"
                    );
                    EntitlementError::StoreUnavailable(err)
                })?;

            match outcome {
                ConsumeOutcome::Consumed { used } => {
                    debug!(%actor_id, counter = %counter, amount, used, "entitlements: usage consumed");
                    return Ok(ConsumeResult {
                        allowed: true,
                        counter,
                        used,
                        limit,
                    });
                }
                ConsumeOutcome::LimitReached { used } => {
                    info!(%actor_id, counter = %counter, amount, used, "entitlements: limit reached");
                    return Ok(ConsumeResult {
                        allowed: false,
                        counter,
                        used,
                        limit,
                    });
                }
                ConsumeOutcome::Inactive => {
                    warn!(
                        %actor_id,
                        %subscription_id,
                        attempt,
                        "entitlements: subscription changed during consume, resolving again"
                    );
                }
            }
        }

        error!(%actor_id, counter = %counter, "entitlements: consume did not settle");
        Err(EntitlementError::StoreUnavailable(anyhow!(
            "subscription for actor {actor_id} changed on every consume attempt"
        )))
    }

    /// Switches the actor to `new_plan_id` from a confirmed payment event.
    /// Switching to the FREE plan cancels the active subscription.
    pub async fn change_plan(
        &self,
        actor_id: Uuid,
        new_plan_id: Uuid,
        effective_period_start: DateTime<Utc>,
        provider_subscription_id: Option<String>,
    ) -> EntitlementResult<PlanChangeOutcome> {
        ensure_authenticated(actor_id)?;

        let change = if new_plan_id == self.settings.free_plan_id {
            PlanChange::Cancel {
                free_plan_id: self.settings.free_plan_id,
            }
        } else {
            let plan = self.resolver.active_plan(new_plan_id).await.map_err(|err| {
                if let ResolveError::Store(err) = &err {
                    error!(%actor_id, plan_id = %new_plan_id, db_error = ?err, "entitlements: failed to load plan");
                }
                EntitlementError::from(err)
            })?;

            let subscription = InsertSubscriptionEntity::activate(
                actor_id,
                plan.id,
                effective_period_start,
                None,
                provider_subscription_id,
            )
            .map_err(EntitlementError::StoreUnavailable)?;
            PlanChange::Activate {
                subscription,
                free_plan_id: self.settings.free_plan_id,
            }
        };

        let outcome = self
            .subscription_repo
            .change_active_subscription(actor_id, change, self.clock.utc_now())
            .await
            .map_err(|err| {
                error!(
                    %actor_id,
                    plan_id = %new_plan_id,
                    db_error = ?err,
                    "entitlements: failed to change plan"
                );
                EntitlementError::StoreUnavailable(err)
            })?;

        info!(
            %actor_id,
            plan_id = %new_plan_id,
            %effective_period_start,
            outcome = ?outcome,
            "entitlements: plan change applied"
        );
        Ok(outcome)
    }

    async fn resolve(
        &self,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> EntitlementResult<ResolvedSubscription> {
        self.resolver.resolve(actor_id, now).await.map_err(|err| {
            match &err {
                ResolveError::PlanNotFound(plan_id) => {
                    error!(%actor_id, %plan_id, "entitlements: plan referenced by actor is missing");
                }
                ResolveError::Store(err) => {
                    error!(%actor_id, db_error = ?err, "entitlements: failed to resolve subscription");
                }
            }
            EntitlementError::from(err)
        })
    }

    async fn materialize(
        &self,
        actor_id: Uuid,
        free_plan_id: Uuid,
        now: DateTime<Utc>,
    ) -> EntitlementResult<SubscriptionEntity> {
        let subscription = InsertSubscriptionEntity::activate(actor_id, free_plan_id, now, None, None)
            .map_err(EntitlementError::StoreUnavailable)?;

        self.subscription_repo
            .insert_if_no_active(subscription)
            .await
            .map_err(|err| {
                error!(%actor_id, db_error = ?err, "entitlements: failed to materialize free subscription");
                EntitlementError::StoreUnavailable(err)
            })
    }
}

fn ensure_authenticated(actor_id: Uuid) -> EntitlementResult<()> {
    if actor_id.is_nil() {
        return Err(EntitlementError::NotAuthenticated);
    }
    Ok(())
}
