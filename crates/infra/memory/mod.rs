//! In-process store with the same atomicity guarantees as the Postgres
//! adapters: every trait method runs under one lock, so each call is a single
//! conditional step. Used by tests and local runs without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    entities::{
        plans::PlanEntity,
        subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        usage_events::UsageEventEntity,
    },
    repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository,
        usage_events::UsageEventRepository,
    },
    value_objects::{
        entitlements::UsageCounters,
        enums::{subscription_statuses::SubscriptionStatus, usage_counters::UsageCounter},
        subscriptions::{PlanChange, PlanChangeOutcome},
        usage::{ConsumeOutcome, ConsumeUsage},
    },
};

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, PlanEntity>,
    subscriptions: Vec<SubscriptionEntity>,
    usage_events: Vec<UsageEventEntity>,
}

impl State {
    fn active_by_actor_mut(&mut self, actor_id: Uuid) -> Option<&mut SubscriptionEntity> {
        self.subscriptions
            .iter_mut()
            .find(|subscription| subscription.actor_id == actor_id && subscription.is_active)
    }

    fn by_id_mut(&mut self, subscription_id: Uuid) -> Option<&mut SubscriptionEntity> {
        self.subscriptions
            .iter_mut()
            .find(|subscription| subscription.id == subscription_id)
    }

    fn insert(&mut self, subscription: InsertSubscriptionEntity) -> Result<SubscriptionEntity> {
        let now = Utc::now();
        let entity = SubscriptionEntity {
            id: Uuid::new_v4(),
            actor_id: subscription.actor_id,
            plan_id: subscription.plan_id,
            status: SubscriptionStatus::from_str(&subscription.status),
            is_active: subscription.is_active,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            period_usage: serde_json::from_value(subscription.period_usage)?,
            period_reset_date: subscription.period_reset_date,
            provider_subscription_id: subscription.provider_subscription_id,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.push(entity.clone());
        Ok(entity)
    }
}

fn deactivate(
    subscription: &mut SubscriptionEntity,
    status: SubscriptionStatus,
    now: DateTime<Utc>,
) {
    subscription.is_active = false;
    subscription.status = status;
    subscription.end_date = Some(now);
    subscription.updated_at = now;
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: impl IntoIterator<Item = PlanEntity>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.plans = plans.into_iter().map(|plan| (plan.id, plan)).collect();
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Every subscription row ever written for `actor_id`, oldest first.
    pub fn subscriptions_of(&self, actor_id: Uuid) -> Result<Vec<SubscriptionEntity>> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .filter(|subscription| subscription.actor_id == actor_id)
            .cloned()
            .collect())
    }

    pub fn usage_events_of(&self, actor_id: Uuid) -> Result<Vec<UsageEventEntity>> {
        Ok(self
            .lock()?
            .usage_events
            .iter()
            .filter(|event| event.actor_id == actor_id)
            .cloned()
            .collect())
    }

    /// Writes a subscription row directly, bypassing the active-row check.
    pub fn seed_subscription(&self, subscription: SubscriptionEntity) -> Result<()> {
        self.lock()?.subscriptions.push(subscription);
        Ok(())
    }
}

#[async_trait]
impl PlanRepository for InMemoryStore {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        Ok(self.lock()?.plans.get(&plan_id).cloned())
    }

    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        Ok(self
            .lock()?
            .plans
            .get(&plan_id)
            .filter(|plan| plan.is_active)
            .cloned())
    }

    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>> {
        let mut plans: Vec<PlanEntity> = self
            .lock()?
            .plans
            .values()
            .filter(|plan| plan.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|plan| plan.price_minor);
        Ok(plans)
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn find_active_by_actor(&self, actor_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        Ok(self.lock()?.active_by_actor_mut(actor_id).map(|s| s.clone()))
    }

    async fn find_active_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .find(|subscription| {
                subscription.is_active
                    && subscription.provider_subscription_id.as_deref()
                        == Some(provider_subscription_id)
            })
            .cloned())
    }

    async fn expire_if_ended(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        match state.by_id_mut(subscription_id) {
            Some(subscription) if subscription.is_active && subscription.has_ended(now) => {
                subscription.is_active = false;
                subscription.status = SubscriptionStatus::Expired;
                subscription.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_period_if_due(
        &self,
        subscription_id: Uuid,
        expected_reset_date: DateTime<Utc>,
        next_reset_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        match state.by_id_mut(subscription_id) {
            Some(subscription)
                if subscription.is_active
                    && subscription.period_reset_date == expected_reset_date
                    && subscription.period_reset_date <= now =>
            {
                subscription.period_usage = UsageCounters::default();
                subscription.period_reset_date = next_reset_date;
                subscription.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_if_no_active(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<SubscriptionEntity> {
        let mut state = self.lock()?;
        if let Some(existing) = state.active_by_actor_mut(subscription.actor_id) {
            return Ok(existing.clone());
        }
        state.insert(subscription)
    }

    async fn consume(&self, consume: ConsumeUsage) -> Result<ConsumeOutcome> {
        let mut state = self.lock()?;

        let Some(subscription) = state
            .by_id_mut(consume.subscription_id)
            .filter(|subscription| subscription.is_active)
        else {
            return Ok(ConsumeOutcome::Inactive);
        };

        let used = subscription.period_usage.used(consume.counter);
        let used_after = match used.checked_add(consume.amount) {
            Some(total) if consume.limit.admits(used, consume.amount) => total,
            _ => return Ok(ConsumeOutcome::LimitReached { used }),
        };

        subscription.period_usage.set(consume.counter, used_after);
        subscription.updated_at = consume.now;
        let subscription_id = subscription.id;

        if let Some(draft) = consume.event {
            let event = draft.to_insert(
                subscription_id,
                consume.counter,
                used,
                consume.amount,
                consume.now,
            );
            state.usage_events.push(UsageEventEntity {
                id: Uuid::new_v4(),
                actor_id: event.actor_id,
                subscription_id: event.subscription_id,
                counter_key: event.counter_key,
                amount: event.amount,
                occurred_at: event.occurred_at,
                cost_estimate_minor: event.cost_estimate_minor,
                was_free: event.was_free,
            });
        }

        Ok(ConsumeOutcome::Consumed { used: used_after })
    }

    async fn change_active_subscription(
        &self,
        actor_id: Uuid,
        change: PlanChange,
        now: DateTime<Utc>,
    ) -> Result<PlanChangeOutcome> {
        let mut state = self.lock()?;

        match change {
            PlanChange::Activate {
                subscription,
                free_plan_id,
            } => {
                let history = state
                    .subscriptions
                    .iter()
                    .filter(|row| row.actor_id == actor_id);
                if subscription.is_superseded_by(history, free_plan_id) {
                    return Ok(PlanChangeOutcome::Unchanged);
                }

                let replaced_subscription_id = match state.active_by_actor_mut(actor_id) {
                    Some(current) => {
                        deactivate(current, SubscriptionStatus::Replaced, now);
                        Some(current.id)
                    }
                    None => None,
                };

                let inserted = state.insert(subscription)?;
                Ok(PlanChangeOutcome::Activated {
                    subscription_id: inserted.id,
                    replaced_subscription_id,
                })
            }
            PlanChange::Cancel { free_plan_id } => match state.active_by_actor_mut(actor_id) {
                Some(current) if current.plan_id != free_plan_id => {
                    deactivate(current, SubscriptionStatus::Canceled, now);
                    Ok(PlanChangeOutcome::Canceled {
                        subscription_id: current.id,
                    })
                }
                _ => Ok(PlanChangeOutcome::Unchanged),
            },
        }
    }
}

#[async_trait]
impl UsageEventRepository for InMemoryStore {
    async fn list_by_actor_since(
        &self,
        actor_id: Uuid,
        counter: UsageCounter,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageEventEntity>> {
        Ok(self
            .lock()?
            .usage_events
            .iter()
            .filter(|event| {
                event.actor_id == actor_id
                    && event.counter_key == counter.as_str()
                    && event.occurred_at >= since
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{
        enums::{audiences::Audience, plan_tiers::PlanTier},
        plans::{FREE_PLAN_ID, PlanFeatures, PlanLimits, UsageLimit},
        usage::UsageEventDraft,
        usage_pricing::MeteredPricing,
    };
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn plan(id: Uuid, tier: PlanTier) -> PlanEntity {
        PlanEntity {
            id,
            tier,
            audience: Audience::Talent,
            name: tier.to_string(),
            price_minor: 0,
            limits: PlanLimits::default(),
            features: PlanFeatures::default(),
            is_active: true,
            stripe_price_id: None,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn concurrent_inserts_leave_one_active_row() {
        let store = Arc::new(InMemoryStore::with_plans([plan(FREE_PLAN_ID, PlanTier::Free)]));
        let actor_id = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let insert = InsertSubscriptionEntity::activate(
                        actor_id,
                        FREE_PLAN_ID,
                        start(),
                        None,
                        None,
                    )
                    .unwrap();
                    store.insert_if_no_active(insert).await.unwrap().id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(store.subscriptions_of(actor_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn consume_writes_event_with_charge() {
        let store = InMemoryStore::new();
        let actor_id = Uuid::new_v4();
        let insert =
            InsertSubscriptionEntity::activate(actor_id, FREE_PLAN_ID, start(), None, None)
                .unwrap();
        let subscription = store.insert_if_no_active(insert).await.unwrap();
        let draft = UsageEventDraft {
            actor_id,
            pricing: MeteredPricing {
                free_per_period: 1,
                unit_price_minor: 75,
            },
        };

        for _ in 0..2 {
            let outcome = store
                .consume(ConsumeUsage {
                    subscription_id: subscription.id,
                    counter: UsageCounter::AiMatches,
                    amount: 1,
                    limit: UsageLimit::Unlimited,
                    now: start(),
                    event: Some(draft),
                })
                .await
                .unwrap();
            assert!(matches!(outcome, ConsumeOutcome::Consumed { .. }));
        }

        let events = store.usage_events_of(actor_id).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].was_free);
        assert_eq!(events[0].cost_estimate_minor, 0);
        assert!(!events[1].was_free);
        assert_eq!(events[1].cost_estimate_minor, 75);
    }

    #[tokio::test]
    async fn reset_only_applies_to_the_expected_date() {
        let store = InMemoryStore::new();
        let actor_id = Uuid::new_v4();
        let insert =
            InsertSubscriptionEntity::activate(actor_id, FREE_PLAN_ID, start(), None, None)
                .unwrap();
        let subscription = store.insert_if_no_active(insert).await.unwrap();
        let now = subscription.period_reset_date + Duration::hours(1);
        let next = subscription.period_reset_date + Duration::days(30);

        let first = store
            .reset_period_if_due(subscription.id, subscription.period_reset_date, next, now)
            .await
            .unwrap();
        let second = store
            .reset_period_if_due(subscription.id, subscription.period_reset_date, next, now)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn cancel_keeps_free_rows_and_is_idempotent() {
        let paid_plan_id = Uuid::new_v4();
        let store = InMemoryStore::new();
        let actor_id = Uuid::new_v4();
        let insert =
            InsertSubscriptionEntity::activate(actor_id, paid_plan_id, start(), None, None)
                .unwrap();

        store
            .change_active_subscription(
                actor_id,
                PlanChange::Activate {
                    subscription: insert,
                    free_plan_id: FREE_PLAN_ID,
                },
                start(),
            )
            .await
            .unwrap();

        let cancel = PlanChange::Cancel {
            free_plan_id: FREE_PLAN_ID,
        };
        let first = store
            .change_active_subscription(actor_id, cancel.clone(), start())
            .await
            .unwrap();
        let second = store
            .change_active_subscription(actor_id, cancel, start())
            .await
            .unwrap();

        assert!(matches!(first, PlanChangeOutcome::Canceled { .. }));
        assert_eq!(second, PlanChangeOutcome::Unchanged);
        assert!(store.find_active_by_actor(actor_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replayed_activation_after_cancel_is_unchanged() {
        let paid_plan_id = Uuid::new_v4();
        let store = InMemoryStore::new();
        let actor_id = Uuid::new_v4();
        let activate = || PlanChange::Activate {
            subscription: InsertSubscriptionEntity::activate(
                actor_id,
                paid_plan_id,
                start(),
                None,
                Some("sub_1".to_string()),
            )
            .unwrap(),
            free_plan_id: FREE_PLAN_ID,
        };

        store
            .change_active_subscription(actor_id, activate(), start())
            .await
            .unwrap();
        store
            .change_active_subscription(
                actor_id,
                PlanChange::Cancel {
                    free_plan_id: FREE_PLAN_ID,
                },
                start() + Duration::days(3),
            )
            .await
            .unwrap();
        let replay = store
            .change_active_subscription(actor_id, activate(), start() + Duration::days(4))
            .await
            .unwrap();

        assert_eq!(replay, PlanChangeOutcome::Unchanged);
        assert!(store.find_active_by_actor(actor_id).await.unwrap().is_none());
        assert_eq!(store.subscriptions_of(actor_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unlimited_counter_refuses_to_overflow() {
        let store = InMemoryStore::new();
        let actor_id = Uuid::new_v4();
        let insert =
            InsertSubscriptionEntity::activate(actor_id, FREE_PLAN_ID, start(), None, None)
                .unwrap();
        let subscription = store.insert_if_no_active(insert).await.unwrap();
        let consume = |amount| ConsumeUsage {
            subscription_id: subscription.id,
            counter: UsageCounter::Skills,
            amount,
            limit: UsageLimit::Unlimited,
            now: start(),
            event: None,
        };

        let filled = store.consume(consume(i64::MAX)).await.unwrap();
        let overflow = store.consume(consume(1)).await.unwrap();

        assert_eq!(filled, ConsumeOutcome::Consumed { used: i64::MAX });
        assert_eq!(overflow, ConsumeOutcome::LimitReached { used: i64::MAX });
        assert!(store.find_active_by_actor(Uuid::new_v4()).await.is_ok());
    }
}
