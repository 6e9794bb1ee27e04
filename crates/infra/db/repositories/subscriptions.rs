use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    Connection, OptionalExtension, PgConnection, RunQueryDsl, insert_into, prelude::*,
    sql_types::Text, update,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::{PgPoolSquad, with_connection},
        schema::{subscriptions, usage_events},
    },
};
use domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity, SubscriptionRow},
    repositories::subscriptions::SubscriptionRepository,
    value_objects::{
        entitlements::UsageCounters,
        enums::subscription_statuses::SubscriptionStatus,
        subscriptions::{PlanChange, PlanChangeOutcome},
        usage::{ConsumeOutcome, ConsumeUsage},
    },
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn load_active_by_actor(
    conn: &mut PgConnection,
    actor_id: Uuid,
) -> Result<Option<SubscriptionEntity>> {
    subscriptions::table
        .filter(subscriptions::actor_id.eq(actor_id))
        .filter(subscriptions::is_active.eq(true))
        .select(SubscriptionRow::as_select())
        .first::<SubscriptionRow>(conn)
        .optional()?
        .map(SubscriptionEntity::try_from)
        .transpose()
}

/// Serializes every plan change of one actor, including the very first insert
/// where there is no row to lock yet. Released at transaction end.
fn lock_actor(conn: &mut PgConnection, actor_id: Uuid) -> Result<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind::<Text, _>(actor_id.to_string())
        .execute(conn)?;
    Ok(())
}

fn deactivate(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    status: SubscriptionStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    update(subscriptions::table)
        .filter(subscriptions::id.eq(subscription_id))
        .set((
            subscriptions::is_active.eq(false),
            subscriptions::status.eq(status.to_string()),
            subscriptions::end_date.eq(Some(now)),
            subscriptions::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_active_by_actor(&self, actor_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        with_connection(&self.db_pool, move |conn| load_active_by_actor(conn, actor_id)).await
    }

    async fn find_active_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let provider_subscription_id = provider_subscription_id.to_string();
        with_connection(&self.db_pool, move |conn| {
            subscriptions::table
                .filter(subscriptions::provider_subscription_id.eq(provider_subscription_id))
                .filter(subscriptions::is_active.eq(true))
                .select(SubscriptionRow::as_select())
                .first::<SubscriptionRow>(conn)
                .optional()?
                .map(SubscriptionEntity::try_from)
                .transpose()
        })
        .await
    }

    async fn expire_if_ended(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        with_connection(&self.db_pool, move |conn| {
            let updated = update(subscriptions::table)
                .filter(subscriptions::id.eq(subscription_id))
                .filter(subscriptions::is_active.eq(true))
                .filter(subscriptions::end_date.le(now))
                .set((
                    subscriptions::is_active.eq(false),
                    subscriptions::status.eq(SubscriptionStatus::Expired.to_string()),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(updated > 0)
        })
        .await
    }

    async fn reset_period_if_due(
        &self,
        subscription_id: Uuid,
        expected_reset_date: DateTime<Utc>,
        next_reset_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        with_connection(&self.db_pool, move |conn| {
            let updated = update(subscriptions::table)
                .filter(subscriptions::id.eq(subscription_id))
                .filter(subscriptions::is_active.eq(true))
                .filter(subscriptions::period_reset_date.eq(expected_reset_date))
                .filter(subscriptions::period_reset_date.le(now))
                .set((
                    subscriptions::period_usage.eq(json!({})),
                    subscriptions::period_reset_date.eq(next_reset_date),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(updated > 0)
        })
        .await
    }

    async fn insert_if_no_active(
        &self,
        subscription: InsertSubscriptionEntity,
    ) -> Result<SubscriptionEntity> {
        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let actor_id = subscription.actor_id;
                lock_actor(conn, actor_id)?;

                if let Some(existing) = load_active_by_actor(conn, actor_id)? {
                    return Ok(existing);
                }

                // The partial unique index on (actor_id) WHERE is_active still
                // backs writers that skip the advisory lock.
                insert_into(subscriptions::table)
                    .values(&subscription)
                    .on_conflict_do_nothing()
                    .execute(conn)?;

                load_active_by_actor(conn, actor_id)?.ok_or_else(|| {
                    anyhow!("no active subscription for actor {actor_id} after insert")
                })
            })
        })
        .await
    }

    async fn consume(&self, consume: ConsumeUsage) -> Result<ConsumeOutcome> {
        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let row = subscriptions::table
                    .filter(subscriptions::id.eq(consume.subscription_id))
                    .filter(subscriptions::is_active.eq(true))
                    .select(SubscriptionRow::as_select())
                    .for_update()
                    .first::<SubscriptionRow>(conn)
                    .optional()?;

                let Some(row) = row else {
                    return Ok(ConsumeOutcome::Inactive);
                };

                let mut usage: UsageCounters = serde_json::from_value(row.period_usage)?;
                let used = usage.used(consume.counter);
                let used_after = match used.checked_add(consume.amount) {
                    Some(total) if consume.limit.admits(used, consume.amount) => total,
                    _ => return Ok(ConsumeOutcome::LimitReached { used }),
                };
                usage.set(consume.counter, used_after);

                update(subscriptions::table)
                    .filter(subscriptions::id.eq(row.id))
                    .set((
                        subscriptions::period_usage.eq(serde_json::to_value(&usage)?),
                        subscriptions::updated_at.eq(consume.now),
                    ))
                    .execute(conn)?;

                if let Some(draft) = consume.event {
                    let event = draft.to_insert(
                        row.id,
                        consume.counter,
                        used,
                        consume.amount,
                        consume.now,
                    );
                    insert_into(usage_events::table)
                        .values(&event)
                        .execute(conn)?;
                }

                debug!(
                    subscription_id = %row.id,
                    counter = %consume.counter,
                    used_after,
                    "subscriptions: usage consumed"
                );

                Ok(ConsumeOutcome::Consumed { used: used_after })
            })
        })
        .await
    }

    async fn change_active_subscription(
        &self,
        actor_id: Uuid,
        change: PlanChange,
        now: DateTime<Utc>,
    ) -> Result<PlanChangeOutcome> {
        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                lock_actor(conn, actor_id)?;

                let history = subscriptions::table
                    .filter(subscriptions::actor_id.eq(actor_id))
                    .select(SubscriptionRow::as_select())
                    .for_update()
                    .load::<SubscriptionRow>(conn)?
                    .into_iter()
                    .map(SubscriptionEntity::try_from)
                    .collect::<Result<Vec<_>>>()?;
                let current = history.iter().find(|row| row.is_active).cloned();

                match change {
                    PlanChange::Activate {
                        subscription,
                        free_plan_id,
                    } => {
                        if subscription.is_superseded_by(&history, free_plan_id) {
                            debug!(
                                %actor_id,
                                plan_id = %subscription.plan_id,
                                start_date = %subscription.start_date,
                                "subscriptions: activation already applied or superseded"
                            );
                            return Ok(PlanChangeOutcome::Unchanged);
                        }

                        let replaced_subscription_id = match current {
                            Some(current) => {
                                deactivate(conn, current.id, SubscriptionStatus::Replaced, now)?;
                                Some(current.id)
                            }
                            None => None,
                        };

                        let subscription_id = insert_into(subscriptions::table)
                            .values(&subscription)
                            .returning(subscriptions::id)
                            .get_result::<Uuid>(conn)?;

                        Ok(PlanChangeOutcome::Activated {
                            subscription_id,
                            replaced_subscription_id,
                        })
                    }
                    PlanChange::Cancel { free_plan_id } => match current {
                        Some(current) if current.plan_id != free_plan_id => {
                            deactivate(conn, current.id, SubscriptionStatus::Canceled, now)?;
                            Ok(PlanChangeOutcome::Canceled {
                                subscription_id: current.id,
                            })
                        }
                        _ => Ok(PlanChangeOutcome::Unchanged),
                    },
                }
            })
        })
        .await
    }
}

/// Runs against a migrated database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::value_objects::{
            enums::usage_counters::UsageCounter,
            plans::{FREE_PLAN_ID, UsageLimit},
        },
        infra::db::postgres::postgres_connection::establish_connection,
    };
    use chrono::{Duration, DurationRound, Months};

    const BASIC_PLAN_ID: Uuid = Uuid::from_u128(1);
    const PRO_PLAN_ID: Uuid = Uuid::from_u128(2);

    fn repository() -> Arc<SubscriptionPostgres> {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let db_pool = establish_connection(&database_url, 5_000).unwrap();
        Arc::new(SubscriptionPostgres::new(Arc::new(db_pool)))
    }

    /// Whole seconds, so round-trips through `timestamptz` compare equal.
    fn now() -> DateTime<Utc> {
        Utc::now().duration_trunc(Duration::seconds(1)).unwrap()
    }

    async fn active_rows(repository: &SubscriptionPostgres, actor_id: Uuid) -> i64 {
        with_connection(&repository.db_pool, move |conn| {
            Ok(subscriptions::table
                .filter(subscriptions::actor_id.eq(actor_id))
                .filter(subscriptions::is_active.eq(true))
                .count()
                .get_result::<i64>(conn)?)
        })
        .await
        .unwrap()
    }

    fn activate(
        actor_id: Uuid,
        plan_id: Uuid,
        start_date: DateTime<Utc>,
        provider_subscription_id: Option<&str>,
    ) -> PlanChange {
        PlanChange::Activate {
            subscription: InsertSubscriptionEntity::activate(
                actor_id,
                plan_id,
                start_date,
                None,
                provider_subscription_id.map(str::to_string),
            )
            .unwrap(),
            free_plan_id: FREE_PLAN_ID,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a migrated Postgres at DATABASE_URL"]
    async fn concurrent_consumes_stop_at_the_cap() {
        let repository = repository();
        let actor_id = Uuid::new_v4();
        let subscription = repository
            .insert_if_no_active(
                InsertSubscriptionEntity::activate(actor_id, BASIC_PLAN_ID, now(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let repository = Arc::clone(&repository);
                tokio::spawn(async move {
                    repository
                        .consume(ConsumeUsage {
                            subscription_id: subscription.id,
                            counter: UsageCounter::Applications,
                            amount: 1,
                            limit: UsageLimit::Capped(10),
                            now: Utc::now(),
                            event: None,
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut consumed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ConsumeOutcome::Consumed { .. }) {
                consumed += 1;
            }
        }

        assert_eq!(consumed, 10);
        let row = repository.find_active_by_actor(actor_id).await.unwrap().unwrap();
        assert_eq!(row.period_usage.used(UsageCounter::Applications), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a migrated Postgres at DATABASE_URL"]
    async fn concurrent_resets_apply_once() {
        let repository = repository();
        let actor_id = Uuid::new_v4();
        let start = now() - Months::new(2);
        let subscription = repository
            .insert_if_no_active(
                InsertSubscriptionEntity::activate(actor_id, BASIC_PLAN_ID, start, None, None)
                    .unwrap(),
            )
            .await
            .unwrap();
        let expected = subscription.period_reset_date;
        let next = expected + Months::new(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repository = Arc::clone(&repository);
                tokio::spawn(async move {
                    repository
                        .reset_period_if_due(subscription.id, expected, next, now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        let row = repository.find_active_by_actor(actor_id).await.unwrap().unwrap();
        assert_eq!(row.period_reset_date, next);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a migrated Postgres at DATABASE_URL"]
    async fn concurrent_plan_changes_keep_one_active_row() {
        let repository = repository();
        let actor_id = Uuid::new_v4();
        let start = now();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let repository = Arc::clone(&repository);
                let plan_id = if i % 2 == 0 { BASIC_PLAN_ID } else { PRO_PLAN_ID };
                tokio::spawn(async move {
                    repository
                        .change_active_subscription(
                            actor_id,
                            activate(actor_id, plan_id, start + Duration::minutes(i), None),
                            Utc::now(),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(active_rows(&repository, actor_id).await, 1);
        let active = repository.find_active_by_actor(actor_id).await.unwrap().unwrap();
        assert_eq!(active.plan_id, PRO_PLAN_ID);
        assert_eq!(active.start_date, start + Duration::minutes(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a migrated Postgres at DATABASE_URL"]
    async fn concurrent_inserts_leave_one_active_row() {
        let repository = repository();
        let actor_id = Uuid::new_v4();
        let start = now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let repository = Arc::clone(&repository);
                tokio::spawn(async move {
                    repository
                        .insert_if_no_active(
                            InsertSubscriptionEntity::activate(
                                actor_id,
                                FREE_PLAN_ID,
                                start,
                                None,
                                None,
                            )
                            .unwrap(),
                        )
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(active_rows(&repository, actor_id).await, 1);
    }

    #[tokio::test]
    #[ignore = "requires a migrated Postgres at DATABASE_URL"]
    async fn replayed_activation_after_cancel_is_unchanged() {
        let repository = repository();
        let actor_id = Uuid::new_v4();
        let start = now();

        repository
            .change_active_subscription(
                actor_id,
                activate(actor_id, PRO_PLAN_ID, start, Some("sub_1")),
                start,
            )
            .await
            .unwrap();
        let canceled = repository
            .change_active_subscription(
                actor_id,
                PlanChange::Cancel {
                    free_plan_id: FREE_PLAN_ID,
                },
                start,
            )
            .await
            .unwrap();
        let replay = repository
            .change_active_subscription(
                actor_id,
                activate(actor_id, PRO_PLAN_ID, start, Some("sub_1")),
                start,
            )
            .await
            .unwrap();

        assert!(matches!(canceled, PlanChangeOutcome::Canceled { .. }));
        assert_eq!(replay, PlanChangeOutcome::Unchanged);
        assert!(repository.find_active_by_actor(actor_id).await.unwrap().is_none());
    }
}
