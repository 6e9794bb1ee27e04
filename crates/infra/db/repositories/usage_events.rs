use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain;
use crate::infra::db::postgres::{
    postgres_connection::{PgPoolSquad, with_connection},
    schema::usage_events,
};
use domain::{
    entities::usage_events::UsageEventEntity, repositories::usage_events::UsageEventRepository,
    value_objects::enums::usage_counters::UsageCounter,
};

pub struct UsageEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UsageEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UsageEventRepository for UsageEventPostgres {
    async fn list_by_actor_since(
        &self,
        actor_id: Uuid,
        counter: UsageCounter,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageEventEntity>> {
        with_connection(&self.db_pool, move |conn| {
            let events = usage_events::table
                .filter(usage_events::actor_id.eq(actor_id))
                .filter(usage_events::counter_key.eq(counter.as_str()))
                .filter(usage_events::occurred_at.ge(since))
                .order(usage_events::occurred_at.asc())
                .select(UsageEventEntity::as_select())
                .load::<UsageEventEntity>(conn)?;

            Ok(events)
        })
        .await
    }
}
