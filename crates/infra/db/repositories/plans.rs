use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain;
use crate::infra::db::postgres::{
    postgres_connection::{PgPoolSquad, with_connection},
    schema::plans,
};
use domain::{
    entities::plans::{PlanEntity, PlanRow},
    repositories::plans::PlanRepository,
};

pub struct PlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepository for PlanPostgres {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        with_connection(&self.db_pool, move |conn| {
            plans::table
                .filter(plans::id.eq(plan_id))
                .select(PlanRow::as_select())
                .first::<PlanRow>(conn)
                .optional()?
                .map(PlanEntity::try_from)
                .transpose()
        })
        .await
    }

    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        with_connection(&self.db_pool, move |conn| {
            plans::table
                .filter(plans::id.eq(plan_id))
                .filter(plans::is_active.eq(true))
                .select(PlanRow::as_select())
                .first::<PlanRow>(conn)
                .optional()?
                .map(PlanEntity::try_from)
                .transpose()
        })
        .await
    }

    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>> {
        with_connection(&self.db_pool, |conn| {
            let rows = plans::table
                .filter(plans::is_active.eq(true))
                .order(plans::price_minor.asc())
                .select(PlanRow::as_select())
                .load::<PlanRow>(conn)?;

            rows.into_iter().map(PlanEntity::try_from).collect()
        })
        .await
    }
}
