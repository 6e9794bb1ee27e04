use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::usage_events;

/// One consumption of a metered counter. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = usage_events)]
pub struct UsageEventEntity {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub subscription_id: Uuid,
    pub counter_key: String,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
    pub cost_estimate_minor: i64,
    pub was_free: bool,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = usage_events)]
pub struct InsertUsageEventEntity {
    pub actor_id: Uuid,
    pub subscription_id: Uuid,
    pub counter_key: String,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
    pub cost_estimate_minor: i64,
    pub was_free: bool,
}
