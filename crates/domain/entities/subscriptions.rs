use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        billing_periods, entitlements::UsageCounters,
        enums::subscription_statuses::SubscriptionStatus,
    },
    infra::db::postgres::schema::subscriptions,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub period_usage: UsageCounters,
    pub period_reset_date: DateTime<Utc>,
    pub provider_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end_date| end_date <= now)
    }

    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.period_reset_date
    }
}

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub period_usage: serde_json::Value,
    pub period_reset_date: DateTime<Utc>,
    pub provider_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionEntity {
    type Error = anyhow::Error;

    fn try_from(value: SubscriptionRow) -> Result<Self> {
        let period_usage = serde_json::from_value(value.period_usage)
            .with_context(|| format!("subscription {} has malformed period_usage", value.id))?;

        Ok(Self {
            id: value.id,
            actor_id: value.actor_id,
            plan_id: value.plan_id,
            status: SubscriptionStatus::from_str(&value.status),
            is_active: value.is_active,
            start_date: value.start_date,
            end_date: value.end_date,
            period_usage,
            period_reset_date: value.period_reset_date,
            provider_subscription_id: value.provider_subscription_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub actor_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub period_usage: serde_json::Value,
    pub period_reset_date: DateTime<Utc>,
    pub provider_subscription_id: Option<String>,
}

impl InsertSubscriptionEntity {
    /// A fresh active subscription with zeroed usage and its first period starting at `start_date`.
    pub fn activate(
        actor_id: Uuid,
        plan_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        provider_subscription_id: Option<String>,
    ) -> Result<Self> {
        let period_reset_date = billing_periods::first_reset_date(start_date)
            .context("failed to compute first period reset date")?;

        Ok(Self {
            actor_id,
            plan_id,
            status: SubscriptionStatus::Active.to_string(),
            is_active: true,
            start_date,
            end_date,
            period_usage: serde_json::to_value(UsageCounters::default())?,
            period_reset_date,
            provider_subscription_id,
        })
    }

    /// Whether this activation was already applied, or predates the actor's
    /// latest paid subscription. `history` holds the actor's rows, inactive ones included.
    pub fn is_superseded_by<'a>(
        &self,
        history: impl IntoIterator<Item = &'a SubscriptionEntity>,
        free_plan_id: Uuid,
    ) -> bool {
        history.into_iter().any(|row| {
            let same_provider_subscription = self.provider_subscription_id.is_some()
                && row.provider_subscription_id == self.provider_subscription_id;
            let same_activation =
                row.plan_id == self.plan_id && row.start_date == self.start_date;
            let newer_paid = row.plan_id != free_plan_id && row.start_date > self.start_date;

            same_provider_subscription || same_activation || newer_paid
        })
    }
}
