use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use entitlements::domain::{
    entities::usage_events::UsageEventEntity,
    repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository,
        usage_events::UsageEventRepository,
    },
    value_objects::{billing_periods, enums::usage_counters::UsageCounter},
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use super::entitlements::{EntitlementEngine, EntitlementError, EntitlementResult};

#[derive(Debug, Clone, Copy)]
pub struct InsightsConfig {
    pub hours_per_match: i64,
    pub hourly_rate_minor: i64,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            hours_per_match: 2,
            hourly_rate_minor: 5_000,
        }
    }
}

/// Estimated value of AI matching for the current period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageInsights {
    pub period_start: DateTime<Utc>,
    pub ai_matches: i64,
    pub free_matches: i64,
    pub time_saved_hours: i64,
    pub value_saved_minor: i64,
    pub spent_minor: i64,
    /// `None` while nothing was spent.
    pub roi_percent: Option<i64>,
}

impl UsageInsights {
    pub fn from_events(
        period_start: DateTime<Utc>,
        events: &[UsageEventEntity],
        config: InsightsConfig,
    ) -> Self {
        let ai_matches: i64 = events.iter().map(|event| event.amount).sum();
        let free_matches: i64 = events
            .iter()
            .filter(|event| event.was_free)
            .map(|event| event.amount)
            .sum();
        let spent_minor: i64 = events.iter().map(|event| event.cost_estimate_minor).sum();
        let time_saved_hours = ai_matches.saturating_mul(config.hours_per_match);
        let value_saved_minor = time_saved_hours.saturating_mul(config.hourly_rate_minor);
        let roi_percent = (spent_minor > 0)
            .then(|| (value_saved_minor - spent_minor).saturating_mul(100) / spent_minor);

        Self {
            period_start,
            ai_matches,
            free_matches,
            time_saved_hours,
            value_saved_minor,
            spent_minor,
            roi_percent,
        }
    }
}

pub struct UsageInsightsUseCase<P, S, U>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UsageEventRepository + Send + Sync + 'static,
{
    engine: Arc<EntitlementEngine<P, S>>,
    usage_event_repo: Arc<U>,
    config: InsightsConfig,
}

impl<P, S, U> UsageInsightsUseCase<P, S, U>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UsageEventRepository + Send + Sync + 'static,
{
    pub fn new(
        engine: Arc<EntitlementEngine<P, S>>,
        usage_event_repo: Arc<U>,
        config: InsightsConfig,
    ) -> Self {
        Self {
            engine,
            usage_event_repo,
            config,
        }
    }

    pub async fn usage_insights(&self, actor_id: Uuid) -> EntitlementResult<UsageInsights> {
        let snapshot = self.engine.resolve_entitlement(actor_id).await?;
        let now = self.engine.now();

        // Implicit FREE actors have no stored period; look back one period instead.
        let period_start = snapshot
            .period_reset_date
            .and_then(billing_periods::period_start)
            .or_else(|| now.checked_sub_months(Months::new(billing_periods::PERIOD_MONTHS)))
            .unwrap_or(now);

        let events = self
            .usage_event_repo
            .list_by_actor_since(actor_id, UsageCounter::AiMatches, period_start)
            .await
            .map_err(|err| {
                error!(%actor_id, db_error = ?err, "usage_insights: failed to load usage events");
                EntitlementError::StoreUnavailable(err)
            })?;

        Ok(UsageInsights::from_events(period_start, &events, self.config))
    }
}
