use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::usage_events::UsageEventEntity;
use crate::domain::value_objects::enums::usage_counters::UsageCounter;

#[async_trait]
#[automock]
pub trait UsageEventRepository {
    async fn list_by_actor_since(
        &self,
        actor_id: Uuid,
        counter: UsageCounter,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageEventEntity>>;
}
