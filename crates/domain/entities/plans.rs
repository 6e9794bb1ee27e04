use anyhow::{Context, Result, anyhow};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::{audiences::Audience, plan_tiers::PlanTier},
        plans::{PlanFeatures, PlanLimits},
    },
    infra::db::postgres::schema::plans,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntity {
    pub id: Uuid,
    pub tier: PlanTier,
    pub audience: Audience,
    pub name: String,
    pub price_minor: i32,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
    pub is_active: bool,
    pub stripe_price_id: Option<String>,
}

/// Raw row used for Diesel queries. Limits and features stay as JSON until parsed.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
pub struct PlanRow {
    pub id: Uuid,
    pub tier: String,
    pub audience: String,
    pub name: String,
    pub price_minor: i32,
    pub limits: serde_json::Value,
    pub features: serde_json::Value,
    pub is_active: bool,
    pub stripe_price_id: Option<String>,
}

impl TryFrom<PlanRow> for PlanEntity {
    type Error = anyhow::Error;

    fn try_from(value: PlanRow) -> Result<Self> {
        let tier = PlanTier::from_str(&value.tier)
            .ok_or_else(|| anyhow!("plan {} has unknown tier {:?}", value.id, value.tier))?;
        let audience = Audience::from_str(&value.audience).ok_or_else(|| {
            anyhow!(
                "plan {} has unknown audience {:?}",
                value.id,
                value.audience
            )
        })?;
        let limits = serde_json::from_value(value.limits)
            .with_context(|| format!("plan {} has malformed limits", value.id))?;
        let features = serde_json::from_value(value.features)
            .with_context(|| format!("plan {} has malformed features", value.id))?;

        Ok(Self {
            id: value.id,
            tier,
            audience,
            name: value.name,
            price_minor: value.price_minor,
            limits,
            features,
            is_active: value.is_active,
            stripe_price_id: value.stripe_price_id,
        })
    }
}
