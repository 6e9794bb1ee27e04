use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, TimeZone, Utc};
use entitlements::{
    domain::{
        entities::plans::PlanEntity,
        value_objects::{
            enums::{audiences::Audience, plan_tiers::PlanTier, usage_counters::UsageCounter},
            plans::{FREE_PLAN_ID, PlanFeatures, PlanLimits},
            usage_pricing::MeteredPricing,
        },
    },
    infra::memory::InMemoryStore,
};
use uuid::Uuid;

use super::{
    clock::TestClock,
    entitlements::{EntitlementEngine, EntitlementSettings},
};

pub const BASIC_PLAN_ID: Uuid = Uuid::from_u128(1);
pub const PRO_PLAN_ID: Uuid = Uuid::from_u128(2);
pub const PREMIUM_PLAN_ID: Uuid = Uuid::from_u128(3);
pub const RETIRED_PLAN_ID: Uuid = Uuid::from_u128(99);

pub const AI_MATCH_PRICING: MeteredPricing = MeteredPricing {
    free_per_period: 2,
    unit_price_minor: 50,
};

fn plan(
    id: Uuid,
    tier: PlanTier,
    price_minor: i32,
    limits: PlanLimits,
    features: PlanFeatures,
) -> PlanEntity {
    PlanEntity {
        id,
        tier,
        audience: Audience::Talent,
        name: tier.to_string(),
        price_minor,
        limits,
        features,
        is_active: true,
        stripe_price_id: (price_minor > 0).then(|| format!("price_{}", tier.as_str())),
    }
}

pub fn free_plan() -> PlanEntity {
    plan(
        FREE_PLAN_ID,
        PlanTier::Free,
        0,
        PlanLimits::from_pairs([
            ("application_limit", 3),
            ("skill_limit", 5),
            ("ai_match_limit", 3),
            ("profile_highlights_limit", 0),
        ]),
        PlanFeatures::from_pairs([("ai_job_matching", false), ("verified_badge", false)]),
    )
}

pub fn basic_plan() -> PlanEntity {
    plan(
        BASIC_PLAN_ID,
        PlanTier::Basic,
        990,
        PlanLimits::from_pairs([
            ("application_limit", 10),
            ("skill_limit", 15),
            ("ai_match_limit", 10),
        ]),
        PlanFeatures::from_pairs([("profile_views_enabled", true)]),
    )
}

pub fn pro_plan() -> PlanEntity {
    plan(
        PRO_PLAN_ID,
        PlanTier::Pro,
        1990,
        PlanLimits::from_pairs([("application_limit", 50), ("ai_match_limit", 50)]),
        PlanFeatures::from_pairs([("ai_job_matching", true), ("verified_badge", true)]),
    )
}

pub fn premium_plan() -> PlanEntity {
    plan(
        PREMIUM_PLAN_ID,
        PlanTier::Premium,
        3990,
        PlanLimits::from_pairs([("application_limit", -1), ("ai_match_limit", -1)]),
        PlanFeatures::from_pairs([("ai_job_matching", true)]),
    )
}

pub fn retired_plan() -> PlanEntity {
    PlanEntity {
        is_active: false,
        ..plan(
            RETIRED_PLAN_ID,
            PlanTier::Business,
            9900,
            PlanLimits::default(),
            PlanFeatures::default(),
        )
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn seeded_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_plans([
        free_plan(),
        basic_plan(),
        pro_plan(),
        premium_plan(),
        retired_plan(),
    ]))
}

pub fn settings() -> EntitlementSettings {
    EntitlementSettings {
        free_plan_id: FREE_PLAN_ID,
        metered: HashMap::from([(UsageCounter::AiMatches, AI_MATCH_PRICING)]),
    }
}

pub struct EngineHarness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<TestClock>,
    pub engine: Arc<EntitlementEngine<InMemoryStore, InMemoryStore>>,
}

pub fn engine_harness() -> EngineHarness {
    let store = seeded_store();
    let clock = Arc::new(TestClock::at(start_time()));
    let engine = Arc::new(EntitlementEngine::new(
        Arc::clone(&store),
        Arc::clone(&store),
        settings(),
        clock.clone(),
    ));

    EngineHarness {
        store,
        clock,
        engine,
    }
}
