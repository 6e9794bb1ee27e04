use entitlements::domain::value_objects::usage_pricing::MeteredPricing;
use uuid::Uuid;

use super::stage::Stage;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub stage: Stage,
    pub backend_server: BackendServer,
    pub database: Database,
    pub supabase: Supabase,
    pub stripe: Stripe,
    pub entitlements: Entitlements,
    pub insights: Insights,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// Megabytes.
    pub body_limit: u64,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Supabase {
    pub jwt_secret: String,
    pub jwt_audience: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct Entitlements {
    pub free_plan_id: Uuid,
    pub ai_matches: MeteredPricing,
}

#[derive(Debug, Clone)]
pub struct Insights {
    pub hours_per_match: i64,
    pub hourly_rate_minor: i64,
}
