use std::str::FromStr;

use anyhow::{Context, Result};
use entitlements::domain::value_objects::{plans::FREE_PLAN_ID, usage_pricing::MeteredPricing};

use super::{
    config_model::{
        BackendServer, Database, DotEnvyConfig, Entitlements, Insights, Stripe, Supabase,
    },
    stage::Stage,
};

const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_JWT_AUDIENCE: &str = "authenticated";
const DEFAULT_AI_MATCHES_FREE_PER_PERIOD: i64 = 3;
const DEFAULT_AI_MATCH_UNIT_PRICE_MINOR: i64 = 50;
const DEFAULT_INSIGHTS_HOURS_PER_MATCH: i64 = 2;
const DEFAULT_INSIGHTS_HOURLY_RATE_MINOR: i64 = 5_000;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

pub(crate) fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let env = Env(lookup);

    let stage = env
        .optional("STAGE")
        .map(|raw| Stage::try_from(&raw))
        .transpose()?
        .unwrap_or_default();

    let backend_server = BackendServer {
        port: env.parse("SERVER_PORT_BACKEND")?,
        body_limit: env.parse("SERVER_BODY_LIMIT")?,
        timeout: env.parse("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: env.required("DATABASE_URL")?,
        statement_timeout_ms: env
            .parse_or("DATABASE_STATEMENT_TIMEOUT_MS", DEFAULT_STATEMENT_TIMEOUT_MS)?,
    };

    let supabase = Supabase {
        jwt_secret: env.required("SUPABASE_JWT_SECRET")?,
        jwt_audience: env
            .optional("JWT_AUDIENCE")
            .unwrap_or_else(|| DEFAULT_JWT_AUDIENCE.to_string()),
    };

    let stripe = Stripe {
        secret_key: env.required("STRIPE_SECRET_KEY")?,
        webhook_secret: env.required("STRIPE_WEBHOOK_SECRET")?,
        success_url: env.required("STRIPE_SUCCESS_URL")?,
        cancel_url: env.required("STRIPE_CANCEL_URL")?,
    };

    let entitlements = Entitlements {
        free_plan_id: env.parse_or("FREE_PLAN_ID", FREE_PLAN_ID)?,
        ai_matches: MeteredPricing {
            free_per_period: env
                .parse_or("AI_MATCHES_FREE_PER_PERIOD", DEFAULT_AI_MATCHES_FREE_PER_PERIOD)?,
            unit_price_minor: env
                .parse_or("AI_MATCH_UNIT_PRICE_MINOR", DEFAULT_AI_MATCH_UNIT_PRICE_MINOR)?,
        },
    };

    let insights = Insights {
        hours_per_match: env
            .parse_or("INSIGHTS_HOURS_PER_MATCH", DEFAULT_INSIGHTS_HOURS_PER_MATCH)?,
        hourly_rate_minor: env
            .parse_or("INSIGHTS_HOURLY_RATE_MINOR", DEFAULT_INSIGHTS_HOURLY_RATE_MINOR)?,
    };

    Ok(DotEnvyConfig {
        stage,
        backend_server,
        database,
        supabase,
        stripe,
        entitlements,
        insights,
    })
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} is not set"))
    }

    fn parse<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.required(key)?
            .trim()
            .parse()
            .with_context(|| format!("{key} is invalid"))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{key} is invalid")),
            None => Ok(default),
        }
    }
}
