use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use entitlements::{
    domain::value_objects::enums::usage_counters::UsageCounter,
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            plans::PlanPostgres, subscriptions::SubscriptionPostgres,
            usage_events::UsageEventPostgres,
        },
    },
    payments::stripe_client::StripeClient,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    auth::JwtVerifier,
    axum_http::{default_routers, routers},
    config::{config_model::DotEnvyConfig, stage::Stage},
    usecases::{
        clock::{Clock, SystemClock},
        entitlements::{EntitlementEngine, EntitlementSettings},
        subscriptions::{SubscriptionSettings, SubscriptionUseCase},
        usage_insights::{InsightsConfig, UsageInsightsUseCase},
    },
};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let plan_repository = Arc::new(PlanPostgres::new(Arc::clone(&db_pool)));
    let subscription_repository = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let usage_event_repository = Arc::new(UsageEventPostgres::new(Arc::clone(&db_pool)));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = Arc::new(EntitlementEngine::new(
        Arc::clone(&plan_repository),
        Arc::clone(&subscription_repository),
        EntitlementSettings {
            free_plan_id: config.entitlements.free_plan_id,
            metered: HashMap::from([(UsageCounter::AiMatches, config.entitlements.ai_matches)]),
        },
        Arc::clone(&clock),
    ));

    let insights_usecase = Arc::new(UsageInsightsUseCase::new(
        Arc::clone(&engine),
        usage_event_repository,
        InsightsConfig {
            hours_per_match: config.insights.hours_per_match,
            hourly_rate_minor: config.insights.hourly_rate_minor,
        },
    ));

    let stripe_client = Arc::new(StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
    ));
    let subscriptions_usecase = Arc::new(SubscriptionUseCase::new(
        plan_repository,
        subscription_repository,
        Arc::clone(&engine),
        stripe_client,
        clock,
        SubscriptionSettings {
            require_livemode: config.stage == Stage::Production,
        },
    ));

    let jwt_verifier = Arc::new(JwtVerifier::new(
        &config.supabase.jwt_secret,
        &config.supabase.jwt_audience,
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/entitlements",
            routers::entitlements::routes(engine, insights_usecase),
        )
        .nest(
            "/api/v1/subscriptions",
            routers::subscriptions::routes(subscriptions_usecase),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(jwt_verifier))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any), // TODO restrict to the web app origin once it has a fixed domain
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, stage = %config.stage, "backend: http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "backend: failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "backend: failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("backend: received ctrl+C signal"),
        _ = terminate => info!("backend: received terminate signal"),
    }
}
