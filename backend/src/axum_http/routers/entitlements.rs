use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use entitlements::domain::{
    repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository,
        usage_events::UsageEventRepository,
    },
    value_objects::{
        entitlements::{EntitlementSnapshot, UsageProgress},
        enums::{plan_features::PlanFeature, usage_counters::UsageCounter},
    },
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AuthUser,
    usecases::{
        entitlements::{EntitlementEngine, EntitlementError},
        usage_insights::UsageInsightsUseCase,
    },
};

pub fn routes<P, S, U>(
    engine: Arc<EntitlementEngine<P, S>>,
    insights_usecase: Arc<UsageInsightsUseCase<P, S, U>>,
) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UsageEventRepository + Send + Sync + 'static,
{
    let insights = Router::new()
        .route("/insights", get(usage_insights::<P, S, U>))
        .with_state(insights_usecase);

    Router::new()
        .route("/", get(current_entitlements::<P, S>))
        .route("/consume", post(consume::<P, S>))
        .route("/features/:feature", get(has_feature::<P, S>))
        .with_state(engine)
        .merge(insights)
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub counter: String,
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    #[serde(flatten)]
    pub snapshot: EntitlementSnapshot,
    pub progress: Vec<UsageProgress>,
}

#[derive(Debug, Serialize)]
pub struct FeatureResponse {
    pub feature: PlanFeature,
    pub enabled: bool,
}

pub async fn current_entitlements<P, S>(
    State(engine): State<Arc<EntitlementEngine<P, S>>>,
    auth: AuthUser,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    match engine.resolve_entitlement(auth.actor_id).await {
        Ok(snapshot) => {
            let progress = snapshot.progress_all();
            Json(EntitlementResponse { snapshot, progress }).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn consume<P, S>(
    State(engine): State<Arc<EntitlementEngine<P, S>>>,
    auth: AuthUser,
    Json(payload): Json<ConsumeRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    let Some(counter) = UsageCounter::from_str(&payload.counter) else {
        return EntitlementError::UnknownCounter(payload.counter).into_response();
    };
    let amount = payload.amount.unwrap_or(1);

    match engine.check_and_consume(auth.actor_id, counter, amount).await {
        Ok(result) => {
            if !result.allowed {
                info!(
                    actor_id = %auth.actor_id,
                    counter = %counter,
                    used = result.used,
                    "entitlements router: consume denied at limit"
                );
            }
            Json(result).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn has_feature<P, S>(
    State(engine): State<Arc<EntitlementEngine<P, S>>>,
    auth: AuthUser,
    Path(feature): Path<String>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    let Some(feature) = PlanFeature::from_str(&feature) else {
        return EntitlementError::UnknownFeature(feature).into_response();
    };

    match engine.has_feature(auth.actor_id, feature).await {
        Ok(enabled) => Json(FeatureResponse { feature, enabled }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn usage_insights<P, S, U>(
    State(insights_usecase): State<Arc<UsageInsightsUseCase<P, S, U>>>,
    auth: AuthUser,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UsageEventRepository + Send + Sync + 'static,
{
    match insights_usecase.usage_insights(auth.actor_id).await {
        Ok(insights) => Json(insights).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::test_support::{bearer_for, test_verifier},
        usecases::{
            test_fixtures::{BASIC_PLAN_ID, EngineHarness, engine_harness},
            usage_insights::InsightsConfig,
        },
    };
    use axum::{
        Extension,
        body::Body,
        http::{Request, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(harness: &EngineHarness) -> Router {
        let insights_usecase = Arc::new(UsageInsightsUseCase::new(
            Arc::clone(&harness.engine),
            Arc::clone(&harness.store),
            InsightsConfig::default(),
        ));

        routes(Arc::clone(&harness.engine), insights_usecase).layer(Extension(test_verifier()))
    }

    fn get_request(uri: &str, actor_id: Uuid) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, bearer_for(actor_id))
            .body(Body::empty())
            .unwrap()
    }

    fn consume_request(actor_id: Uuid, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/consume")
            .header(AUTHORIZATION, bearer_for(actor_id))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn snapshot_requires_a_bearer_token() {
        let harness = engine_harness();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = app(&harness).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn new_actor_sees_free_plan_with_progress() {
        let harness = engine_harness();
        let actor_id = Uuid::new_v4();

        let response = app(&harness)
            .oneshot(get_request("/", actor_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tier"], "FREE");
        assert_eq!(body["source"], "implicit");
        assert_eq!(body["actor_id"], actor_id.to_string());
        let applications = body["progress"]
            .as_array()
            .unwrap()
            .iter()
            .find(|progress| progress["counter"] == "applications")
            .cloned()
            .unwrap();
        assert_eq!(applications["used"], 0);
        assert_eq!(applications["remaining"], 3);
    }

    #[tokio::test]
    async fn consume_denies_with_ok_status_at_the_limit() {
        let harness = engine_harness();
        let actor_id = Uuid::new_v4();
        let app = app(&harness);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(consume_request(
                    actor_id,
                    serde_json::json!({ "counter": "applications" }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["allowed"], true);
        }

        let response = app
            .oneshot(consume_request(
                actor_id,
                serde_json::json!({ "counter": "applications", "amount": 1 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["used"], 3);
    }

    #[tokio::test]
    async fn consume_rejects_unknown_counter_and_bad_amount() {
        let harness = engine_harness();
        let actor_id = Uuid::new_v4();
        let app = app(&harness);

        let unknown = app
            .clone()
            .oneshot(consume_request(
                actor_id,
                serde_json::json!({ "counter": "coffee" }),
            ))
            .await
            .unwrap();
        let zero = app
            .clone()
            .oneshot(consume_request(
                actor_id,
                serde_json::json!({ "counter": "skills", "amount": 0 }),
            ))
            .await
            .unwrap();
        let huge = app
            .oneshot(consume_request(
                actor_id,
                serde_json::json!({ "counter": "skills", "amount": i64::MAX }),
            ))
            .await
            .unwrap();

        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert_eq!(zero.status(), StatusCode::BAD_REQUEST);
        assert_eq!(huge.status(), StatusCode::BAD_REQUEST);
        assert!(harness.store.subscriptions_of(actor_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn feature_lookup() {
        let harness = engine_harness();
        let actor_id = Uuid::new_v4();
        let app = app(&harness);

        let ai = app
            .clone()
            .oneshot(get_request("/features/ai_job_matching", actor_id))
            .await
            .unwrap();
        assert_eq!(ai.status(), StatusCode::OK);
        let body = body_json(ai).await;
        assert_eq!(body["feature"], "ai_job_matching");
        assert_eq!(body["enabled"], false);

        let unknown = app
            .oneshot(get_request("/features/teleportation", actor_id))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn insights_route_reports_matches() {
        let harness = engine_harness();
        let actor_id = Uuid::new_v4();
        harness
            .engine
            .change_plan(actor_id, BASIC_PLAN_ID, harness.engine.now(), None)
            .await
            .unwrap();
        harness
            .engine
            .check_and_consume(actor_id, UsageCounter::AiMatches, 1)
            .await
            .unwrap();

        let response = app(&harness)
            .oneshot(get_request("/insights", actor_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ai_matches"], 1);
        assert_eq!(body["free_matches"], 1);
        assert_eq!(body["time_saved_hours"], 2);
        assert!(body["roi_percent"].is_null());
    }
}
