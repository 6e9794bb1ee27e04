use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use entitlements::domain::{
    repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
    value_objects::subscriptions::CreateCheckoutRequest,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::AuthUser,
    usecases::subscriptions::{PaymentGateway, SubscriptionError, SubscriptionUseCase},
};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes<P, S, G>(subscriptions_usecase: Arc<SubscriptionUseCase<P, S, G>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/plans", get(list_plans::<P, S, G>))
        .route("/checkout", post(create_checkout::<P, S, G>))
        .route(
            "/checkout/:session_id/confirm",
            post(confirm_checkout::<P, S, G>),
        )
        .route("/stripe/webhook", post(stripe_webhook::<P, S, G>))
        .with_state(subscriptions_usecase)
}

pub async fn list_plans<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match subscriptions_usecase.list_plans().await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn create_checkout<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match subscriptions_usecase
        .create_checkout_session(auth.actor_id, auth.email, payload.plan_id)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn confirm_checkout<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match subscriptions_usecase
        .confirm_checkout(auth.actor_id, &session_id)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Signed by the provider; the body must reach the verifier byte-for-byte.
pub async fn stripe_webhook<P, S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let Some(signature) = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("subscriptions router: stripe webhook without signature header");
        return SubscriptionError::InvalidWebhook("missing signature header".into())
            .into_response();
    };

    info!(
        payload_bytes = body.len(),
        "subscriptions router: stripe webhook received"
    );
    match subscriptions_usecase
        .handle_stripe_webhook(&body, signature)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(err) => err.into_response(),
    }
}
