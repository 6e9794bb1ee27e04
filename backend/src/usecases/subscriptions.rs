use std::{collections::HashMap, sync::Arc};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use entitlements::{
    domain::{
        repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
        value_objects::{
            plans::PlanDto,
            subscriptions::{CreateCheckoutResponse, PlanChangeOutcome},
        },
    },
    payments::stripe_client::{
        CHECKOUT_SESSION_COMPLETED, CUSTOMER_SUBSCRIPTION_DELETED, CheckoutSessionParams,
        StripeCheckoutSession, StripeClient, StripeEvent,
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    clock::Clock,
    entitlements::{EntitlementEngine, EntitlementError},
};

const METADATA_ACTOR_ID: &str = "actor_id";
const METADATA_PLAN_ID: &str = "plan_id";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, params: CheckoutSessionParams) -> AnyResult<String>;

    async fn retrieve_checkout_session(&self, session_id: &str)
    -> AnyResult<StripeCheckoutSession>;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> AnyResult<StripeEvent>;
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(&self, params: CheckoutSessionParams) -> AnyResult<String> {
        self.create_checkout_session(params).await
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> AnyResult<StripeCheckoutSession> {
        self.retrieve_checkout_session(session_id).await
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature, now)
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("plan not found")]
    PlanNotFound,
    #[error("plan has no price configured")]
    MissingPrice,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("payment has not been completed")]
    PaymentNotCompleted,
    #[error("invalid webhook payload: {0}")]
    InvalidWebhook(String),
    #[error("payment provider request failed")]
    PaymentProvider(#[source] anyhow::Error),
    #[error("temporarily unavailable, please try again")]
    Unavailable(#[source] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SubscriptionError::Unauthorized => StatusCode::UNAUTHORIZED,
            SubscriptionError::PlanNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::MissingPrice
            | SubscriptionError::InvalidRequest(_)
            | SubscriptionError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::PaymentNotCompleted => StatusCode::PAYMENT_REQUIRED,
            SubscriptionError::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            SubscriptionError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<EntitlementError> for SubscriptionError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::NotAuthenticated => SubscriptionError::Unauthorized,
            EntitlementError::PlanNotFound(_) => SubscriptionError::PlanNotFound,
            EntitlementError::StoreUnavailable(err) => SubscriptionError::Unavailable(err),
            other => SubscriptionError::InvalidRequest(other.to_string()),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionSettings {
    /// Drop test-mode webhook events (production deployments).
    pub require_livemode: bool,
}

/// Plan catalogue and payment glue. Every confirmed payment ends in
/// [`EntitlementEngine::change_plan`].
pub struct SubscriptionUseCase<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    engine: Arc<EntitlementEngine<P, S>>,
    payment_gateway: Arc<G>,
    clock: Arc<dyn Clock>,
    settings: SubscriptionSettings,
}

impl<P, S, G> SubscriptionUseCase<P, S, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        plan_repo: Arc<P>,
        subscription_repo: Arc<S>,
        engine: Arc<EntitlementEngine<P, S>>,
        payment_gateway: Arc<G>,
        clock: Arc<dyn Clock>,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            engine,
            payment_gateway,
            clock,
            settings,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanDto>> {
        let plans = self.plan_repo.list_active_plans().await.map_err(|err| {
            error!(db_error = ?err, "subscriptions: failed to list active plans");
            SubscriptionError::Unavailable(err)
        })?;
        debug!(plan_count = plans.len(), "subscriptions: active plans loaded");
        Ok(plans.into_iter().map(PlanDto::from).collect())
    }

    pub async fn create_checkout_session(
        &self,
        actor_id: Uuid,
        actor_email: Option<String>,
        plan_id: Uuid,
    ) -> UseCaseResult<CreateCheckoutResponse> {
        if actor_id.is_nil() {
            return Err(SubscriptionError::Unauthorized);
        }

        info!(%actor_id, %plan_id, "subscriptions: create checkout session requested");

        if plan_id == self.engine.free_plan_id() {
            let err =
                SubscriptionError::InvalidRequest("free plan does not require checkout".into());
            warn!(
                %actor_id,
                %plan_id,
                status = err.status_code().as_u16(),
                "subscriptions: free plan checkout attempted"
            );
            return Err(err);
        }

        let plan = self
            .plan_repo
            .find_active_plan_by_id(plan_id)
            .await
            .map_err(|err| {
                error!(%actor_id, %plan_id, db_error = ?err, "subscriptions: failed to load plan for checkout");
                SubscriptionError::Unavailable(err)
            })?
            .ok_or(SubscriptionError::PlanNotFound)?;

        let price_id = plan.stripe_price_id.clone().ok_or_else(|| {
            warn!(%actor_id, %plan_id, "subscriptions: plan has no stripe price");
            SubscriptionError::MissingPrice
        })?;

        let params = CheckoutSessionParams {
            price_id,
            customer_email: actor_email,
            client_reference_id: actor_id.to_string(),
            metadata: HashMap::from([
                (METADATA_ACTOR_ID.to_string(), actor_id.to_string()),
                (METADATA_PLAN_ID.to_string(), plan_id.to_string()),
            ]),
        };

        let checkout_url = self
            .payment_gateway
            .create_checkout_session(params)
            .await
            .map_err(|err| {
                error!(%actor_id, %plan_id, error = ?err, "subscriptions: failed to create checkout session");
                SubscriptionError::PaymentProvider(err)
            })?;

        info!(%actor_id, %plan_id, "subscriptions: checkout session created");
        Ok(CreateCheckoutResponse { checkout_url })
    }

    /// Applies a paid checkout session the actor returned from. Safe to repeat
    /// and to race with the webhook: both use the session creation time as the period start.
    pub async fn confirm_checkout(
        &self,
        actor_id: Uuid,
        session_id: &str,
    ) -> UseCaseResult<PlanChangeOutcome> {
        if actor_id.is_nil() {
            return Err(SubscriptionError::Unauthorized);
        }

        let session = self
            .payment_gateway
            .retrieve_checkout_session(session_id)
            .await
            .map_err(|err| {
                error!(%actor_id, session_id, error = ?err, "subscriptions: failed to retrieve checkout session");
                SubscriptionError::PaymentProvider(err)
            })?;

        let purchase = CheckoutPurchase::from_session(&session)
            .map_err(SubscriptionError::InvalidRequest)?;

        if purchase.actor_id != actor_id {
            warn!(
                %actor_id,
                session_actor_id = %purchase.actor_id,
                session_id,
                "subscriptions: checkout session belongs to another actor"
            );
            return Err(SubscriptionError::InvalidRequest(
                "checkout session does not belong to this user".into(),
            ));
        }

        if !session.is_paid() {
            info!(
                %actor_id,
                session_id,
                payment_status = ?session.payment_status,
                "subscriptions: checkout session not paid yet"
            );
            return Err(SubscriptionError::PaymentNotCompleted);
        }

        self.apply_purchase(purchase).await
    }

    pub async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> UseCaseResult<()> {
        let event = self
            .payment_gateway
            .verify_webhook_signature(payload, signature, self.clock.utc_now())
            .map_err(|err| {
                warn!(error = %err, "subscriptions: stripe webhook verification failed");
                SubscriptionError::InvalidWebhook("signature verification failed".into())
            })?;

        info!(
            event_id = ?event.id,
            event_type = %event.type_,
            "subscriptions: stripe webhook verified"
        );

        if self.settings.require_livemode && event.livemode == Some(false) {
            warn!(event_id = ?event.id, "subscriptions: ignoring test-mode webhook event");
            return Ok(());
        }

        match event.type_.as_str() {
            CHECKOUT_SESSION_COMPLETED => self.handle_checkout_completed(&event).await,
            CUSTOMER_SUBSCRIPTION_DELETED => self.handle_subscription_deleted(&event).await,
            _ => {
                debug!(event_type = %event.type_, "subscriptions: unhandled stripe event type");
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> UseCaseResult<()> {
        let session = StripeClient::extract_checkout_session(event).ok_or_else(|| {
            warn!(event_id = ?event.id, "subscriptions: checkout session missing in webhook");
            SubscriptionError::InvalidWebhook("missing checkout session".into())
        })?;

        if !session.is_paid() {
            // Delayed payment methods complete later through confirm_checkout.
            info!(
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "subscriptions: checkout completed without payment, skipping"
            );
            return Ok(());
        }

        let purchase = CheckoutPurchase::from_session(&session).map_err(|reason| {
            warn!(session_id = %session.id, %reason, "subscriptions: unusable checkout session in webhook");
            SubscriptionError::InvalidWebhook(reason)
        })?;

        self.apply_purchase(purchase).await?;
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &StripeEvent) -> UseCaseResult<()> {
        let provider_subscription = StripeClient::extract_subscription(event).ok_or_else(|| {
            warn!(event_id = ?event.id, "subscriptions: subscription missing in webhook");
            SubscriptionError::InvalidWebhook("missing subscription".into())
        })?;

        // Only the row still bound to this provider subscription is canceled,
        // so a late deletion of a replaced subscription is a no-op.
        let subscription = self
            .subscription_repo
            .find_active_by_provider_subscription_id(&provider_subscription.id)
            .await
            .map_err(|err| {
                error!(
                    provider_subscription_id = %provider_subscription.id,
                    db_error = ?err,
                    "subscriptions: failed to load subscription for deletion"
                );
                SubscriptionError::Unavailable(err)
            })?;

        let Some(subscription) = subscription else {
            info!(
                provider_subscription_id = %provider_subscription.id,
                "subscriptions: no active subscription for deleted provider subscription"
            );
            return Ok(());
        };

        let outcome = self
            .engine
            .change_plan(
                subscription.actor_id,
                self.engine.free_plan_id(),
                self.clock.utc_now(),
                None,
            )
            .await?;

        info!(
            actor_id = %subscription.actor_id,
            provider_subscription_id = %provider_subscription.id,
            outcome = ?outcome,
            "subscriptions: provider subscription deleted"
        );
        Ok(())
    }

    async fn apply_purchase(&self, purchase: CheckoutPurchase) -> UseCaseResult<PlanChangeOutcome> {
        if purchase.plan_id == self.engine.free_plan_id() {
            return Err(SubscriptionError::InvalidRequest(
                "free plan cannot be purchased".into(),
            ));
        }

        let outcome = self
            .engine
            .change_plan(
                purchase.actor_id,
                purchase.plan_id,
                purchase.period_start,
                purchase.provider_subscription_id,
            )
            .await?;

        info!(
            actor_id = %purchase.actor_id,
            plan_id = %purchase.plan_id,
            outcome = ?outcome,
            "subscriptions: checkout applied"
        );
        Ok(outcome)
    }
}

/// What a paid checkout session grants.
#[derive(Debug, Clone, PartialEq)]
struct CheckoutPurchase {
    actor_id: Uuid,
    plan_id: Uuid,
    period_start: DateTime<Utc>,
    provider_subscription_id: Option<String>,
}

impl CheckoutPurchase {
    fn from_session(session: &StripeCheckoutSession) -> Result<Self, String> {
        let actor_id = session
            .metadata_value(METADATA_ACTOR_ID)
            .or(session.client_reference_id.as_deref())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(|| "checkout session has no actor id".to_string())?;

        let plan_id = session
            .metadata_value(METADATA_PLAN_ID)
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(|| "checkout session has no plan id".to_string())?;

        let period_start = session
            .created_at()
            .ok_or_else(|| "checkout session has an invalid creation time".to_string())?;

        Ok(Self {
            actor_id,
            plan_id,
            period_start,
            provider_subscription_id: session.subscription.clone(),
        })
    }
}
