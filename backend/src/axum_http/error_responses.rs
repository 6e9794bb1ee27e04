use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::usecases::{entitlements::EntitlementError, subscriptions::SubscriptionError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse::new(status, message))).into_response()
}

impl IntoResponse for EntitlementError {
    fn into_response(self) -> Response {
        // Display of StoreUnavailable never includes the source.
        error_response(self.status_code(), self.to_string())
    }
}

impl IntoResponse for SubscriptionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            // Don't leak provider error detail to client
            SubscriptionError::PaymentProvider(_) => "payment provider unavailable".to_string(),
            other => other.to_string(),
        };

        error_response(status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn store_failures_do_not_leak_details() {
        let response =
            EntitlementError::StoreUnavailable(anyhow::anyhow!("password=hunter2")).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["code"], 503);
        assert_eq!(body["message"], "temporarily unavailable, please try again");
    }

    #[tokio::test]
    async fn provider_failures_map_to_bad_gateway() {
        let response =
            SubscriptionError::PaymentProvider(anyhow::anyhow!("sk_live_secret rejected"))
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["message"], "payment provider unavailable");
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let response = EntitlementError::UnknownCounter("coffee".into()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "unknown counter: coffee");
    }
}
