use std::sync::Arc;

use axum::{
    Extension, Json, RequestPartsExt, async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::axum_http::error_responses::ErrorResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct SupabaseClaims {
    pub sub: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub exp: usize,
}

/// Verifies identity-provider bearer tokens (HS256 with a shared secret).
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<SupabaseClaims, AuthError> {
        decode::<SupabaseClaims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| {
                debug!(error = %err, "auth: jwt validation failed");
                AuthError::InvalidToken
            })
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub actor_id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InvalidSubject,
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing bearer token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::InvalidSubject => (StatusCode::UNAUTHORIZED, "Invalid user ID in token"),
            AuthError::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message: message.to_string(),
        });

        (status, body).into_response()
    }
}

impl TryFrom<SupabaseClaims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: SupabaseClaims) -> Result<Self, Self::Error> {
        let actor_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(AuthUser {
            actor_id,
            email: claims.email,
            role: claims.role,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(verifier) = parts
            .extract::<Extension<Arc<JwtVerifier>>>()
            .await
            .map_err(|_| AuthError::NotConfigured)?;

        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingToken)?;

        let claims = verifier.verify(bearer.token())?;
        AuthUser::try_from(claims)
    }
}

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;
