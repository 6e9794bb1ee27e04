use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use uuid::Uuid;

use super::JwtVerifier;

pub const TEST_JWT_SECRET: &str = "supersecretjwtsecretforunittesting123";
pub const TEST_JWT_AUDIENCE: &str = "authenticated";

#[derive(Serialize)]
struct Claims {
    sub: String,
    aud: &'static str,
    email: Option<String>,
    exp: usize,
}

pub fn test_verifier() -> Arc<JwtVerifier> {
    Arc::new(JwtVerifier::new(TEST_JWT_SECRET, TEST_JWT_AUDIENCE))
}

/// `Authorization` header value for `actor_id`.
pub fn bearer_for(actor_id: Uuid) -> String {
    let claims = Claims {
        sub: actor_id.to_string(),
        aud: TEST_JWT_AUDIENCE,
        email: Some(format!("{actor_id}@example.com")),
        exp: 9_999_999_999,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();

    format!("Bearer {token}")
}
