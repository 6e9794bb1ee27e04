use super::*;
use axum::{Router, body::Body, http::Request, routing::get};
use jsonwebtoken::{EncodingKey, Header, encode};
use tower::ServiceExt;

const SECRET: &str = "supersecretjwtsecretforunittesting123";
const AUDIENCE: &str = "authenticated";
const SUBJECT: &str = "123e4567-e89b-12d3-a456-426614174000";

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    role: &'a str,
    email: Option<&'a str>,
    aud: &'a str,
    exp: usize,
}

fn token(secret: &str, sub: &str, aud: &str, exp: usize) -> String {
    let claims = TestClaims {
        sub,
        role: "authenticated",
        email: Some("test@example.com"),
        aud,
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn verifier() -> JwtVerifier {
    JwtVerifier::new(SECRET, AUDIENCE)
}

#[test]
fn test_verify_jwt_success() {
    let token = token(SECRET, SUBJECT, AUDIENCE, 9999999999);

    let claims = verifier().verify(&token).expect("Valid token should pass");
    let user = AuthUser::try_from(claims).unwrap();

    assert_eq!(user.actor_id, Uuid::parse_str(SUBJECT).unwrap());
    assert_eq!(user.email.as_deref(), Some("test@example.com"));
}

#[test]
fn test_verify_jwt_expired() {
    let token = token(SECRET, SUBJECT, AUDIENCE, 1);

    assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::InvalidToken);
}

#[test]
fn test_verify_jwt_invalid_signature() {
    let token = token("wrongsecret", SUBJECT, AUDIENCE, 9999999999);

    assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::InvalidToken);
}

#[test]
fn test_verify_jwt_wrong_audience() {
    let token = token(SECRET, SUBJECT, "service_role", 9999999999);

    assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::InvalidToken);
}

#[test]
fn test_non_uuid_subject_is_rejected() {
    let token = token(SECRET, "not-a-uuid", AUDIENCE, 9999999999);
    let claims = verifier().verify(&token).unwrap();

    assert_eq!(
        AuthUser::try_from(claims).unwrap_err(),
        AuthError::InvalidSubject
    );
}

async fn whoami(auth: AuthUser) -> String {
    auth.actor_id.to_string()
}

fn app() -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .layer(Extension(Arc::new(verifier())))
}

#[tokio::test]
async fn test_extractor_accepts_bearer_token() {
    let token = token(SECRET, SUBJECT, AUDIENCE, 9999999999);
    let request = Request::builder()
        .uri("/whoami")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body, SUBJECT.as_bytes());
}

#[tokio::test]
async fn test_extractor_rejects_missing_header() {
    let request = Request::builder()
        .uri("/whoami")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
