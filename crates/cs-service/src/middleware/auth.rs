//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, validates it
//! against the shared HS256 secret, and injects the authenticated user into
//! request extensions for downstream handlers.

use crate::auth::JwtValidator;
use crate::errors::CsError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// JWT validator over the shared secret.
    pub jwt_validator: Arc<JwtValidator>,
}

/// Extract Bearer token from the Authorization header.
fn extract_bearer_token(req: &Request) -> Result<&str, CsError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "cs.middleware.auth", "Missing Authorization header");
            CsError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "cs.middleware.auth", "Invalid Authorization header format");
        CsError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware for user bearer tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if token is missing or invalid
/// - Continues to next handler with `AuthenticatedUser` in extensions if
///   token is valid
#[instrument(skip_all, name = "cs.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CsError> {
    let token = extract_bearer_token(&req)?;

    let user = state.jwt_validator.validate(token)?;

    // Store the authenticated user in request extensions for handlers
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::{middleware, routing::get, Extension, Router};
    use chrono::Utc;
    use common::secret::SecretString;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "middleware-test-secret";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
        iat: i64,
    }

    fn token_for(user: Uuid) -> String {
        let now = Utc::now().timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &TestClaims {
                sub: user.to_string(),
                exp: now + 3600,
                iat: now,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn whoami(Extension(user): Extension<AuthenticatedUser>) -> String {
        user.user_id.to_string()
    }

    fn test_app() -> Router {
        let auth_state = Arc::new(AuthState {
            jwt_validator: Arc::new(JwtValidator::new(
                &SecretString::from(SECRET.to_string()),
                300,
            )),
        });

        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    #[tokio::test]
    async fn test_valid_token_passes_through() {
        let user = Uuid::new_v4();
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {}", token_for(user)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_rejected() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get("WWW-Authenticate").is_some());
    }

    #[tokio::test]
    async fn test_malformed_header_rejected() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let now = Utc::now().timestamp();
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &TestClaims {
                sub: Uuid::new_v4().to_string(),
                exp: now + 3600,
                iat: now,
            },
            &EncodingKey::from_secret(b"wrong-secret"),
        )
        .unwrap();

        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {}", forged))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
