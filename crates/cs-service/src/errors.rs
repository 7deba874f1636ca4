//! Call Signaling Service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Call Signaling Service error type.
///
/// Maps to appropriate HTTP status codes:
/// - Database: 500 Internal Server Error
/// - InvalidToken: 401 Unauthorized
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - Forbidden: 403 Forbidden
/// - BadRequest: 400 Bad Request
/// - RelayFailed: 502 Bad Gateway
#[derive(Debug, Error)]
pub enum CsError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Relay failed: {0}")]
    RelayFailed(String),
}

impl CsError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            CsError::Database(_) => 500,
            CsError::InvalidToken(_) => 401,
            CsError::NotFound(_) => 404,
            CsError::Conflict(_) => 409,
            CsError::Forbidden(_) => 403,
            CsError::BadRequest(_) => 400,
            CsError::RelayFailed(_) => 502,
        }
    }

    /// Returns the stable machine-readable code sent to clients, both in
    /// HTTP error bodies and in WebSocket `error` frames.
    pub fn error_code(&self) -> &'static str {
        match self {
            CsError::Database(_) => "DATABASE_ERROR",
            CsError::InvalidToken(_) => "INVALID_TOKEN",
            CsError::NotFound(_) => "NOT_FOUND",
            CsError::Conflict(_) => "CONFLICT",
            CsError::Forbidden(_) => "FORBIDDEN",
            CsError::BadRequest(_) => "BAD_REQUEST",
            CsError::RelayFailed(_) => "RELAY_FAILED",
        }
    }

    /// The message safe to send to a client. Database and relay errors
    /// collapse to a generic message; the detail stays in logs.
    pub fn client_message(&self) -> String {
        match self {
            CsError::Database(_) => "An internal database error occurred".to_string(),
            CsError::InvalidToken(reason)
            | CsError::NotFound(reason)
            | CsError::Conflict(reason)
            | CsError::Forbidden(reason)
            | CsError::BadRequest(reason) => reason.clone(),
            CsError::RelayFailed(_) => "Message could not be delivered".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CsError {
    fn into_response(self) -> Response {
        match &self {
            CsError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "cs.database", error = %err, "Database operation failed");
            }
            CsError::RelayFailed(detail) => {
                tracing::warn!(target: "cs.relay", detail = %detail, "Relay delivery failed");
            }
            _ => {}
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"callbridge-api\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to CsError
impl From<sqlx::Error> for CsError {
    fn from(err: sqlx::Error) -> Self {
        CsError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_database_error() {
        let error = CsError::Database("connection failed".to_string());
        assert_eq!(format!("{}", error), "Database error: connection failed");
    }

    #[test]
    fn test_display_relay_failed() {
        let error = CsError::RelayFailed("channel closed".to_string());
        assert_eq!(format!("{}", error), "Relay failed: channel closed");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CsError::Database("test".to_string()).status_code(), 500);
        assert_eq!(CsError::InvalidToken("test".to_string()).status_code(), 401);
        assert_eq!(CsError::NotFound("test".to_string()).status_code(), 404);
        assert_eq!(CsError::Conflict("test".to_string()).status_code(), 409);
        assert_eq!(CsError::Forbidden("test".to_string()).status_code(), 403);
        assert_eq!(CsError::BadRequest("test".to_string()).status_code(), 400);
        assert_eq!(CsError::RelayFailed("test".to_string()).status_code(), 502);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(CsError::RelayFailed("x".to_string()).error_code(), "RELAY_FAILED");
        assert_eq!(CsError::BadRequest("x".to_string()).error_code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_into_response_database_error() {
        let error = CsError::Database("connection failed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body_json["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_invalid_token() {
        let error = CsError::InvalidToken("token expired".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Check WWW-Authenticate header
        let www_auth = response.headers().get("WWW-Authenticate");
        assert!(www_auth.is_some());
        let www_auth_str = www_auth.unwrap().to_str().unwrap();
        assert!(www_auth_str.contains("Bearer realm=\"callbridge-api\""));

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body_json["error"]["message"], "token expired");
    }

    #[tokio::test]
    async fn test_into_response_conflict() {
        let error = CsError::Conflict("Session has already ended".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "CONFLICT");
        assert_eq!(body_json["error"]["message"], "Session has already ended");
    }

    #[tokio::test]
    async fn test_into_response_relay_failed_hides_detail() {
        let error = CsError::RelayFailed("mpsc channel closed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "RELAY_FAILED");
        // Generic message returned to client
        assert_eq!(body_json["error"]["message"], "Message could not be delivered");
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let error = CsError::NotFound("Session not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "NOT_FOUND");
        assert_eq!(body_json["error"]["message"], "Session not found");
    }
}
