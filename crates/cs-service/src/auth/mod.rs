//! JWT validation for the Call Signaling Service.
//!
//! Bearer tokens are HS256-signed with a shared secret. Validation enforces
//! size limits, signature, expiry and issued-at sanity via the shared helpers
//! in `common::jwt`. The token `sub` claim must carry the user's UUID.

use crate::errors::CsError;
use common::jwt::{check_token_size, validate_iat, BearerClaims};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use uuid::Uuid;

/// The authenticated caller, extracted from a validated bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// User UUID from the token `sub` claim.
    pub user_id: Uuid,

    /// Raw validated claims.
    pub claims: BearerClaims,
}

/// Validates HS256 bearer tokens against the configured shared secret.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl JwtValidator {
    pub fn new(secret: &SecretString, clock_skew_seconds: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = clock_skew_seconds.max(0) as u64;
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew: Duration::from_secs(clock_skew_seconds.max(0) as u64),
        }
    }

    /// Validate a bearer token and extract the authenticated user.
    ///
    /// Clients see a uniform "invalid or expired" message regardless of the
    /// specific failure; the detail is logged at debug level.
    pub fn validate(&self, token: &str) -> Result<AuthenticatedUser, CsError> {
        check_token_size(token)
            .map_err(|e| CsError::InvalidToken(e.to_string()))?;

        let token_data = decode::<BearerClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(target: "cs.auth", error = %e, "Token validation failed");
                CsError::InvalidToken("The access token is invalid or expired".to_string())
            })?;

        let claims = token_data.claims;

        validate_iat(claims.iat, self.clock_skew)
            .map_err(|e| CsError::InvalidToken(e.to_string()))?;

        let user_id = parse_user_id(&claims.sub).ok_or_else(|| {
            tracing::debug!(target: "cs.auth", "Token sub claim is not a user id");
            CsError::InvalidToken("The access token is invalid or expired".to_string())
        })?;

        Ok(AuthenticatedUser { user_id, claims })
    }
}

/// Parse a user UUID from a token subject. Accepts a bare UUID or the
/// `user:<uuid>` form issued by older token services.
pub fn parse_user_id(sub: &str) -> Option<Uuid> {
    let raw = sub.strip_prefix("user:").unwrap_or(sub);
    Uuid::parse_str(raw).ok()
}
