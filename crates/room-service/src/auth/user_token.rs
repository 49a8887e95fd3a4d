//! End-user token validation.
//!
//! Tokens are issued by the external identity service and signed with a
//! shared HS256 secret.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - Expiration and issued-at claims are validated with clock skew tolerance
//! - Every failure returns the same generic message

use crate::errors::RoomError;
use crate::models::Caller;
use common::jwt::{check_token_shape, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use common::types::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN: &str = "The access token is invalid or expired";

pub struct UserTokenValidator {
    decoding_key: DecodingKey,
    clock_skew: Duration,
}

impl UserTokenValidator {
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            clock_skew,
        }
    }

    /// Validate a token and return the caller it identifies.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::InvalidToken` with a generic message for every
    /// validation failure.
    #[instrument(skip_all, name = "room.auth.validate_user")]
    pub fn validate(&self, token: &str) -> Result<Caller, RoomError> {
        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "room.auth.jwt", error = ?e, "Token shape check failed");
            invalid()
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let claims = decode::<UserClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "room.auth.jwt", error = %e, "Token verification failed");
                invalid()
            })?
            .claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "room.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(invalid());
        }

        let user_id = UserId::from_identity(&claims.sub).ok_or_else(|| {
            tracing::debug!(target: "room.auth.jwt", "Token subject is not a user id");
            invalid()
        })?;

        let mut caller = Caller::new(user_id);
        if let Some(email) = claims.email.filter(|e| !e.trim().is_empty()) {
            caller = caller.with_email(email);
        }
        if let Some(name) = claims.name.filter(|n| !n.trim().is_empty()) {
            caller = caller.with_display_name(name);
        }

        tracing::debug!(target: "room.auth.jwt", "Token validated successfully");
        Ok(caller)
    }
}

fn invalid() -> RoomError {
    RoomError::InvalidToken(INVALID_TOKEN.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_JWT_SIZE_BYTES};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    const SECRET: &str = "user-token-test-secret";

    fn validator() -> UserTokenValidator {
        UserTokenValidator::new(&SecretString::from(SECRET), DEFAULT_CLOCK_SKEW)
    }

    fn sign(claims: &UserClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: String) -> UserClaims {
        let now = Utc::now().timestamp();
        UserClaims {
            sub,
            email: Some("ana@example.com".to_string()),
            name: Some("Ana".to_string()),
            iat: now,
            exp: now + 3600,
        }
    }

    #[test]
    fn test_valid_token_yields_caller() {
        let user = Uuid::new_v4();
        let token = sign(&claims(format!("user:{user}")), SECRET);

        let caller = validator().validate(&token).unwrap();
        assert_eq!(caller.user_id, UserId(user));
        assert_eq!(caller.email.as_deref(), Some("ana@example.com"));
        assert_eq!(caller.display_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims(Uuid::new_v4().to_string()), "another-secret");
        assert!(matches!(
            validator().validate(&token),
            Err(RoomError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut expired = claims(Uuid::new_v4().to_string());
        expired.iat -= 7200;
        expired.exp = Utc::now().timestamp() - 3600;
        let token = sign(&expired, SECRET);
        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_future_iat_rejected() {
        let mut future = claims(Uuid::new_v4().to_string());
        future.iat += 3600;
        future.exp += 3600;
        let token = sign(&future, SECRET);
        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let token = sign(&claims("service-account".to_string()), SECRET);
        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        let err = validator().validate(&token).unwrap_err();
        assert_eq!(err.to_string(), format!("Invalid token: {INVALID_TOKEN}"));
    }
}
