//! Media server webhook verification.
//!
//! LiveKit signs each delivery with an HS256 JWT in the `Authorization`
//! header. The token is issued by our API key and carries a `sha256` claim
//! holding the base64 SHA-256 digest of the raw request body.

use crate::errors::RoomError;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::jwt::check_token_shape;
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use ring::digest::{digest, SHA256};
use serde::Deserialize;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct WebhookClaims {
    #[serde(default)]
    sha256: Option<String>,
}

pub struct WebhookVerifier {
    api_key: String,
    decoding_key: DecodingKey,
}

impl WebhookVerifier {
    pub fn new(api_key: impl Into<String>, api_secret: &SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            decoding_key: DecodingKey::from_secret(api_secret.expose_secret().as_bytes()),
        }
    }

    /// Check `authorization` against `body`.
    ///
    /// Accepts the token with or without a `Bearer ` prefix.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::InvalidSignature` when the header is missing, the
    /// token does not verify, or the digest does not match the body.
    #[instrument(skip_all, name = "room.auth.verify_webhook")]
    pub fn verify(&self, authorization: Option<&str>, body: &[u8]) -> Result<(), RoomError> {
        let header = authorization.map(str::trim).filter(|h| !h.is_empty()).ok_or_else(|| {
            tracing::debug!(target: "room.auth.webhook", "Missing Authorization header");
            RoomError::InvalidSignature
        })?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header);

        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "room.auth.webhook", error = ?e, "Webhook token shape check failed");
            RoomError::InvalidSignature
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);
        validation.set_required_spec_claims(&["iss"]);

        let claims = decode::<WebhookClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "room.auth.webhook", error = %e, "Webhook token verification failed");
                RoomError::InvalidSignature
            })?
            .claims;

        let expected = STANDARD.encode(digest(&SHA256, body).as_ref());
        match claims.sha256 {
            Some(claimed) if claimed == expected => Ok(()),
            _ => {
                tracing::warn!(target: "room.auth.webhook", "Webhook body digest mismatch");
                Err(RoomError::InvalidSignature)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const API_KEY: &str = "devkey";
    const API_SECRET: &str = "webhook-test-secret";
    const BODY: &[u8] = br#"{"event":"room_started","room":{"name":"r1"}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(API_KEY, &SecretString::from(API_SECRET))
    }

    fn token_for(body: &[u8], iss: &str, secret: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = json!({
            "iss": iss,
            "nbf": now,
            "exp": now + 300,
            "sha256": STANDARD.encode(digest(&SHA256, body).as_ref()),
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_signature_accepted_with_and_without_bearer() {
        let token = token_for(BODY, API_KEY, API_SECRET);
        assert!(verifier().verify(Some(&token), BODY).is_ok());
        assert!(verifier()
            .verify(Some(&format!("Bearer {token}")), BODY)
            .is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let token = token_for(BODY, API_KEY, API_SECRET);
        let result = verifier().verify(Some(&token), br#"{"event":"room_finished"}"#);
        assert!(matches!(result, Err(RoomError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_issuer_or_secret_rejected() {
        let wrong_issuer = token_for(BODY, "other-key", API_SECRET);
        assert!(verifier().verify(Some(&wrong_issuer), BODY).is_err());

        let wrong_secret = token_for(BODY, API_KEY, "not-the-secret");
        assert!(verifier().verify(Some(&wrong_secret), BODY).is_err());
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(matches!(
            verifier().verify(None, BODY),
            Err(RoomError::InvalidSignature)
        ));
        assert!(verifier().verify(Some("   "), BODY).is_err());
        assert!(verifier().verify(Some("garbage"), BODY).is_err());
    }
}
