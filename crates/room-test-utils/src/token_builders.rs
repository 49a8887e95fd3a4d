//! Builder patterns for test tokens
//!
//! Provides fluent APIs for user access tokens and signed webhook deliveries.

use crate::test_ids::{TEST_AUTH_JWT_SECRET, TEST_LIVEKIT_API_KEY, TEST_LIVEKIT_API_SECRET};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use common::types::UserId;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::digest::{digest, SHA256};
use serde_json::json;

/// Builder for HS256 user access tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user(TEST_USER_ALICE)
///     .with_email("alice@example.com")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: UserClaims,
    secret: String,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            claims: UserClaims {
                sub: UserId::new().identity(),
                email: None,
                name: None,
                iat: now.timestamp(),
                exp: (now + Duration::seconds(3600)).timestamp(),
            },
            secret: TEST_AUTH_JWT_SECRET.to_string(),
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.claims.sub = user_id.identity();
        self
    }

    /// Set a raw subject, e.g. to test malformed ids
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.claims.sub = subject.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.claims.email = Some(email.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.claims.name = Some(name.to_string());
        self
    }

    /// Set expiration in seconds from now
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.claims.iat = timestamp;
        self
    }

    /// Sign with a different secret
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn build(self) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &self.claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("test token should encode")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sign a webhook body the way the media server does: a JWT issued by the
/// API key whose `sha256` claim is the base64 digest of the body.
pub fn sign_webhook(body: &[u8]) -> String {
    sign_webhook_with(body, TEST_LIVEKIT_API_KEY, TEST_LIVEKIT_API_SECRET)
}

pub fn sign_webhook_with(body: &[u8], api_key: &str, api_secret: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": api_key,
        "nbf": now,
        "exp": now + 300,
        "sha256": STANDARD.encode(digest(&SHA256, body).as_ref()),
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(api_secret.as_bytes()),
    )
    .expect("webhook token should encode")
}

/// Builder for webhook payload bodies.
///
/// # Example
/// ```rust,ignore
/// let body = WebhookBuilder::event("participant_joined")
///     .room(&room.external_room_ref)
///     .participant(&TEST_USER_BOB.identity())
///     .build();
/// ```
pub struct WebhookBuilder {
    event: String,
    room: Option<String>,
    participant: Option<(String, Option<String>)>,
    created_at: Option<i64>,
}

impl WebhookBuilder {
    pub fn event(event: &str) -> Self {
        Self {
            event: event.to_string(),
            room: None,
            participant: None,
            created_at: None,
        }
    }

    pub fn room(mut self, name: &str) -> Self {
        self.room = Some(name.to_string());
        self
    }

    pub fn participant(mut self, identity: &str) -> Self {
        self.participant = Some((identity.to_string(), None));
        self
    }

    /// A participant with an explicit kind, e.g. `"EGRESS"`.
    pub fn participant_of_kind(mut self, identity: &str, kind: &str) -> Self {
        self.participant = Some((identity.to_string(), Some(kind.to_string())));
        self
    }

    /// Event time in unix seconds, sent as a string like the media server does.
    pub fn created_at(mut self, unix_seconds: i64) -> Self {
        self.created_at = Some(unix_seconds);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = json!({
            "event": self.event,
            "id": format!("EV_{}", uuid::Uuid::new_v4().simple()),
        });
        if let Some(room) = self.room {
            body["room"] = json!({ "name": room, "sid": format!("RM_{room}") });
        }
        if let Some((identity, kind)) = self.participant {
            let mut participant = json!({ "identity": identity, "sid": "PA_test" });
            if let Some(kind) = kind {
                participant["kind"] = json!(kind);
            }
            body["participant"] = participant;
        }
        if let Some(created_at) = self.created_at {
            body["createdAt"] = json!(created_at.to_string());
        }
        serde_json::to_vec(&body).expect("webhook body should serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ids::TEST_USER_ALICE;

    #[test]
    fn test_token_builder_sets_subject() {
        let token = TestTokenBuilder::new()
            .for_user(TEST_USER_ALICE)
            .with_email("alice@example.com")
            .build();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_webhook_builder_shape() {
        let body = WebhookBuilder::event("participant_joined")
            .room("rm-1")
            .participant_of_kind("EG_abc", "EGRESS")
            .created_at(1_700_000_000)
            .build();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["event"], "participant_joined");
        assert_eq!(value["room"]["name"], "rm-1");
        assert_eq!(value["participant"]["kind"], "EGRESS");
        assert_eq!(value["createdAt"], "1700000000");
    }
}
