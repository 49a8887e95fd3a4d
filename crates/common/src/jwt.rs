//! JWT helpers shared by the room session crates.
//!
//! - Size limit checked before any parsing
//! - Clock skew constants and `iat` validation
//! - The claims carried by end-user tokens
//!
//! Signature verification lives with the caller, which knows which key and
//! algorithm apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted JWT size in bytes (8KB).
///
/// Tokens above this size are rejected before base64 decoding or signature
/// work is attempted.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default tolerance for clocks running ahead of ours (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for a configured clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Errors raised by the pre-verification checks.
///
/// Every variant renders the same message so that callers cannot leak which
/// check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    #[error("The access token is invalid or expired")]
    MalformedToken,

    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

/// Claims carried by an end-user access token.
///
/// Issued by the external identity service. `sub` is the user id (a UUID,
/// optionally prefixed with `user:`). The email is used to bind email
/// invitations to the account.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserClaims {
    /// Subject (user id). Redacted in Debug output.
    pub sub: String,

    /// Verified email address of the user, if the identity service has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name to show to other participants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Reject tokens that exceed [`MAX_JWT_SIZE_BYTES`] or are not three
/// dot-separated segments.
///
/// # Errors
///
/// - `TokenTooLarge` if the token is over the size limit
/// - `MalformedToken` if the token does not have a JWT shape
pub fn check_token_shape(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let segments = token.split('.').count();
    if segments != 3 || token.split('.').any(str::is_empty) {
        tracing::debug!(
            target: "common.jwt",
            segments,
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(())
}

/// Validate the `iat` claim against the current time.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` when `iat` is more than `clock_skew` ahead.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic variant of [`validate_iat`] against an explicit `now`.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` when `iat` is more than `clock_skew` ahead of `now`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW at config time
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat,
            now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}
