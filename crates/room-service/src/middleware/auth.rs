//! Authentication middleware for client routes.
//!
//! Extracts the Bearer token, validates it as a user token and injects the
//! resulting [`Caller`] into request extensions.

use crate::auth::UserTokenValidator;
use crate::errors::RoomError;
use crate::models::Caller;
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
    pub validator: Arc<UserTokenValidator>,
}

fn extract_bearer_token(req: &Request) -> Result<&str, RoomError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "room.middleware.auth", "Missing Authorization header");
            RoomError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "room.middleware.auth", "Invalid Authorization header format");
        RoomError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware for user tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing or invalid
/// - Continues with the `Caller` in extensions otherwise
#[instrument(skip_all, name = "room.middleware.user_auth")]
pub async fn require_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RoomError> {
    let token = extract_bearer_token(&req)?;
    let caller: Caller = state.validator.validate(token)?;

    req.extensions_mut().insert(caller);

    Ok(next.run(req).await)
}
