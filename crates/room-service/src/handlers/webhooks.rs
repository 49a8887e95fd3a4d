//! Media server webhook handler.
//!
//! `POST /api/v1/webhooks/media` is not behind user authentication. Every
//! delivery must carry a valid LiveKit signature over its raw body.
//!
//! # Response
//!
//! - 200 OK: applied or acknowledged
//! - 400 Bad Request: body is not a webhook payload
//! - 401 Unauthorized: signature missing or invalid
//! - 5xx: transient failure, the media server retries

use crate::errors::RoomError;
use crate::handlers::observe;
use crate::models::StatusResponse;
use crate::observability::metrics;
use crate::routes::AppState;
use crate::services::webhook::WebhookPayload;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "room.handlers.media_webhook")]
pub async fn receive_media_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<StatusResponse>, RoomError> {
    let authorization = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    if let Err(e) = state.webhook_verifier.verify(authorization, &body) {
        metrics::record_webhook_event("unverified", "rejected");
        return observe("media_webhook", Err(e));
    }

    let payload = WebhookPayload::parse(&body).inspect_err(|_| {
        metrics::record_webhook_event("unparseable", "rejected");
    });
    let payload = observe("media_webhook", payload)?;

    observe("media_webhook", state.reconciler.reconcile(&payload).await)?;
    Ok(Json(StatusResponse::ok()))
}
