//! HTTP routes for the room service.
//!
//! Defines the Axum router and application state.

use crate::auth::{UserTokenValidator, WebhookVerifier};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_user_auth, AuthState};
use crate::services::{SessionCoordinator, WebhookReconciler};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub coordinator: SessionCoordinator,

    /// Applies verified media server events through the coordinator.
    pub reconciler: WebhookReconciler,

    pub webhook_verifier: Arc<WebhookVerifier>,
}

impl AppState {
    pub fn new(config: Config, coordinator: SessionCoordinator) -> Self {
        let webhook_verifier = Arc::new(WebhookVerifier::new(
            config.livekit_api_key.clone(),
            &config.livekit_api_secret,
        ));
        Self {
            reconciler: WebhookReconciler::new(coordinator.clone()),
            coordinator,
            webhook_verifier,
            config,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - operational, public, unversioned
/// - `/api/v1/webhooks/media` - media server events, signature-verified
/// - `/api/v1/rooms/...`, `/api/v1/invitations` - require a user token
/// - TraceLayer, request timeout, HTTP metrics (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        validator: Arc::new(UserTokenValidator::new(
            &state.config.auth_jwt_secret,
            Duration::from_secs(state.config.jwt_clock_skew_seconds),
        )),
    });
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/webhooks/media", post(handlers::receive_media_webhook))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route(
            "/api/v1/rooms",
            post(handlers::create_room).get(handlers::list_rooms),
        )
        .route("/api/v1/rooms/:id", get(handlers::get_room))
        .route("/api/v1/rooms/:id/join", post(handlers::join_room))
        .route("/api/v1/rooms/:id/leave", post(handlers::leave_room))
        .route("/api/v1/rooms/:id/start", post(handlers::start_room))
        .route("/api/v1/rooms/:id/end", post(handlers::end_room))
        .route("/api/v1/rooms/:id/cancel", post(handlers::cancel_room))
        .route("/api/v1/rooms/:id/token", post(handlers::issue_access_token))
        .route(
            "/api/v1/rooms/:id/transfer-host",
            post(handlers::transfer_host),
        )
        .route(
            "/api/v1/rooms/:id/participants",
            get(handlers::list_participants),
        )
        .route(
            "/api/v1/rooms/:id/participants/waiting",
            get(handlers::list_waiting_participants),
        )
        .route(
            "/api/v1/rooms/:id/participants/:pid/admit",
            post(handlers::admit_participant),
        )
        .route(
            "/api/v1/rooms/:id/participants/:pid/deny",
            post(handlers::deny_participant),
        )
        .route(
            "/api/v1/rooms/:id/participants/:pid/block",
            post(handlers::block_participant),
        )
        .route(
            "/api/v1/rooms/:id/participants/:pid/remove",
            post(handlers::remove_participant),
        )
        .route(
            "/api/v1/rooms/:id/invitations",
            post(handlers::invite_by_email).get(handlers::list_room_invitations),
        )
        .route(
            "/api/v1/rooms/:id/invitations/accept",
            post(handlers::accept_invitation),
        )
        .route(
            "/api/v1/rooms/:id/invitations/decline",
            post(handlers::decline_invitation),
        )
        .route("/api/v1/invitations", get(handlers::list_my_invitations))
        .route_layer(middleware::from_fn_with_state(auth_state, require_user_auth))
        .with_state(state);

    // Layers wrap outwards in the order added:
    // 1. TraceLayer - innermost
    // 2. TimeoutLayer - 408 once the request deadline passes
    // 3. http_metrics_middleware - outermost, sees every response
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}
